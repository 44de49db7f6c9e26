//! Error taxonomy shared by the synchronous entry points and the scheduled tasks.
//!
//! Errors travel through a [`Sequence`](crate::Sequence) as plain integer codes, so every variant
//! maps to a stable code with [`Error::code`] and back with [`Error::from_code`].

/// Status code of a successful sequence or a neutral request.
pub const SUCCESS: i32 = 0;

const NOT_INITIALIZED: i32 = -101;
const OUT_OF_MEMORY: i32 = -102;
const ILLEGAL_VALUE: i32 = -103;
const SEQUENCE_ABORTED: i32 = -104;
const ILLEGAL_KERNEL: i32 = -105;
const KERNEL_WITHOUT_INDEX: i32 = -106;

/// Largest argument position that [`Error::IllegalArgument`] encodes without ambiguity.
///
/// Positions above it would collide with the fixed codes of the other variants. Entry points
/// have far fewer arguments.
pub const MAX_ARGUMENT_INDEX: usize = 100;

/// Errors reported by the entry points of this crate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The argument at the given (1-based) position of a top-level entry point had an illegal
    /// value. No task was submitted.
    #[error("argument {index} had an illegal value")]
    IllegalArgument {
        /// Position of the offending argument.
        index: usize,
    },
    /// A descriptor or tile-level argument was malformed.
    #[error("illegal value")]
    IllegalValue,
    /// The execution context could not be established.
    #[error("execution context not initialized")]
    NotInitialized,
    /// Allocating a descriptor or a workspace failed.
    #[error("out of memory")]
    OutOfMemory,
    /// The submission was refused because an earlier submission of the same sequence failed.
    #[error("sequence aborted by an earlier failure")]
    SequenceAborted,
    /// A numeric kernel reported a failure at run time.
    ///
    /// `info` is the kernel-local error index offset by the base supplied by the submitting
    /// algorithm, e.g. the global order of the first non positive definite minor for a Cholesky
    /// factorization. A backend that cannot locate its failure reports `info = 0`.
    #[error("kernel failure (info = {info})")]
    Kernel {
        /// 1-based error index, or `0` if the failure has no position.
        info: usize,
    },
    /// A reduction tree operation did not match the tile grid it was applied to.
    #[error("illegal kernel in reduction tree")]
    IllegalKernel,
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    /// Returns the integer status code of the error.
    ///
    /// Argument errors map to `-index`, kernel failures to `info`, and the remaining variants to
    /// fixed codes below `-100`. A kernel failure without a position maps to a fixed code as
    /// well, so that no error is ever encoded as [`SUCCESS`].
    ///
    /// Argument positions above [`MAX_ARGUMENT_INDEX`] and kernel indices above `i32::MAX` are
    /// saturated, and only round-trip through [`Error::from_code`] up to that bound.
    pub fn code(self) -> i32 {
        match self {
            Error::IllegalArgument { index } => {
                -(Ord::min(index, MAX_ARGUMENT_INDEX) as i32)
            }
            Error::IllegalValue => ILLEGAL_VALUE,
            Error::NotInitialized => NOT_INITIALIZED,
            Error::OutOfMemory => OUT_OF_MEMORY,
            Error::SequenceAborted => SEQUENCE_ABORTED,
            Error::Kernel { info: 0 } => KERNEL_WITHOUT_INDEX,
            Error::Kernel { info } => i32::try_from(info).unwrap_or(i32::MAX),
            Error::IllegalKernel => ILLEGAL_KERNEL,
        }
    }

    /// Decodes a status code produced by [`Error::code`].
    ///
    /// Returns `None` for [`SUCCESS`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            SUCCESS => None,
            NOT_INITIALIZED => Some(Error::NotInitialized),
            OUT_OF_MEMORY => Some(Error::OutOfMemory),
            ILLEGAL_VALUE => Some(Error::IllegalValue),
            SEQUENCE_ABORTED => Some(Error::SequenceAborted),
            ILLEGAL_KERNEL => Some(Error::IllegalKernel),
            KERNEL_WITHOUT_INDEX => Some(Error::Kernel { info: 0 }),
            code if code > 0 => Some(Error::Kernel { info: code as usize }),
            code => Some(Error::IllegalArgument {
                index: code.unsigned_abs() as usize,
            }),
        }
    }

    /// Offsets the index of a kernel failure by `base`, leaving other errors untouched.
    ///
    /// Tile kernels report indices relative to their tile, the submitting algorithm adds the
    /// position of the tile in the whole matrix.
    #[inline]
    pub fn offset(self, base: usize) -> Self {
        match self {
            Error::Kernel { info } => Error::Kernel { info: info + base },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for err in [
            Error::IllegalArgument { index: 3 },
            Error::IllegalValue,
            Error::NotInitialized,
            Error::OutOfMemory,
            Error::SequenceAborted,
            Error::Kernel { info: 17 },
            Error::Kernel { info: 0 },
            Error::IllegalKernel,
        ] {
            assert!(err.code() != SUCCESS);
            assert_eq!(Error::from_code(err.code()), Some(err));
        }
        assert_eq!(Error::from_code(SUCCESS), None);
    }

    #[test]
    fn argument_positions_do_not_alias_fixed_codes() {
        for index in 1..=MAX_ARGUMENT_INDEX {
            let err = Error::IllegalArgument { index };
            assert_eq!(Error::from_code(err.code()), Some(err));
        }
        for index in [MAX_ARGUMENT_INDEX + 1, 103, 106, usize::MAX] {
            assert_eq!(
                Error::from_code(Error::IllegalArgument { index }.code()),
                Some(Error::IllegalArgument {
                    index: MAX_ARGUMENT_INDEX
                })
            );
        }
    }

    #[test]
    fn huge_kernel_index_stays_a_kernel_failure() {
        assert_eq!(
            Error::from_code(Error::Kernel { info: usize::MAX }.code()),
            Some(Error::Kernel {
                info: i32::MAX as usize
            })
        );
    }

    #[test]
    fn offset_only_moves_kernel_errors() {
        assert_eq!(
            Error::Kernel { info: 2 }.offset(8),
            Error::Kernel { info: 10 }
        );
        assert_eq!(Error::IllegalValue.offset(8), Error::IllegalValue);
    }
}
