//! `tessella` decomposes dense matrix factorizations into tile operations that are executed by a
//! dependency-driven task scheduler.
//!
//! A matrix is described by a [`TileDesc`], a grid of contiguous column-major tiles. Algorithms
//! never touch the matrix directly: they open a scheduling [`Region`](sched::Region), and submit
//! one task per tile kernel, each task declaring the tiles it reads and writes. Tasks whose
//! footprints overlap run in submission order, all other tasks may run concurrently on the rayon
//! thread pool.
//!
//! Every submission belongs to a [`Sequence`], which records the first failure of any of its tasks.
//! Once a sequence is poisoned, no further work is admitted under it, and tasks that were already
//! queued skip their numeric body.
//!
//! The orthogonal factorizations use a hierarchical reduction tree (see [`tree`]): panels are
//! split into domains that are reduced with triangular-square (TS) eliminations, and domain heads
//! are then merged with triangular-triangular (TT) eliminations in a binary tree. The same plan
//! is replayed forward to factorize and in either direction to apply $Q$ or $Q^\top$.
//!
//! # Example
//!
//! ```
//! use tessella::{linalg::qr, Context};
//!
//! let ctx = Context::builder().tile_size(4).inner_block_size(2).build().unwrap();
//!
//! // least squares solution of a 6x3 system
//! let (m, n, nrhs) = (6, 3, 1);
//! let mut a = vec![0.0f64; m * n];
//! for j in 0..n {
//!     for i in 0..m {
//!         a[i + j * m] = if i == j { 2.0 } else { 1.0 / (1 + i + j) as f64 };
//!     }
//! }
//! let mut b = vec![1.0f64; m * nrhs];
//! qr::gels(&ctx, m, n, nrhs, &mut a, m, &mut b, m).unwrap();
//! ```
//!
//! # Kernel backends
//!
//! Numeric tile kernels are provided by an implementation of [`TileKernels`], which is carried by
//! the [`Context`]. [`NativeKernels`] is the default in-process implementation; an optimized
//! backend can override any subset of the kernels.

#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(non_snake_case)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod context;
pub mod desc;
pub mod error;
pub mod field;
pub mod kernel;
pub mod layout;
pub mod linalg;
pub mod mat;
pub mod sched;
pub mod sequence;
pub mod tree;
pub mod utils;

pub use context::{Context, ContextBuilder};
pub use desc::{MatrixType, Tile, TileDesc};
pub use error::{Error, Result};
pub use field::RealField;
pub use kernel::{NativeKernels, TileKernels};
pub use mat::{TileMut, TileRef};
pub use sequence::{Request, Sequence};

pub use dyn_stack;
pub use reborrow;

/// Specifies on which side of the operand an operator is applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    /// The operator multiplies the operand from the left.
    Left,
    /// The operator multiplies the operand from the right.
    Right,
}

/// Specifies which triangular part of a matrix should be accessed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Uplo {
    /// Upper triangular part.
    Upper,
    /// Lower triangular part.
    Lower,
}

impl Uplo {
    /// Returns the opposite triangle, which is the one accessed through a transposed view.
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Uplo::Upper => Uplo::Lower,
            Uplo::Lower => Uplo::Upper,
        }
    }
}

/// Whether an operand should be implicitly transposed when read.
///
/// Only real element types are supported, so [`Trans::ConjTrans`] is equivalent to
/// [`Trans::Trans`]; both are accepted to keep call sites close to their LAPACK counterparts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trans {
    /// Use the operand as is.
    NoTrans,
    /// Use the transpose of the operand.
    Trans,
    /// Use the conjugate transpose of the operand.
    ConjTrans,
}

impl Trans {
    /// Returns `true` unless `self` is [`Trans::NoTrans`].
    #[inline]
    pub fn is_trans(self) -> bool {
        !matches!(self, Trans::NoTrans)
    }

    /// Returns the operator applied in the opposite direction.
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Trans::NoTrans => Trans::ConjTrans,
            Trans::Trans | Trans::ConjTrans => Trans::NoTrans,
        }
    }
}

/// Whether a triangular matrix has an implicit unit diagonal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Diag {
    /// The diagonal is read from memory.
    NonUnit,
    /// The diagonal is implicitly one and never read.
    Unit,
}

/// Direction of a reduction over the elements of a matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// One result per column.
    Columnwise,
    /// One result per row.
    Rowwise,
}

/// Parallelism strategy used by a [`Context`] to run the tasks of a scheduling region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parallelism {
    /// No parallelism.
    ///
    /// Every task is executed on the submitting thread as soon as it is submitted, which is
    /// always a valid schedule since submission order respects every dependency.
    None,
    /// Rayon parallelism.
    ///
    /// Tasks are executed on a rayon thread pool once their dependencies are satisfied.
    ///
    /// A value of `0` uses the global rayon pool, any other value makes the context build a
    /// dedicated pool with that many threads.
    Rayon(usize),
}
