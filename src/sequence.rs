//! Execution contexts shared by the tasks of one logical operation.
//!
//! A [`Sequence`] aggregates every submission made on behalf of a single call, and keeps the
//! status of the first one that failed. A [`Request`] identifies one of those submissions.
//!
//! Both statuses are stored as integer codes (see [`Error::code`]). A status only ever moves away
//! from [`SUCCESS`] once: the transition is a compare-and-set, so when several tasks fail
//! concurrently exactly one of them is recorded. The successful exchange uses `AcqRel` ordering
//! and the status loads use `Acquire`, so a task observing a failed status also observes every
//! write that the failing task made before recording it.

use crate::error::{Error, Result, SUCCESS};
use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

/// Identifies a single submission within a [`Sequence`].
#[derive(Debug)]
pub struct Request {
    status: AtomicI32,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Returns a neutral request.
    #[inline]
    pub fn new() -> Self {
        Self {
            status: AtomicI32::new(SUCCESS),
        }
    }

    /// Returns the status of the request.
    #[inline]
    pub fn status(&self) -> Result<()> {
        match Error::from_code(self.status.load(Ordering::Acquire)) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Records `error` if the request is still neutral. Returns `true` if it was recorded.
    #[inline]
    pub(crate) fn fail(&self, error: Error) -> bool {
        self.status
            .compare_exchange(SUCCESS, error.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Aggregates the submissions of one logical operation.
#[derive(Debug)]
pub struct Sequence {
    status: AtomicI32,
    submissions: AtomicUsize,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequence {
    /// Returns a new sequence in the successful state.
    #[inline]
    pub fn new() -> Self {
        Self {
            status: AtomicI32::new(SUCCESS),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Returns the aggregate status of the sequence, i.e. the first failure recorded.
    #[inline]
    pub fn status(&self) -> Result<()> {
        match Error::from_code(self.status.load(Ordering::Acquire)) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Returns `true` if no failure has been recorded.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status.load(Ordering::Acquire) == SUCCESS
    }

    /// Number of tasks admitted under this sequence.
    #[inline]
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn admit(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failure of `request`.
    ///
    /// The request keeps its first failure, and the sequence keeps the first failure of any of
    /// its requests. Later calls never overwrite an earlier status.
    pub fn fail(&self, request: &Request, error: Error) {
        request.fail(error);
        if self
            .status
            .compare_exchange(SUCCESS, error.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::debug!("sequence failed with {error}");
        }
    }

    /// Entry check of every operation that submits work.
    ///
    /// If the sequence is already poisoned, marks `request` as aborted and returns the error.
    #[inline]
    pub fn check(&self, request: &Request) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            request.fail(Error::SequenceAborted);
            Err(Error::SequenceAborted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_failure_wins() {
        let seq = Sequence::new();
        let req = Request::new();
        seq.status().unwrap();

        seq.fail(&req, Error::Kernel { info: 3 });
        seq.fail(&req, Error::IllegalValue);

        assert_eq!(seq.status(), Err(Error::Kernel { info: 3 }));
        assert_eq!(req.status(), Err(Error::Kernel { info: 3 }));
    }

    #[test]
    fn failure_without_kernel_index_poisons() {
        let seq = Sequence::new();
        let req = Request::new();
        seq.fail(&req, Error::Kernel { info: 0 });

        assert!(!seq.is_ok());
        assert_eq!(seq.status(), Err(Error::Kernel { info: 0 }));
        assert_eq!(req.status(), Err(Error::Kernel { info: 0 }));
        assert_eq!(seq.check(&Request::new()), Err(Error::SequenceAborted));
    }

    #[test]
    fn aborted_check_only_tags_the_request() {
        let seq = Sequence::new();
        seq.fail(&Request::new(), Error::OutOfMemory);

        let req = Request::new();
        assert_eq!(seq.check(&req), Err(Error::SequenceAborted));
        assert_eq!(req.status(), Err(Error::SequenceAborted));
        assert_eq!(seq.status(), Err(Error::OutOfMemory));
    }

    #[test]
    fn concurrent_failures_record_one_of_them() {
        let seq = Arc::new(Sequence::new());
        let handles: Vec<_> = (1..=8)
            .map(|info| {
                let seq = seq.clone();
                std::thread::spawn(move || seq.fail(&Request::new(), Error::Kernel { info }))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        match seq.status() {
            Err(Error::Kernel { info }) => assert!((1..=8).contains(&info)),
            other => panic!("unexpected status {other:?}"),
        }
    }
}
