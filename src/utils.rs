//! Small helpers shared by the scheduler and the algorithms.

/// Unsafe [`Send`] and [`Sync`] pointer type.
///
/// Tasks capture raw pointers to flat matrices through this wrapper, exclusive access being
/// guaranteed by the footprints they declare to the scheduler.
pub struct Ptr<T>(pub *mut T);
unsafe impl<T> Send for Ptr<T> {}
unsafe impl<T> Sync for Ptr<T> {}
impl<T> Copy for Ptr<T> {}
impl<T> Clone for Ptr<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Ptr<T> {
    /// Returns the wrapped pointer.
    ///
    /// Closures should go through this method rather than the field, so that they capture the
    /// whole [`Send`] wrapper.
    #[inline(always)]
    pub fn ptr(self) -> *mut T {
        self.0
    }
}

pub(crate) trait DivCeil: Sized {
    fn msrv_div_ceil(self, rhs: Self) -> Self;
}

impl DivCeil for usize {
    #[inline]
    fn msrv_div_ceil(self, rhs: Self) -> Self {
        let d = self / rhs;
        let r = self % rhs;
        if r > 0 {
            d + 1
        } else {
            d
        }
    }
}
