//! Strided views over a single tile.
//!
//! Kernels receive their operands as [`TileRef`] and [`TileMut`]. Both carry a row stride and a
//! column stride, so a transposed operand is just a view with swapped strides and the kernels
//! only have to be written for one orientation.

use core::marker::PhantomData;
use core::ptr::NonNull;
use equator::{assert, debug_assert};
use reborrow::*;

struct TileBase<E> {
    ptr: NonNull<E>,
    nrows: usize,
    ncols: usize,
    row_stride: isize,
    col_stride: isize,
}
impl<E> Copy for TileBase<E> {}
impl<E> Clone for TileBase<E> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> TileBase<E> {
    #[inline(always)]
    fn offset(&self, i: usize, j: usize) -> isize {
        i as isize * self.row_stride + j as isize * self.col_stride
    }

    #[inline]
    #[track_caller]
    fn submatrix(self, i: usize, j: usize, nrows: usize, ncols: usize) -> Self {
        assert!(all(i + nrows <= self.nrows, j + ncols <= self.ncols));
        let ptr = if nrows == 0 || ncols == 0 {
            self.ptr
        } else {
            unsafe { NonNull::new_unchecked(self.ptr.as_ptr().offset(self.offset(i, j))) }
        };
        Self {
            ptr,
            nrows,
            ncols,
            row_stride: self.row_stride,
            col_stride: self.col_stride,
        }
    }

    #[inline]
    fn transpose(self) -> Self {
        Self {
            ptr: self.ptr,
            nrows: self.ncols,
            ncols: self.nrows,
            row_stride: self.col_stride,
            col_stride: self.row_stride,
        }
    }
}

/// Tile view with general row and column strides.
pub struct TileRef<'a, E> {
    base: TileBase<E>,
    _marker: PhantomData<&'a E>,
}

/// Mutable tile view with general row and column strides.
///
/// For usage examples, see [`TileRef`].
pub struct TileMut<'a, E> {
    base: TileBase<E>,
    _marker: PhantomData<&'a mut E>,
}

unsafe impl<'a, E: Sync> Sync for TileRef<'a, E> {}
unsafe impl<'a, E: Sync> Send for TileRef<'a, E> {}
unsafe impl<'a, E: Sync> Sync for TileMut<'a, E> {}
unsafe impl<'a, E: Send> Send for TileMut<'a, E> {}

impl<'a, E> Copy for TileRef<'a, E> {}
impl<'a, E> Clone for TileRef<'a, E> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<'b, 'a, E> Reborrow<'b> for TileRef<'a, E> {
    type Target = TileRef<'b, E>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        *self
    }
}
impl<'b, 'a, E> ReborrowMut<'b> for TileRef<'a, E> {
    type Target = TileRef<'b, E>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        *self
    }
}

impl<'b, 'a, E> Reborrow<'b> for TileMut<'a, E> {
    type Target = TileRef<'b, E>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        Self::Target {
            base: self.base,
            _marker: PhantomData,
        }
    }
}
impl<'b, 'a, E> ReborrowMut<'b> for TileMut<'a, E> {
    type Target = TileMut<'b, E>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        Self::Target {
            base: self.base,
            _marker: PhantomData,
        }
    }
}

impl<'a, E> IntoConst for TileRef<'a, E> {
    type Target = TileRef<'a, E>;

    #[inline]
    fn into_const(self) -> Self::Target {
        self
    }
}
impl<'a, E> IntoConst for TileMut<'a, E> {
    type Target = TileRef<'a, E>;

    #[inline]
    fn into_const(self) -> Self::Target {
        Self::Target {
            base: self.base,
            _marker: PhantomData,
        }
    }
}

impl<'a, E> TileRef<'a, E> {
    /// Returns a tile view from the given arguments.
    ///
    /// # Safety
    ///
    /// `ptr` must be non null and properly aligned for type `E`.
    /// For each `i < nrows` and `j < ncols`,
    /// `ptr.offset(i as isize * row_stride + j as isize * col_stride)` must point to a valid
    /// initialized object of type `E`.
    /// The referenced memory must not be mutated during the lifetime `'a`.
    #[inline]
    pub unsafe fn from_raw_parts(
        ptr: *const E,
        nrows: usize,
        ncols: usize,
        row_stride: isize,
        col_stride: isize,
    ) -> Self {
        Self {
            base: TileBase {
                ptr: NonNull::new_unchecked(ptr as *mut E),
                nrows,
                ncols,
                row_stride,
                col_stride,
            },
            _marker: PhantomData,
        }
    }

    /// Returns a column-major view over `data`, with leading dimension `ld`.
    ///
    /// # Panics
    ///
    /// Panics if `ld < nrows` or if `data` is too short.
    #[inline]
    #[track_caller]
    pub fn from_col_major_slice(data: &'a [E], nrows: usize, ncols: usize, ld: usize) -> Self {
        assert!(ld >= nrows);
        assert!(data.len() + ld >= ld * ncols + nrows);
        unsafe { Self::from_raw_parts(data.as_ptr(), nrows, ncols, 1, ld as isize) }
    }

    /// Returns a pointer to the first element of the view.
    #[inline]
    pub fn as_ptr(self) -> *const E {
        self.base.ptr.as_ptr()
    }

    /// Returns the number of rows of the view.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.base.nrows
    }

    /// Returns the number of columns of the view.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.base.ncols
    }

    /// Returns the offset between the first elements of two successive rows.
    #[inline]
    pub fn row_stride(&self) -> isize {
        self.base.row_stride
    }

    /// Returns the offset between the first elements of two successive columns.
    #[inline]
    pub fn col_stride(&self) -> isize {
        self.base.col_stride
    }

    /// Reads the element at position `(i, j)`.
    #[inline(always)]
    #[track_caller]
    pub fn read(&self, i: usize, j: usize) -> E
    where
        E: Copy,
    {
        debug_assert!(all(i < self.nrows(), j < self.ncols()));
        unsafe { *self.base.ptr.as_ptr().offset(self.base.offset(i, j)) }
    }

    /// Returns the transpose of `self`.
    #[inline]
    #[must_use]
    pub fn transpose(self) -> Self {
        Self {
            base: self.base.transpose(),
            _marker: PhantomData,
        }
    }

    /// Returns the view `[i..i + nrows, j..j + ncols]`.
    #[inline]
    #[track_caller]
    pub fn submatrix(self, i: usize, j: usize, nrows: usize, ncols: usize) -> Self {
        Self {
            base: self.base.submatrix(i, j, nrows, ncols),
            _marker: PhantomData,
        }
    }
}

impl<'a, E> TileMut<'a, E> {
    /// Returns a mutable tile view from the given arguments.
    ///
    /// # Safety
    ///
    /// Same as [`TileRef::from_raw_parts`], and the referenced memory must not be accessed by
    /// any other pointer during the lifetime `'a`.
    #[inline]
    pub unsafe fn from_raw_parts(
        ptr: *mut E,
        nrows: usize,
        ncols: usize,
        row_stride: isize,
        col_stride: isize,
    ) -> Self {
        Self {
            base: TileBase {
                ptr: NonNull::new_unchecked(ptr),
                nrows,
                ncols,
                row_stride,
                col_stride,
            },
            _marker: PhantomData,
        }
    }

    /// Returns a mutable column-major view over `data`, with leading dimension `ld`.
    ///
    /// # Panics
    ///
    /// Panics if `ld < nrows` or if `data` is too short.
    #[inline]
    #[track_caller]
    pub fn from_col_major_slice(data: &'a mut [E], nrows: usize, ncols: usize, ld: usize) -> Self {
        assert!(ld >= nrows);
        assert!(data.len() + ld >= ld * ncols + nrows);
        unsafe { Self::from_raw_parts(data.as_mut_ptr(), nrows, ncols, 1, ld as isize) }
    }

    /// Returns a pointer to the first element of the view.
    #[inline]
    pub fn as_ptr(self) -> *mut E {
        self.base.ptr.as_ptr()
    }

    /// Returns the number of rows of the view.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.base.nrows
    }

    /// Returns the number of columns of the view.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.base.ncols
    }

    /// Returns the offset between the first elements of two successive rows.
    #[inline]
    pub fn row_stride(&self) -> isize {
        self.base.row_stride
    }

    /// Returns the offset between the first elements of two successive columns.
    #[inline]
    pub fn col_stride(&self) -> isize {
        self.base.col_stride
    }

    /// Reads the element at position `(i, j)`.
    #[inline(always)]
    #[track_caller]
    pub fn read(&self, i: usize, j: usize) -> E
    where
        E: Copy,
    {
        self.rb().read(i, j)
    }

    /// Writes `value` at position `(i, j)`.
    #[inline(always)]
    #[track_caller]
    pub fn write(&mut self, i: usize, j: usize, value: E) {
        debug_assert!(all(i < self.nrows(), j < self.ncols()));
        unsafe { *self.base.ptr.as_ptr().offset(self.base.offset(i, j)) = value }
    }

    /// Returns the transpose of `self`.
    #[inline]
    #[must_use]
    pub fn transpose(self) -> Self {
        Self {
            base: self.base.transpose(),
            _marker: PhantomData,
        }
    }

    /// Returns the view `[i..i + nrows, j..j + ncols]`.
    #[inline]
    #[track_caller]
    pub fn submatrix(self, i: usize, j: usize, nrows: usize, ncols: usize) -> Self {
        Self {
            base: self.base.submatrix(i, j, nrows, ncols),
            _marker: PhantomData,
        }
    }

    /// Splits the view into the columns `[0..col]` and `[col..]`.
    #[inline]
    #[track_caller]
    pub fn split_at_col(self, col: usize) -> (Self, Self) {
        assert!(col <= self.ncols());
        let nrows = self.nrows();
        let ncols = self.ncols();
        let left = self.base.submatrix(0, 0, nrows, col);
        let right = self.base.submatrix(0, col, nrows, ncols - col);
        (
            Self {
                base: left,
                _marker: PhantomData,
            },
            Self {
                base: right,
                _marker: PhantomData,
            },
        )
    }

    /// Splits the view into the rows `[0..row]` and `[row..]`.
    #[inline]
    #[track_caller]
    pub fn split_at_row(self, row: usize) -> (Self, Self) {
        let (top, bottom) = self.transpose().split_at_col(row);
        (top.transpose(), bottom.transpose())
    }

    /// Sets every element of the view to `value`.
    #[inline]
    pub fn fill(&mut self, value: E)
    where
        E: Copy,
    {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self.write(i, j, value);
            }
        }
    }

    /// Copies the elements of `src`, which must have the same dimensions.
    #[inline]
    #[track_caller]
    pub fn copy_from(&mut self, src: TileRef<'_, E>)
    where
        E: Copy,
    {
        assert!(all(src.nrows() == self.nrows(), src.ncols() == self.ncols()));
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self.write(i, j, src.read(i, j));
            }
        }
    }
}
