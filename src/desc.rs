//! Tiled matrix descriptors.
//!
//! A [`TileDesc`] describes an `m×n` matrix as an `mt×nt` grid of `mb×nb` tiles. The elements of
//! every tile are stored contiguously in column-major order, and the tiles of a tile column are
//! stored one after the other. Tiles in the last tile row or column may be truncated.
//!
//! Descriptors are cheap to clone: the backing storage is reference counted, and views created
//! with [`TileDesc::submatrix`] share it with the descriptor they come from.

use crate::{
    error::{Error, Result},
    field::{Precision, RealField},
    mat::{TileMut, TileRef},
    utils::DivCeil,
};
use std::sync::Arc;

/// Storage mode of a descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatrixType {
    /// Every element of the matrix is stored.
    General,
    /// Only the upper triangle is meaningful.
    Upper,
    /// Only the lower triangle is meaningful.
    Lower,
}

struct TileStorage<E> {
    ptr: *mut E,
    len: usize,
}

unsafe impl<E: Send> Send for TileStorage<E> {}
unsafe impl<E: Sync> Sync for TileStorage<E> {}

impl<E: RealField> TileStorage<E> {
    fn zeroed(len: usize) -> Result<Self> {
        let mut data = Vec::<E>::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory)?;
        data.resize(len, E::zero());
        let ptr = Box::into_raw(data.into_boxed_slice()) as *mut E;
        Ok(Self { ptr, len })
    }
}

impl<E> Drop for TileStorage<E> {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(
                self.ptr, self.len,
            )))
        };
    }
}

/// Identifies a tile of the backing storage, independently of the view it was reached through.
///
/// The scheduler uses these keys to detect overlapping task footprints.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub(crate) base: usize,
    pub(crate) row: usize,
    pub(crate) col: usize,
}

impl TileKey {
    pub(crate) fn new(base: usize, row: usize, col: usize) -> Self {
        Self { base, row, col }
    }
}

/// Handle to one tile of a descriptor.
///
/// A handle keeps the backing storage alive, so it can be moved into a scheduled task.
pub struct Tile<E> {
    storage: Arc<TileStorage<E>>,
    offset: usize,
    nrows: usize,
    ncols: usize,
    ld: usize,
    key: TileKey,
}

impl<E> Clone for Tile<E> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            offset: self.offset,
            nrows: self.nrows,
            ncols: self.ncols,
            ld: self.ld,
            key: self.key,
        }
    }
}

impl<E> Tile<E> {
    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Leading dimension of the tile in its backing storage.
    #[inline]
    pub fn ld(&self) -> usize {
        self.ld
    }

    /// Footprint key of the tile.
    #[inline]
    pub fn key(&self) -> TileKey {
        self.key
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut E {
        unsafe { self.storage.ptr.add(self.offset) }
    }

    /// Returns a view over the tile.
    ///
    /// # Safety
    ///
    /// The tile must not be written to while the view is alive. Inside a scheduled task, this
    /// holds when the tile is part of the task footprint.
    #[inline]
    pub unsafe fn as_ref(&self) -> TileRef<'_, E> {
        TileRef::from_raw_parts(self.as_ptr(), self.nrows, self.ncols, 1, self.ld as isize)
    }

    /// Returns a mutable view over the tile.
    ///
    /// # Safety
    ///
    /// The tile must not be accessed by anything else while the view is alive. Inside a
    /// scheduled task, this holds when the tile is declared as written in the task footprint.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut(&self) -> TileMut<'_, E> {
        TileMut::from_raw_parts(self.as_ptr(), self.nrows, self.ncols, 1, self.ld as isize)
    }
}

/// Tiled matrix descriptor.
pub struct TileDesc<E> {
    storage: Arc<TileStorage<E>>,
    kind: MatrixType,
    mb: usize,
    nb: usize,
    // owner shape
    gm: usize,
    gn: usize,
    // view
    i: usize,
    j: usize,
    m: usize,
    n: usize,
    mt: usize,
    nt: usize,
}

impl<E> Clone for TileDesc<E> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            kind: self.kind,
            mb: self.mb,
            nb: self.nb,
            gm: self.gm,
            gn: self.gn,
            i: self.i,
            j: self.j,
            m: self.m,
            n: self.n,
            mt: self.mt,
            nt: self.nt,
        }
    }
}

impl<E> core::fmt::Debug for TileDesc<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TileDesc")
            .field("kind", &self.kind)
            .field("mb", &self.mb)
            .field("nb", &self.nb)
            .field("i", &self.i)
            .field("j", &self.j)
            .field("m", &self.m)
            .field("n", &self.n)
            .field("mt", &self.mt)
            .field("nt", &self.nt)
            .finish()
    }
}

#[inline]
fn grid_len(offset: usize, len: usize, block: usize) -> usize {
    if len == 0 {
        0
    } else {
        (offset % block + len).msrv_div_ceil(block)
    }
}

impl<E: RealField> TileDesc<E> {
    /// Creates a zero initialized `m×n` descriptor with `mb×nb` tiles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalValue`] if a tile dimension is zero, and [`Error::OutOfMemory`]
    /// if the storage can't be allocated.
    pub fn new(kind: MatrixType, mb: usize, nb: usize, m: usize, n: usize) -> Result<Self> {
        if mb == 0 || nb == 0 {
            log::error!("illegal tile dimensions {mb}x{nb}");
            return Err(Error::IllegalValue);
        }
        let len = m.checked_mul(n).ok_or(Error::OutOfMemory)?;
        let storage = Arc::new(TileStorage::zeroed(len)?);
        Ok(Self {
            storage,
            kind,
            mb,
            nb,
            gm: m,
            gn: n,
            i: 0,
            j: 0,
            m,
            n,
            mt: grid_len(0, m, mb),
            nt: grid_len(0, n, nb),
        })
    }

    /// Creates a zero initialized general descriptor with `mb×nb` tiles.
    #[inline]
    pub fn general(mb: usize, nb: usize, m: usize, n: usize) -> Result<Self> {
        Self::new(MatrixType::General, mb, nb, m, n)
    }
}

impl<E> TileDesc<E> {
    #[inline]
    pub fn kind(&self) -> MatrixType {
        self.kind
    }

    /// Number of rows of a full tile.
    #[inline]
    pub fn mb(&self) -> usize {
        self.mb
    }

    /// Number of columns of a full tile.
    #[inline]
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Number of rows of the matrix.
    #[inline]
    pub fn m(&self) -> usize {
        self.m
    }

    /// Number of columns of the matrix.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of tile rows.
    #[inline]
    pub fn mt(&self) -> usize {
        self.mt
    }

    /// Number of tile columns.
    #[inline]
    pub fn nt(&self) -> usize {
        self.nt
    }

    /// Row offset of the view inside the backing matrix.
    #[inline]
    pub fn i(&self) -> usize {
        self.i
    }

    /// Column offset of the view inside the backing matrix.
    #[inline]
    pub fn j(&self) -> usize {
        self.j
    }

    #[inline]
    pub fn precision(&self) -> Precision
    where
        E: RealField,
    {
        E::PRECISION
    }

    /// Validates the descriptor.
    pub fn check(&self) -> Result<()> {
        let ok = self.mb > 0
            && self.nb > 0
            && self.i + self.m <= self.gm
            && self.j + self.n <= self.gn
            && self.m <= self.mt * self.mb
            && self.n <= self.nt * self.nb;
        if ok {
            Ok(())
        } else {
            log::error!("invalid descriptor {:?}", self);
            Err(Error::IllegalValue)
        }
    }

    /// Returns a view of the block starting at `(i, j)` with `m` rows and `n` columns, sharing
    /// the storage of `self`.
    pub fn submatrix(&self, i: usize, j: usize, m: usize, n: usize) -> Result<Self> {
        if i + m > self.m || j + n > self.n {
            log::error!(
                "submatrix ({i}, {j}) of size {m}x{n} is out of the bounds of a {}x{} matrix",
                self.m,
                self.n
            );
            return Err(Error::IllegalValue);
        }
        let i = self.i + i;
        let j = self.j + j;
        Ok(Self {
            storage: self.storage.clone(),
            kind: self.kind,
            mb: self.mb,
            nb: self.nb,
            gm: self.gm,
            gn: self.gn,
            i,
            j,
            m,
            n,
            mt: grid_len(i, m, self.mb),
            nt: grid_len(j, n, self.nb),
        })
    }

    #[inline]
    fn row_range(&self, k: usize) -> (usize, usize) {
        let first = self.i / self.mb + k;
        let start = Ord::max(self.i, first * self.mb);
        let end = Ord::min(self.i + self.m, (first + 1) * self.mb);
        (start, end)
    }

    #[inline]
    fn col_range(&self, l: usize) -> (usize, usize) {
        let first = self.j / self.nb + l;
        let start = Ord::max(self.j, first * self.nb);
        let end = Ord::min(self.j + self.n, (first + 1) * self.nb);
        (start, end)
    }

    /// Number of rows of tile row `k`.
    #[inline]
    #[track_caller]
    pub fn tile_rows(&self, k: usize) -> usize {
        equator::assert!(k < self.mt);
        let (start, end) = self.row_range(k);
        end - start
    }

    /// Number of columns of tile column `l`.
    #[inline]
    #[track_caller]
    pub fn tile_cols(&self, l: usize) -> usize {
        equator::assert!(l < self.nt);
        let (start, end) = self.col_range(l);
        end - start
    }

    /// Row of the view at which tile row `k` starts.
    #[inline]
    pub fn tile_row_offset(&self, k: usize) -> usize {
        self.row_range(k).0 - self.i
    }

    /// Column of the view at which tile column `l` starts.
    #[inline]
    pub fn tile_col_offset(&self, l: usize) -> usize {
        self.col_range(l).0 - self.j
    }

    /// Leading dimension of the tiles of tile row `k`.
    #[inline]
    pub fn leading_dimension(&self, k: usize) -> usize {
        let owner = self.i / self.mb + k;
        Ord::min(self.mb, self.gm - owner * self.mb)
    }

    /// Offset of the first element of tile `(k, l)` from the start of the backing storage.
    pub fn tile_offset(&self, k: usize, l: usize) -> usize {
        let tr = self.i / self.mb + k;
        let tc = self.j / self.nb + l;
        let owner_cols = Ord::min(self.nb, self.gn - tc * self.nb);
        let ld = self.leading_dimension(k);

        let (row_start, _) = self.row_range(k);
        let (col_start, _) = self.col_range(l);

        tc * self.nb * self.gm
            + tr * self.mb * owner_cols
            + (row_start - tr * self.mb)
            + (col_start - tc * self.nb) * ld
    }

    /// Pointer to the first element of tile `(k, l)`.
    #[inline]
    #[track_caller]
    pub fn tile_ptr(&self, k: usize, l: usize) -> *mut E {
        equator::assert!(all(k < self.mt, l < self.nt));
        unsafe { self.storage.ptr.add(self.tile_offset(k, l)) }
    }

    /// Footprint key of tile `(k, l)`, in the coordinates of the backing matrix.
    #[inline]
    pub fn tile_key(&self, k: usize, l: usize) -> TileKey {
        TileKey::new(
            Arc::as_ptr(&self.storage) as usize,
            self.i / self.mb + k,
            self.j / self.nb + l,
        )
    }

    /// Returns a handle to tile `(k, l)`.
    #[inline]
    #[track_caller]
    pub fn tile(&self, k: usize, l: usize) -> Tile<E> {
        equator::assert!(all(k < self.mt, l < self.nt));
        Tile {
            storage: self.storage.clone(),
            offset: self.tile_offset(k, l),
            nrows: self.tile_rows(k),
            ncols: self.tile_cols(l),
            ld: self.leading_dimension(k),
            key: self.tile_key(k, l),
        }
    }

    /// Returns `true` if both descriptors share the same backing storage.
    #[inline]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}
