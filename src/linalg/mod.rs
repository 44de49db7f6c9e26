//! Tiled algorithms.
//!
//! Every algorithm comes in two flavors:
//! - a non-blocking tile-level function (`*_tile`, or `*_tree` for the orthogonal factorizations
//! driven by an explicit [`TreePlan`]) that takes descriptors, a scheduling [`Region`], a
//! [`Sequence`] and a [`Request`]. It checks the sequence, validates its arguments (failing the
//! request on error), submits its tasks and returns immediately.
//! - a blocking driver on column-major slices. It validates its arguments, returning
//! [`Error::IllegalArgument`] without doing any work on failure, converts the slices to tiles,
//! runs the algorithm in its own region, converts the results back and returns the status of
//! its sequence.
//!
//! Argument positions reported by the drivers are 1-based and do not count the context.
//!
//! [`Region`]: crate::sched::Region
//! [`Sequence`]: crate::Sequence
//! [`Request`]: crate::Request

use crate::{
    desc::{Tile, TileDesc},
    error::{Error, Result},
    field::RealField,
    mat::{TileMut, TileRef},
    sequence::{Request, Sequence},
    tree::TreePlan,
    Context,
};

pub mod cholesky;
pub mod lq;
pub mod mat_ops;
pub mod matmul;
pub mod qr;
pub mod reductions;
pub mod triangular_inverse;
pub mod triangular_solve;

/// Orthogonal factor of a tiled QR or LQ factorization, complementing the reflectors stored in
/// the factorized matrix.
///
/// Holds the block factors of every elimination, together with the reduction tree plan that
/// produced them. The blocking of the factorization is recorded by the factor tiles: their
/// height is the inner block size and their width the tile size of the factorized matrix.
#[derive(Clone, Debug)]
pub struct HouseholderFactor<E> {
    t: TileDesc<E>,
    plan: TreePlan,
    nrows: usize,
    ncols: usize,
}

impl<E: RealField> HouseholderFactor<E> {
    fn new(t: TileDesc<E>, plan: TreePlan, a: &TileDesc<E>) -> Self {
        Self {
            t,
            plan,
            nrows: a.m(),
            ncols: a.n(),
        }
    }

    fn alloc_t<K>(ctx: &Context<K>, a: &TileDesc<E>) -> Result<TileDesc<E>> {
        // first half of the tile columns for the factorizations, second half for eliminations
        TileDesc::general(
            ctx.ib(),
            a.nb(),
            a.mt() * ctx.ib(),
            2 * a.nt() * a.nb(),
        )
    }

    /// Allocates the factor of a QR factorization of `a`.
    pub fn qr<K>(ctx: &Context<K>, a: &TileDesc<E>) -> Result<Self> {
        let t = Self::alloc_t(ctx, a)?;
        let plan = ctx.tree().plan(a.mt(), a.nt());
        Ok(Self::new(t, plan, a))
    }

    /// Allocates the factor of an LQ factorization of `a`.
    pub fn lq<K>(ctx: &Context<K>, a: &TileDesc<E>) -> Result<Self> {
        let t = Self::alloc_t(ctx, a)?;
        let plan = ctx.tree().plan(a.nt(), a.mt());
        Ok(Self::new(t, plan, a))
    }
}

impl<E> HouseholderFactor<E> {
    /// Block factors of the eliminations.
    #[inline]
    pub fn t(&self) -> &TileDesc<E> {
        &self.t
    }

    /// Reduction tree plan of the factorization.
    #[inline]
    pub fn plan(&self) -> &TreePlan {
        &self.plan
    }

    /// Shape of the factorized matrix.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Inner block size of the factorization, i.e. the tile height of [`t`](Self::t).
    ///
    /// The factor is always applied with this blocking, whatever the inner block size of the
    /// context used to apply it.
    #[inline]
    pub fn ib(&self) -> usize {
        self.t.mb()
    }

    /// Tile size of the factorized matrix.
    ///
    /// The drivers tile their operands with this size, whatever the tile size of the context
    /// used to apply the factor.
    #[inline]
    pub fn nb(&self) -> usize {
        self.t.nb()
    }
}

pub(crate) fn illegal_argument(index: usize, name: &str) -> Error {
    log::error!("argument {index} ({name}) had an illegal value");
    Error::IllegalArgument { index }
}

/// Checks a column-major argument `data` of shape `m×n` with leading dimension `ld`, reporting
/// the leading dimension or the slice itself as the offending argument.
pub(crate) fn check_flat_arg<E>(
    data: &[E],
    m: usize,
    n: usize,
    ld: usize,
    data_index: usize,
    ld_index: usize,
) -> Result<()> {
    if ld < Ord::max(1, m) {
        return Err(illegal_argument(ld_index, "leading dimension"));
    }
    if n > 0 && data.len() < ld * (n - 1) + m {
        return Err(illegal_argument(data_index, "matrix storage"));
    }
    Ok(())
}

/// Common prologue of the tile-level functions.
///
/// Returns `false` if nothing should be submitted, after failing `request` with
/// [`Error::SequenceAborted`] if the sequence is poisoned, or with `error` if `valid` is false.
pub(crate) fn admit(
    sequence: &Sequence,
    request: &Request,
    valid: bool,
    error: Error,
    what: &str,
) -> bool {
    if sequence.check(request).is_err() {
        return false;
    }
    if !valid {
        log::error!("{what}");
        sequence.fail(request, error);
        return false;
    }
    true
}

/// Tile grid of a descriptor, possibly transposed.
///
/// Tile `(k, l)` of a transposed grid is the transpose of tile `(l, k)` of the descriptor.
pub(crate) struct Grid<'a, E> {
    desc: &'a TileDesc<E>,
    transposed: bool,
}

impl<'a, E> Grid<'a, E> {
    #[inline]
    pub(crate) fn new(desc: &'a TileDesc<E>, transposed: bool) -> Self {
        Self { desc, transposed }
    }

    #[inline]
    pub(crate) fn desc(&self) -> &'a TileDesc<E> {
        self.desc
    }

    #[inline]
    pub(crate) fn mt(&self) -> usize {
        if self.transposed {
            self.desc.nt()
        } else {
            self.desc.mt()
        }
    }

    #[inline]
    pub(crate) fn nt(&self) -> usize {
        if self.transposed {
            self.desc.mt()
        } else {
            self.desc.nt()
        }
    }

    #[inline]
    pub(crate) fn m(&self) -> usize {
        if self.transposed {
            self.desc.n()
        } else {
            self.desc.m()
        }
    }

    #[inline]
    pub(crate) fn n(&self) -> usize {
        if self.transposed {
            self.desc.m()
        } else {
            self.desc.n()
        }
    }

    /// Tile height, and offset of the view within its first tile row.
    #[inline]
    pub(crate) fn row_tiling(&self) -> (usize, usize) {
        if self.transposed {
            (self.desc.nb(), self.desc.j() % self.desc.nb())
        } else {
            (self.desc.mb(), self.desc.i() % self.desc.mb())
        }
    }

    /// Tile width, and offset of the view within its first tile column.
    #[inline]
    pub(crate) fn col_tiling(&self) -> (usize, usize) {
        if self.transposed {
            (self.desc.mb(), self.desc.i() % self.desc.mb())
        } else {
            (self.desc.nb(), self.desc.j() % self.desc.nb())
        }
    }

    #[inline]
    pub(crate) fn tile(&self, k: usize, l: usize) -> GridTile<E> {
        let tile = if self.transposed {
            self.desc.tile(l, k)
        } else {
            self.desc.tile(k, l)
        };
        GridTile {
            tile,
            transposed: self.transposed,
        }
    }
}

pub(crate) struct GridTile<E> {
    tile: Tile<E>,
    transposed: bool,
}

impl<E> GridTile<E> {
    #[inline]
    pub(crate) fn key(&self) -> crate::desc::TileKey {
        self.tile.key()
    }

    /// # Safety
    ///
    /// See [`Tile::as_ref`].
    #[inline]
    pub(crate) unsafe fn view(&self) -> TileRef<'_, E> {
        let view = self.tile.as_ref();
        if self.transposed {
            view.transpose()
        } else {
            view
        }
    }

    /// # Safety
    ///
    /// See [`Tile::as_mut`].
    #[inline]
    pub(crate) unsafe fn view_mut(&self) -> TileMut<'_, E> {
        let view = self.tile.as_mut();
        if self.transposed {
            view.transpose()
        } else {
            view
        }
    }
}
