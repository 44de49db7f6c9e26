//! Conversions between column-major matrices and tiled descriptors.
//!
//! Conversions are ordinary tasks: one task per tile, submitted to a [`Region`] under a
//! [`Sequence`], so that an algorithm submitted in the same region starts on a tile as soon as
//! that tile has been converted.
//!
//! The footprint of a flat matrix is expressed in the tiling of the descriptor it is converted
//! to or from. Conversions of the same flat matrix within one region must use descriptors with
//! the same tiling.

use crate::{
    desc::{MatrixType, TileDesc, TileKey},
    error::{Error, Result},
    field::RealField,
    kernel::blas::lacpy,
    mat::TileMut,
    sched::{Access, Region},
    sequence::{Request, Sequence},
    utils::Ptr,
    Uplo,
};
use core::marker::PhantomData;
use reborrow::*;

fn check_flat(len: usize, nrows: usize, ncols: usize, ld: usize) -> Result<()> {
    let ok = ld >= Ord::max(1, nrows) && (ncols == 0 || len >= ld * (ncols - 1) + nrows);
    if ok {
        Ok(())
    } else {
        log::error!("illegal {nrows}x{ncols} matrix with leading dimension {ld} in a slice of length {len}");
        Err(Error::IllegalValue)
    }
}

/// Column-major matrix in a caller-owned slice.
pub struct FlatRef<'a, E> {
    ptr: Ptr<E>,
    nrows: usize,
    ncols: usize,
    ld: usize,
    __marker: PhantomData<&'a [E]>,
}

impl<E> Copy for FlatRef<'_, E> {}
impl<E> Clone for FlatRef<'_, E> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

/// Mutable column-major matrix in a caller-owned slice.
pub struct FlatMut<'a, E> {
    ptr: Ptr<E>,
    nrows: usize,
    ncols: usize,
    ld: usize,
    __marker: PhantomData<&'a mut [E]>,
}

impl<'a, E> FlatRef<'a, E> {
    /// Wraps the `nrows×ncols` matrix stored in `data` with leading dimension `ld`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalValue`] if `ld < max(1, nrows)` or `data` is too short.
    pub fn new(data: &'a [E], nrows: usize, ncols: usize, ld: usize) -> Result<Self> {
        check_flat(data.len(), nrows, ncols, ld)?;
        Ok(Self {
            ptr: Ptr(data.as_ptr() as *mut E),
            nrows,
            ncols,
            ld,
            __marker: PhantomData,
        })
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn ld(&self) -> usize {
        self.ld
    }
}

impl<'a, E> FlatMut<'a, E> {
    /// Wraps the `nrows×ncols` matrix stored in `data` with leading dimension `ld`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalValue`] if `ld < max(1, nrows)` or `data` is too short.
    pub fn new(data: &'a mut [E], nrows: usize, ncols: usize, ld: usize) -> Result<Self> {
        check_flat(data.len(), nrows, ncols, ld)?;
        Ok(Self {
            ptr: Ptr(data.as_mut_ptr()),
            nrows,
            ncols,
            ld,
            __marker: PhantomData,
        })
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn ld(&self) -> usize {
        self.ld
    }

    /// Returns a read-only view of `self`.
    #[inline]
    pub fn as_ref(&self) -> FlatRef<'_, E> {
        FlatRef {
            ptr: self.ptr,
            nrows: self.nrows,
            ncols: self.ncols,
            ld: self.ld,
            __marker: PhantomData,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Direction {
    ToTiles,
    ToFlat,
}

fn convert<'scope, E: RealField>(
    region: &Region<'_, 'scope>,
    direction: Direction,
    uplo: Option<Uplo>,
    flat: Ptr<E>,
    ld: usize,
    desc: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let name = match (direction, uplo) {
        (Direction::ToTiles, None) => "ge2desc",
        (Direction::ToFlat, None) => "desc2ge",
        (Direction::ToTiles, Some(_)) => "tr2desc",
        (Direction::ToFlat, Some(_)) => "desc2tr",
    };
    let base = flat.ptr() as usize;

    for l in 0..desc.nt() {
        for k in 0..desc.mt() {
            let kind = match uplo {
                None => MatrixType::General,
                Some(Uplo::Upper) if k < l => MatrixType::General,
                Some(Uplo::Upper) if k == l => MatrixType::Upper,
                Some(Uplo::Lower) if k > l => MatrixType::General,
                Some(Uplo::Lower) if k == l => MatrixType::Lower,
                Some(_) => continue,
            };

            let tile = desc.tile(k, l);
            let offset = desc.tile_row_offset(k) + desc.tile_col_offset(l) * ld;
            let flat_key = TileKey::new(base, k, l);
            let footprint = match direction {
                Direction::ToTiles => [Access::read(flat_key), Access::write(tile.key())],
                Direction::ToFlat => [Access::read(tile.key()), Access::write(flat_key)],
            };

            region.submit(name, &footprint, sequence, request, move || {
                let mut flat = unsafe {
                    TileMut::from_raw_parts(
                        flat.ptr().add(offset),
                        tile.nrows(),
                        tile.ncols(),
                        1,
                        ld as isize,
                    )
                };
                match direction {
                    Direction::ToTiles => lacpy(kind, flat.rb(), unsafe { tile.as_mut() }),
                    Direction::ToFlat => lacpy(kind, unsafe { tile.as_ref() }, flat.rb_mut()),
                }
                Ok(())
            });
        }
    }
}

fn check_shape<E>(
    nrows: usize,
    ncols: usize,
    desc: &TileDesc<E>,
    sequence: &Sequence,
    request: &Request,
) -> bool {
    if sequence.check(request).is_err() {
        return false;
    }
    if desc.check().is_err() || nrows != desc.m() || ncols != desc.n() {
        log::error!(
            "{nrows}x{ncols} matrix does not match a {}x{} descriptor",
            desc.m(),
            desc.n()
        );
        sequence.fail(request, Error::IllegalValue);
        return false;
    }
    true
}

/// Copies `src` into the tiles of `dst`.
pub fn ge2desc<'scope, E: RealField>(
    region: &Region<'_, 'scope>,
    src: FlatRef<'scope, E>,
    dst: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if check_shape(src.nrows, src.ncols, dst, sequence, request) {
        convert(region, Direction::ToTiles, None, src.ptr, src.ld, dst, sequence, request);
    }
}

/// Copies the tiles of `src` into `dst`.
pub fn desc2ge<'scope, E: RealField>(
    region: &Region<'_, 'scope>,
    src: &TileDesc<E>,
    dst: &'scope FlatMut<'scope, E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if check_shape(dst.nrows, dst.ncols, src, sequence, request) {
        convert(region, Direction::ToFlat, None, dst.ptr, dst.ld, src, sequence, request);
    }
}

/// Copies the `uplo` triangle of `src` into the tiles of `dst`.
///
/// Tiles strictly outside of the triangle are not touched, and neither is the opposite part of
/// the diagonal tiles.
pub fn tr2desc<'scope, E: RealField>(
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    src: FlatRef<'scope, E>,
    dst: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if check_shape(src.nrows, src.ncols, dst, sequence, request) {
        convert(region, Direction::ToTiles, Some(uplo), src.ptr, src.ld, dst, sequence, request);
    }
}

/// Copies the `uplo` triangle of the tiles of `src` into `dst`.
pub fn desc2tr<'scope, E: RealField>(
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    src: &TileDesc<E>,
    dst: &'scope FlatMut<'scope, E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if check_shape(dst.nrows, dst.ncols, src, sequence, request) {
        convert(region, Direction::ToFlat, Some(uplo), dst.ptr, dst.ld, src, sequence, request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, Parallelism};

    #[test]
    fn round_trip_is_bit_identical() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            let ctx = Context::builder().parallelism(parallelism).build().unwrap();
            for (m, n, lda, mb, nb) in [(7, 5, 9, 3, 2), (4, 4, 4, 4, 4), (1, 9, 3, 2, 4), (10, 3, 10, 4, 4)] {
                let src: Vec<f64> = (0..lda * n).map(|_| rand::random::<f64>()).collect();
                let mut dst = vec![f64::NAN; lda * n];
                let desc = TileDesc::<f64>::general(mb, nb, m, n).unwrap();
                let seq = Sequence::new();
                let req = Request::new();
                {
                    let src = FlatRef::new(&src, m, n, lda).unwrap();
                    let dst = FlatMut::new(&mut dst, m, n, lda).unwrap();
                    ctx.region(|region| {
                        ge2desc(region, src, &desc, &seq, &req);
                        desc2ge(region, &desc, &dst, &seq, &req);
                    });
                }
                seq.status().unwrap();

                for j in 0..n {
                    for i in 0..lda {
                        let (x, y) = (dst[i + j * lda], src[i + j * lda]);
                        if i < m {
                            assert_eq!(x.to_bits(), y.to_bits());
                        } else {
                            assert!(x.is_nan());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn triangle_conversion_skips_the_other_triangle() {
        let ctx = Context::builder().parallelism(Parallelism::None).build().unwrap();
        let n = 7;
        let src: Vec<f64> = (0..n * n).map(|x| x as f64 + 1.0).collect();
        let mut dst = vec![-1.0; n * n];
        let desc = TileDesc::<f64>::new(MatrixType::Lower, 3, 3, n, n).unwrap();
        let seq = Sequence::new();
        let req = Request::new();
        {
            let src = FlatRef::new(&src, n, n, n).unwrap();
            let dst_flat = FlatMut::new(&mut dst, n, n, n).unwrap();
            ctx.region(|region| {
                tr2desc(region, Uplo::Lower, src, &desc, &seq, &req);
                desc2ge(region, &desc, &dst_flat, &seq, &req);
            });
        }
        seq.status().unwrap();
        for j in 0..n {
            for i in 0..n {
                let expected = if i >= j { src[i + j * n] } else { 0.0 };
                assert_eq!(dst[i + j * n], expected);
            }
        }
    }

    #[test]
    fn mismatched_shapes_fail_the_request() {
        let ctx = Context::builder().parallelism(Parallelism::None).build().unwrap();
        let data = vec![0.0f64; 16];
        let desc = TileDesc::<f64>::general(2, 2, 4, 3).unwrap();
        let seq = Sequence::new();
        let req = Request::new();
        ctx.region(|region| {
            ge2desc(region, FlatRef::new(&data, 4, 4, 4).unwrap(), &desc, &seq, &req);
        });
        assert_eq!(seq.status(), Err(Error::IllegalValue));
        assert_eq!(req.status(), Err(Error::IllegalValue));

        assert_eq!(FlatRef::new(&data, 4, 4, 3).err(), Some(Error::IllegalValue));
        assert_eq!(FlatRef::new(&data, 4, 5, 4).err(), Some(Error::IllegalValue));
    }
}
