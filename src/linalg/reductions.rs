//! Tiled reductions.

use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, ge2desc, FlatMut, FlatRef},
    linalg::{admit, check_flat_arg, illegal_argument, Grid},
    mat::{TileMut, TileRef},
    sched::{Access, Region},
    sequence::{Request, Sequence},
    Context, Direction,
};
use reborrow::*;

// values <- max(values, w), element-wise
fn merge_max<E: RealField>(mut values: TileMut<'_, E>, w: TileRef<'_, E>) {
    for j in 0..values.ncols() {
        let x = w.read(0, j);
        if x > values.read(0, j) {
            values.write(0, j, x);
        }
    }
}

/// Computes the largest absolute value of every column (or row) of `a` into `values`.
///
/// Each tile is reduced into `work`, then the partial results of every tile column (or row) are
/// merged into `values`:
/// - column-wise, `work` is an `a.mt()×n` matrix with `1×a.nb()` tiles and `values` a `1×n`
/// matrix with the same tiles,
/// - row-wise, `work` is an `m×a.nt()` matrix with `a.mb()×1` tiles and `values` an `m×1`
/// matrix with the same tiles.
pub fn amax_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    direction: Direction,
    a: &TileDesc<E>,
    work: &TileDesc<E>,
    values: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    // a row-wise reduction is the column-wise reduction of the transpose
    let transposed = direction == Direction::Rowwise;
    let a = Grid::new(a, transposed);
    let w = Grid::new(work, transposed);
    let v = Grid::new(values, transposed);

    let valid = a.desc().check().is_ok()
        && w.desc().check().is_ok()
        && v.desc().check().is_ok()
        && w.m() == a.mt()
        && w.n() == a.n()
        && w.row_tiling() == (1, 0)
        && w.col_tiling() == a.col_tiling()
        && v.m() == 1
        && v.n() == a.n()
        && v.row_tiling() == (1, 0)
        && v.col_tiling() == a.col_tiling();
    if !admit(sequence, request, valid, Error::IllegalValue, "amax: incompatible descriptors") {
        return;
    }
    if Ord::min(a.m(), a.n()) == 0 {
        return;
    }

    let kernels = ctx.kernels();
    for n in 0..a.nt() {
        for m in 0..a.mt() {
            let amn = a.tile(m, n);
            let wmn = w.tile(m, n);
            region.submit(
                "amax",
                &[Access::read(amn.key()), Access::write(wmn.key())],
                sequence,
                request,
                move || unsafe { kernels.amax(amn.view(), wmn.view_mut()) },
            );
        }

        let partials: Vec<_> = (0..a.mt()).map(|m| w.tile(m, n)).collect();
        let vn = v.tile(0, n);
        let mut footprint: Vec<_> = partials.iter().map(|w| Access::read(w.key())).collect();
        footprint.push(Access::write(vn.key()));
        region.submit("amax", &footprint, sequence, request, move || unsafe {
            let mut values = vn.view_mut();
            values.copy_from(partials[0].view());
            for w in &partials[1..] {
                merge_max(values.rb_mut(), w.view());
            }
            Ok(())
        });
    }
}

/// Computes the largest absolute value of every column (or row) of the `m×n` matrix `a`,
/// storing it in `values[j]` (or `values[i]`).
///
/// `values` is left untouched if `a` is empty.
///
/// # Errors
///
/// [`Error::IllegalArgument`] with the position of the first invalid argument, counting
/// `direction` as `1` and `values` as `6`.
pub fn amax<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    direction: Direction,
    m: usize,
    n: usize,
    a: &[E],
    lda: usize,
    values: &mut [E],
) -> Result<()> {
    check_flat_arg(a, m, n, lda, 4, 5)?;
    let len = match direction {
        Direction::Columnwise => n,
        Direction::Rowwise => m,
    };
    if values.len() < len {
        return Err(illegal_argument(6, "values"));
    }
    if Ord::min(m, n) == 0 {
        return Ok(());
    }

    let nb = ctx.nb();
    let a_desc = TileDesc::general(nb, nb, m, n)?;
    let (w_desc, v_desc) = match direction {
        Direction::Columnwise => (
            TileDesc::general(1, nb, a_desc.mt(), n)?,
            TileDesc::general(1, nb, 1, n)?,
        ),
        Direction::Rowwise => (
            TileDesc::general(nb, 1, m, a_desc.nt())?,
            TileDesc::general(nb, 1, m, 1)?,
        ),
    };
    let (vm, vn) = (v_desc.m(), v_desc.n());

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatRef::new(a, m, n, lda)?;
        let values = FlatMut::new(&mut values[..len], vm, vn, vm)?;
        ctx.region(|region| {
            ge2desc(region, a, &a_desc, &sequence, &request);
            amax_tile(
                ctx, region, direction, &a_desc, &w_desc, &v_desc, &sequence, &request,
            );
            desc2ge(region, &v_desc, &values, &sequence, &request);
        });
    }
    sequence.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{linalg::test_utils::*, Parallelism};

    fn ctx(parallelism: Parallelism) -> Context {
        Context::builder()
            .tile_size(3)
            .inner_block_size(3)
            .parallelism(parallelism)
            .build()
            .unwrap()
    }

    #[test]
    fn largest_magnitude_per_column_and_row() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            let ctx = ctx(parallelism);
            let (m, n, lda) = (10, 7, 12);
            let mut a = random(lda, n);
            // the largest magnitude of a row or column may be negative, or in the padding rows
            a[4 + 2 * lda] = -3.0;
            a[11 + 5 * lda] = 100.0;

            let mut cols = vec![f64::NAN; n];
            amax(&ctx, Direction::Columnwise, m, n, &a, lda, &mut cols).unwrap();
            for j in 0..n {
                let expected = (0..m).map(|i| a[i + j * lda].abs()).fold(0.0, f64::max);
                assert_eq!(cols[j], expected);
            }
            assert_eq!(cols[2], 3.0);

            let mut rows = vec![f64::NAN; m + 2];
            amax(&ctx, Direction::Rowwise, m, n, &a, lda, &mut rows).unwrap();
            for i in 0..m {
                let expected = (0..n).map(|j| a[i + j * lda].abs()).fold(0.0, f64::max);
                assert_eq!(rows[i], expected);
            }
            assert!(rows[m].is_nan() && rows[m + 1].is_nan());
        }
    }

    #[test]
    fn empty_matrix_leaves_values_untouched() {
        let ctx = ctx(Parallelism::None);
        let mut values = vec![7.0; 4];
        amax(&ctx, Direction::Columnwise, 4, 0, &[], 4, &mut values).unwrap();
        amax(&ctx, Direction::Rowwise, 0, 3, &[0.0; 2], 1, &mut values).unwrap();
        assert_eq!(values, [7.0; 4]);
    }

    #[test]
    fn argument_errors() {
        let ctx = ctx(Parallelism::None);
        let a = vec![0.0f64; 12];
        let mut values = vec![0.0; 3];
        assert_eq!(
            amax(&ctx, Direction::Columnwise, 4, 3, &a, 3, &mut values),
            Err(Error::IllegalArgument { index: 5 })
        );
        assert_eq!(
            amax(&ctx, Direction::Rowwise, 4, 3, &a, 4, &mut values),
            Err(Error::IllegalArgument { index: 6 })
        );
    }

    #[test]
    fn mismatched_work_is_rejected() {
        let ctx = ctx(Parallelism::None);
        let a = TileDesc::<f64>::general(3, 3, 7, 5).unwrap();
        // one row of partial results per tile row is needed
        let work = TileDesc::<f64>::general(1, 3, 2, 5).unwrap();
        let values = TileDesc::<f64>::general(1, 3, 1, 5).unwrap();
        let sequence = Sequence::new();
        let request = Request::new();
        ctx.region(|region| {
            amax_tile(
                &ctx,
                region,
                Direction::Columnwise,
                &a,
                &work,
                &values,
                &sequence,
                &request,
            );
            assert_eq!(region.submitted(), 0);
        });
        assert_eq!(sequence.status(), Err(Error::IllegalValue));
    }
}
