//! Householder tile kernels.
//!
//! Reflectors follow the LAPACK convention $H = I - \tau v v^\top$ with $v_0 = 1$. Reflectors are
//! grouped in blocks of at most `ib` columns; the block starting at reflector `i0` with `sb`
//! reflectors is represented by an `sb×sb` upper triangular factor $T$ such that
//! $$H_{i_0} \dots H_{i_0 + sb - 1} = I - V T V^\top.$$
//! The factor of that block is stored in `t[0..sb, i0..i0 + sb]`, so a tile with `n` reflectors
//! needs an `ib×n` factor tile.
//!
//! Besides the single tile factorization, two kinds of paired factorizations are provided. Both
//! annihilate a tile `A2` against the upper triangle of a pivot tile `A1`:
//! - triangle on top of square (TS): `A2` is a full tile,
//! - triangle on top of triangle (TT): `A2` is upper triangular. Only its upper triangle is read
//! and written, so its strictly lower part may hold unrelated data.
//!
//! The reflectors of a paired factorization have an implicit identity part in `A1` and their
//! essential part stored in `A2`.

use crate::{
    error::{Error, Result},
    field::RealField,
    kernel::blas::matmul,
    mat::{TileMut, TileRef},
    Trans,
};
use dyn_stack::{GlobalPodBuffer, PodStack, StackReq};
use reborrow::*;

pub(crate) fn workspace<E: RealField>(len: usize) -> Result<GlobalPodBuffer> {
    let req = StackReq::try_new::<E>(len).map_err(|_| Error::OutOfMemory)?;
    GlobalPodBuffer::try_new(req).map_err(|_| Error::OutOfMemory)
}

#[inline]
fn ensure(cond: bool) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::IllegalValue)
    }
}

/// Returns the euclidean norm of the elements of `x`.
pub fn norm_l2<E: RealField>(x: TileRef<'_, E>) -> E {
    let mut max = E::zero();
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            max = max.max(x.read(i, j).abs());
        }
    }
    if max == E::zero() || !max.is_finite() {
        return max;
    }
    let inv = max.recip();
    let mut sum = E::zero();
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            let v = x.read(i, j) * inv;
            sum = sum + v * v;
        }
    }
    sum.sqrt() * max
}

/// Computes the Householder reflection $I - \tau v v^\top$ such that when multiplied by $x$ from
/// the left, the result is $\beta e_0$. $\tau$ and $\beta$ are returned.
///
/// $x$ is determined by $x_0$, contained in `head`, and $|x_{1\dots}|$, contained in `tail_norm`.
/// The vector $v$ is such that $v_0 = 1$ and $v_{1\dots}$ is stored in `essential` (when provided),
/// overwriting $x_{1\dots}$.
#[inline]
pub fn make_householder_in_place<E: RealField>(
    essential: Option<TileMut<'_, E>>,
    head: E,
    tail_norm: E,
) -> (E, E) {
    if tail_norm == E::zero() {
        return (E::zero(), head);
    }

    let norm = head.hypot(tail_norm);
    let beta = if head >= E::zero() { -norm } else { norm };
    let tau = (beta - head) / beta;

    if let Some(mut essential) = essential {
        let scale = (head - beta).recip();
        for j in 0..essential.ncols() {
            for i in 0..essential.nrows() {
                essential.write(i, j, essential.read(i, j) * scale);
            }
        }
    }
    (tau, beta)
}

// w <- op(T) w, with `T` upper triangular
fn triangular_mul_in_place<E: RealField>(t: TileRef<'_, E>, transpose: bool, mut w: TileMut<'_, E>) {
    let sb = t.nrows();
    for c in 0..w.ncols() {
        if !transpose {
            for r in 0..sb {
                let mut acc = E::zero();
                for q in r..sb {
                    acc = acc + t.read(r, q) * w.read(q, c);
                }
                w.write(r, c, acc);
            }
        } else {
            for r in (0..sb).rev() {
                let mut acc = E::zero();
                for q in 0..=r {
                    acc = acc + t.read(q, r) * w.read(q, c);
                }
                w.write(r, c, acc);
            }
        }
    }
}

// views the first `nrows * ncols` elements of a workspace as a column-major matrix
#[inline]
fn workspace_view<E>(w: &mut [E], nrows: usize, ncols: usize) -> TileMut<'_, E> {
    TileMut::from_col_major_slice(&mut w[..nrows * ncols], nrows, ncols, Ord::max(1, nrows))
}

// fills column `jl` of the block factor, given z = V[:, ..jl]^T v_jl in w[..jl]
fn update_factor_column<E: RealField>(mut t: TileMut<'_, E>, jl: usize, tau: E, z: &[E]) {
    for q in 0..jl {
        let mut acc = E::zero();
        for p in q..jl {
            acc = acc + t.read(q, p) * z[p];
        }
        t.write(q, jl, -tau * acc);
    }
    t.write(jl, jl, tau);
}

/// Applies the block reflector $I - V T V^\top$, or its transpose, to `c` from the left.
///
/// `v` is unit lower trapezoidal, its strictly upper part and diagonal are not read.
pub fn apply_block_householder_on_the_left<E: RealField>(
    v: TileRef<'_, E>,
    t: TileRef<'_, E>,
    transpose: bool,
    c: TileMut<'_, E>,
    w: &mut [E],
) {
    let m = c.nrows();
    let nc = c.ncols();
    let sb = v.ncols();
    let v1 = v.submatrix(0, 0, sb, sb);
    let v2 = v.submatrix(sb, 0, m - sb, sb);
    let (mut c1, mut c2) = c.split_at_row(sb);
    let mut w = workspace_view(w, sb, nc);

    // w = v1^T c1 + v2^T c2
    for col in 0..nc {
        for r in 0..sb {
            let mut acc = c1.read(r, col);
            for i in r + 1..sb {
                acc = acc + v1.read(i, r) * c1.read(i, col);
            }
            w.write(r, col, acc);
        }
    }
    matmul(w.rb_mut(), v2.transpose(), c2.rb(), Some(E::one()), E::one());

    triangular_mul_in_place(t, transpose, w.rb_mut());

    // c1 -= v1 w, c2 -= v2 w
    matmul(c2.rb_mut(), v2, w.rb(), Some(E::one()), -E::one());
    for col in 0..nc {
        for i in 0..sb {
            let mut acc = w.read(i, col);
            for r in 0..i {
                acc = acc + v1.read(i, r) * w.read(r, col);
            }
            c1.write(i, col, c1.read(i, col) - acc);
        }
    }
}

#[inline]
fn block_starts(k: usize, ib: usize, reverse: bool) -> impl Iterator<Item = usize> {
    let starts = (0..k).step_by(ib);
    let mut starts: Vec<usize> = starts.collect();
    if reverse {
        starts.reverse();
    }
    starts.into_iter()
}

/// QR factorization of a single tile.
///
/// On exit, the upper triangle of `a` holds $R$, the strictly lower part holds the essential
/// parts of the reflectors, and `t` the block factors.
pub fn geqrt<E: RealField>(ib: usize, mut a: TileMut<'_, E>, mut t: TileMut<'_, E>) -> Result<()> {
    let m = a.nrows();
    let n = a.ncols();
    let k = Ord::min(m, n);
    ensure(ib > 0)?;
    ensure(t.nrows() >= Ord::min(ib, k) && t.ncols() >= k)?;
    if k == 0 {
        return Ok(());
    }

    let mut mem = workspace::<E>(ib * n)?;
    let (w, _) = PodStack::new(&mut mem).make_raw::<E>(ib * n);

    for i0 in (0..k).step_by(ib) {
        let sb = Ord::min(ib, k - i0);

        for j in i0..i0 + sb {
            let tail = m - j - 1;
            let tail_norm = norm_l2(a.rb().submatrix(j + 1, j, tail, 1));
            let head = a.read(j, j);
            let (tau, beta) = make_householder_in_place(
                Some(a.rb_mut().submatrix(j + 1, j, tail, 1)),
                head,
                tail_norm,
            );
            a.write(j, j, beta);

            for jj in j + 1..i0 + sb {
                let mut dot = a.read(j, jj);
                for i in j + 1..m {
                    dot = dot + a.read(i, j) * a.read(i, jj);
                }
                let dot = tau * dot;
                a.write(j, jj, a.read(j, jj) - dot);
                for i in j + 1..m {
                    a.write(i, jj, a.read(i, jj) - dot * a.read(i, j));
                }
            }

            let jl = j - i0;
            for q in 0..jl {
                let p = i0 + q;
                let mut dot = a.read(j, p);
                for i in j + 1..m {
                    dot = dot + a.read(i, p) * a.read(i, j);
                }
                w[q] = dot;
            }
            update_factor_column(t.rb_mut().submatrix(0, i0, sb, sb), jl, tau, &w[..jl]);
        }

        if i0 + sb < n {
            let (left, right) = a.rb_mut().split_at_col(i0 + sb);
            apply_block_householder_on_the_left(
                left.into_const().submatrix(i0, i0, m - i0, sb),
                t.rb().submatrix(0, i0, sb, sb),
                true,
                right.submatrix(i0, 0, m - i0, n - i0 - sb),
                w,
            );
        }
    }
    Ok(())
}

/// Applies $Q$ or $Q^\top$ from a [`geqrt`] factorization to `c` from the left.
pub fn unmqr<E: RealField>(
    trans: Trans,
    ib: usize,
    v: TileRef<'_, E>,
    t: TileRef<'_, E>,
    mut c: TileMut<'_, E>,
) -> Result<()> {
    let m = c.nrows();
    let nc = c.ncols();
    let k = Ord::min(v.nrows(), v.ncols());
    ensure(ib > 0 && v.nrows() == m)?;
    ensure(t.nrows() >= Ord::min(ib, k) && t.ncols() >= k)?;
    if k == 0 || nc == 0 {
        return Ok(());
    }

    let mut mem = workspace::<E>(ib * nc)?;
    let (w, _) = PodStack::new(&mut mem).make_raw::<E>(ib * nc);

    for i0 in block_starts(k, ib, !trans.is_trans()) {
        let sb = Ord::min(ib, k - i0);
        apply_block_householder_on_the_left(
            v.submatrix(i0, i0, m - i0, sb),
            t.submatrix(0, i0, sb, sb),
            trans.is_trans(),
            c.rb_mut().submatrix(i0, 0, m - i0, nc),
            w,
        );
    }
    Ok(())
}

/// Shape of the annihilated tile of a paired factorization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PairShape {
    /// Full tile.
    Square,
    /// Upper triangular tile.
    Triangle,
}

impl PairShape {
    // number of rows of the essential part of reflector `p` in a tile with `m2` rows
    #[inline]
    fn len(self, p: usize, m2: usize) -> usize {
        match self {
            PairShape::Square => m2,
            PairShape::Triangle => Ord::min(p + 1, m2),
        }
    }
}

fn apply_pair_block<E: RealField>(
    shape: PairShape,
    first: usize,
    v2: TileRef<'_, E>,
    t: TileRef<'_, E>,
    transpose: bool,
    mut c1: TileMut<'_, E>,
    mut c2: TileMut<'_, E>,
    w: &mut [E],
) {
    let m2 = c2.nrows();
    let nc = c2.ncols();
    let sb = v2.ncols();
    // rows shared by every reflector of the block, the rest is the triangular part of a TT pair
    let full = match shape {
        PairShape::Square => m2,
        PairShape::Triangle => Ord::min(first, m2),
    };
    let v2_full = v2.submatrix(0, 0, full, sb);
    let mut w = workspace_view(w, sb, nc);

    // w = c1 + v2^T c2
    w.copy_from(c1.rb());
    matmul(
        w.rb_mut(),
        v2_full.transpose(),
        c2.rb().submatrix(0, 0, full, nc),
        Some(E::one()),
        E::one(),
    );
    for col in 0..nc {
        for r in 0..sb {
            let mut acc = w.read(r, col);
            for i in full..shape.len(first + r, m2) {
                acc = acc + v2.read(i, r) * c2.read(i, col);
            }
            w.write(r, col, acc);
        }
    }

    triangular_mul_in_place(t, transpose, w.rb_mut());

    // c1 -= w, c2 -= v2 w
    for col in 0..nc {
        for r in 0..sb {
            c1.write(r, col, c1.read(r, col) - w.read(r, col));
        }
    }
    matmul(
        c2.rb_mut().submatrix(0, 0, full, nc),
        v2_full,
        w.rb(),
        Some(E::one()),
        -E::one(),
    );
    for col in 0..nc {
        for r in 0..sb {
            let wr = w.read(r, col);
            for i in full..shape.len(first + r, m2) {
                c2.write(i, col, c2.read(i, col) - v2.read(i, r) * wr);
            }
        }
    }
}

/// Paired QR factorization of `[a1; a2]`, where `a1` is upper triangular.
///
/// On exit, the upper triangle of `a1` holds $R$ and `a2` holds the essential parts of the
/// reflectors. Only the upper triangle of `a1` is accessed.
pub fn pair_qrt<E: RealField>(
    shape: PairShape,
    ib: usize,
    mut a1: TileMut<'_, E>,
    mut a2: TileMut<'_, E>,
    mut t: TileMut<'_, E>,
) -> Result<()> {
    let m2 = a2.nrows();
    let n = a2.ncols();
    ensure(ib > 0 && a1.ncols() == n && a1.nrows() >= n)?;
    ensure(t.nrows() >= Ord::min(ib, n) && t.ncols() >= n)?;
    if n == 0 {
        return Ok(());
    }

    let mut mem = workspace::<E>(ib * n)?;
    let (w, _) = PodStack::new(&mut mem).make_raw::<E>(ib * n);

    for i0 in (0..n).step_by(ib) {
        let sb = Ord::min(ib, n - i0);

        for j in i0..i0 + sb {
            let len = shape.len(j, m2);
            let tail_norm = norm_l2(a2.rb().submatrix(0, j, len, 1));
            let head = a1.read(j, j);
            let (tau, beta) = make_householder_in_place(
                Some(a2.rb_mut().submatrix(0, j, len, 1)),
                head,
                tail_norm,
            );
            a1.write(j, j, beta);

            for jj in j + 1..i0 + sb {
                let mut dot = a1.read(j, jj);
                for i in 0..len {
                    dot = dot + a2.read(i, j) * a2.read(i, jj);
                }
                let dot = tau * dot;
                a1.write(j, jj, a1.read(j, jj) - dot);
                for i in 0..len {
                    a2.write(i, jj, a2.read(i, jj) - dot * a2.read(i, j));
                }
            }

            let jl = j - i0;
            for q in 0..jl {
                let p = i0 + q;
                let mut dot = E::zero();
                for i in 0..Ord::min(shape.len(p, m2), len) {
                    dot = dot + a2.read(i, p) * a2.read(i, j);
                }
                w[q] = dot;
            }
            update_factor_column(t.rb_mut().submatrix(0, i0, sb, sb), jl, tau, &w[..jl]);
        }

        if i0 + sb < n {
            let (left, right) = a2.rb_mut().split_at_col(i0 + sb);
            apply_pair_block(
                shape,
                i0,
                left.into_const().submatrix(0, i0, m2, sb),
                t.rb().submatrix(0, i0, sb, sb),
                true,
                a1.rb_mut().submatrix(i0, i0 + sb, sb, n - i0 - sb),
                right,
                w,
            );
        }
    }
    Ok(())
}

/// Applies $Q$ or $Q^\top$ from a [`pair_qrt`] factorization to `[a1; a2]` from the left.
///
/// Only the first `v.ncols()` rows of `a1` are accessed.
pub fn pair_mqr<E: RealField>(
    shape: PairShape,
    trans: Trans,
    ib: usize,
    mut a1: TileMut<'_, E>,
    mut a2: TileMut<'_, E>,
    v: TileRef<'_, E>,
    t: TileRef<'_, E>,
) -> Result<()> {
    let m2 = a2.nrows();
    let nc = a2.ncols();
    let k = v.ncols();
    ensure(ib > 0 && v.nrows() == m2 && a1.ncols() == nc && a1.nrows() >= k)?;
    ensure(t.nrows() >= Ord::min(ib, k) && t.ncols() >= k)?;
    if k == 0 || nc == 0 {
        return Ok(());
    }

    let mut mem = workspace::<E>(ib * nc)?;
    let (w, _) = PodStack::new(&mut mem).make_raw::<E>(ib * nc);

    for i0 in block_starts(k, ib, !trans.is_trans()) {
        let sb = Ord::min(ib, k - i0);
        apply_pair_block(
            shape,
            i0,
            v.submatrix(0, i0, m2, sb),
            t.submatrix(0, i0, sb, sb),
            trans.is_trans(),
            a1.rb_mut().submatrix(i0, 0, sb, nc),
            a2.rb_mut(),
            w,
        );
    }
    Ok(())
}
