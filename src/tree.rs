//! Hierarchical reduction trees for tiled orthogonal factorizations.
//!
//! The tiles of a panel are eliminated in two stages. The panel is first cut into domains of
//! `domain_size` consecutive tiles. Each domain head is factorized (GE), and the other tiles of
//! the domain are annihilated against it with triangle on top of square eliminations (TS). The
//! domain heads are then merged pairwise in a binary tree with triangle on top of triangle
//! eliminations (TT), until only the first tile of the panel is left.
//!
//! TS eliminations inside a domain are sequential on the head tile, but different domains proceed
//! concurrently, and the TT tree has logarithmic depth. Larger domains favor the more efficient
//! TS kernels, smaller domains favor parallelism on tall panels.
//!
//! The same plan drives the factorization and every application of its orthogonal factor.
//!
//! For a QR factorization, panel `j` is the `j`-th tile column and the eliminated tiles are its
//! rows `j..mt`. For an LQ factorization, the plan is built on the transposed grid.

use crate::{
    error::{Error, Result},
    utils::DivCeil,
    Side, Trans,
};

/// One elimination of a reduction tree.
///
/// `j` is the panel, `k` the tile row acted on and `kpiv` the row of the pivot tile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TreeOp {
    /// Factorization of tile `k` of panel `j`.
    Ge { j: usize, k: usize },
    /// Elimination of the triangular tile `k` against the triangular pivot `kpiv`.
    Tt { j: usize, k: usize, kpiv: usize },
    /// Elimination of the full tile `k` against the triangular pivot `kpiv`.
    Ts { j: usize, k: usize, kpiv: usize },
}

impl TreeOp {
    #[inline]
    pub fn panel(&self) -> usize {
        match *self {
            TreeOp::Ge { j, .. } | TreeOp::Tt { j, .. } | TreeOp::Ts { j, .. } => j,
        }
    }

    #[inline]
    pub fn row(&self) -> usize {
        match *self {
            TreeOp::Ge { k, .. } | TreeOp::Tt { k, .. } | TreeOp::Ts { k, .. } => k,
        }
    }

    #[inline]
    pub fn pivot(&self) -> Option<usize> {
        match *self {
            TreeOp::Ge { .. } => None,
            TreeOp::Tt { kpiv, .. } | TreeOp::Ts { kpiv, .. } => Some(kpiv),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            TreeOp::Ge { .. } => "ge",
            TreeOp::Tt { .. } => "tt",
            TreeOp::Ts { .. } => "ts",
        }
    }
}

/// Ordered list of eliminations of a tile grid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreePlan {
    ops: Vec<TreeOp>,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum RowState {
    Untouched,
    Factored,
    Eliminated,
}

impl TreePlan {
    /// Creates a plan from an explicit list of eliminations.
    #[inline]
    pub fn from_ops(ops: Vec<TreeOp>) -> Self {
        Self { ops }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[inline]
    pub fn ops(&self) -> &[TreeOp] {
        &self.ops
    }

    /// Iterates over the eliminations, in reverse order if `reverse` is `true`.
    pub fn replay(&self, reverse: bool) -> impl Iterator<Item = &TreeOp> + '_ {
        let (fwd, rev) = if reverse {
            (None, Some(self.ops.iter().rev()))
        } else {
            (Some(self.ops.iter()), None)
        };
        fwd.into_iter().flatten().chain(rev.into_iter().flatten())
    }

    /// Checks that the plan is a complete elimination of an `mt×nt` grid.
    ///
    /// Every operation must be inside the grid, a tile is factorized before it is used as a
    /// pivot or eliminated against one, a tile is eliminated at most once, and each panel ends
    /// up reduced to its diagonal tile.
    pub fn validate(&self, mt: usize, nt: usize) -> Result<()> {
        let panels = Ord::min(mt, nt);
        let mut state = vec![RowState::Untouched; panels * mt];

        for (idx, op) in self.ops.iter().enumerate() {
            let j = op.panel();
            let k = op.row();
            let fail = |reason: &str| {
                log::error!("illegal tree operation #{idx} {op:?}: {reason}");
                Err(Error::IllegalKernel)
            };

            if j >= panels || k < j || k >= mt {
                return fail("outside of the tile grid");
            }
            let panel = &mut state[j * mt..(j + 1) * mt];

            match *op {
                TreeOp::Ge { .. } => {
                    if panel[k] != RowState::Untouched {
                        return fail("tile factorized twice");
                    }
                    panel[k] = RowState::Factored;
                }
                TreeOp::Tt { kpiv, .. } | TreeOp::Ts { kpiv, .. } => {
                    if kpiv < j || kpiv >= mt || kpiv == k {
                        return fail("pivot outside of the panel");
                    }
                    if panel[kpiv] != RowState::Factored {
                        return fail("pivot is not a factorized tile");
                    }
                    let expected = if matches!(op, TreeOp::Tt { .. }) {
                        RowState::Factored
                    } else {
                        RowState::Untouched
                    };
                    if panel[k] != expected {
                        return fail("tile is not in a state it can be eliminated from");
                    }
                    panel[k] = RowState::Eliminated;
                }
            }
        }

        for j in 0..panels {
            let panel = &state[j * mt..(j + 1) * mt];
            let complete = panel[j] == RowState::Factored
                && panel[j + 1..].iter().all(|s| *s == RowState::Eliminated);
            if !complete {
                log::error!("panel {j} is not fully eliminated");
                return Err(Error::IllegalKernel);
            }
        }
        Ok(())
    }
}

/// Builds [`TreePlan`]s.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReductionTree {
    domain_size: usize,
}

impl Default for ReductionTree {
    #[inline]
    fn default() -> Self {
        Self { domain_size: 4 }
    }
}

impl ReductionTree {
    /// Creates a tree with domains of `domain_size` tiles.
    pub fn new(domain_size: usize) -> Result<Self> {
        if domain_size == 0 {
            log::error!("reduction tree domain size must be positive");
            return Err(Error::IllegalValue);
        }
        Ok(Self { domain_size })
    }

    #[inline]
    pub fn domain_size(&self) -> usize {
        self.domain_size
    }

    /// Returns the eliminations of an `mt×nt` tile grid, panel after panel.
    ///
    /// Inside a panel, all factorizations come first, then the eliminations within domains, then
    /// the merges of the domain heads, one tree level after the other.
    pub fn plan(&self, mt: usize, nt: usize) -> TreePlan {
        let d = self.domain_size;
        let panels = Ord::min(mt, nt);
        let mut ops = Vec::new();

        for j in 0..panels {
            let rows = mt - j;
            let domains = rows.msrv_div_ceil(d);

            for p in 0..domains {
                ops.push(TreeOp::Ge { j, k: j + p * d });
            }
            for p in 0..domains {
                let head = j + p * d;
                for k in head + 1..Ord::min(head + d, mt) {
                    ops.push(TreeOp::Ts { j, k, kpiv: head });
                }
            }
            let mut stride = d;
            while stride < rows {
                let mut head = j;
                while head + stride < mt {
                    ops.push(TreeOp::Tt {
                        j,
                        k: head + stride,
                        kpiv: head,
                    });
                    head += 2 * stride;
                }
                stride *= 2;
            }
        }

        log::debug!(
            "reduction tree for a {mt}x{nt} grid (domain size {d}): {} operations",
            ops.len()
        );
        TreePlan { ops }
    }
}

/// Returns `true` if applying the orthogonal factor of a QR factorization replays its plan in
/// reverse.
///
/// $Q = Q_1 Q_2 \dots Q_N$, so $QC$ and $CQ^\top$ apply the last elimination first, while
/// $Q^\top C$ and $CQ$ apply the first elimination first.
#[inline]
pub fn qr_replays_in_reverse(side: Side, trans: Trans) -> bool {
    match side {
        Side::Left => !trans.is_trans(),
        Side::Right => trans.is_trans(),
    }
}

/// Returns `true` if applying the orthogonal factor of an LQ factorization replays its plan in
/// reverse. This is the mirror of [`qr_replays_in_reverse`], since $Q = Q_N \dots Q_1$.
#[inline]
pub fn lq_replays_in_reverse(side: Side, trans: Trans) -> bool {
    !qr_replays_in_reverse(side, trans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(op: &TreeOp) -> usize {
        match op {
            TreeOp::Ge { .. } => 0,
            TreeOp::Ts { .. } => 1,
            TreeOp::Tt { .. } => 2,
        }
    }

    #[test]
    fn every_grid_is_covered() {
        for d in 1..=5 {
            let tree = ReductionTree::new(d).unwrap();
            for mt in 1..=9 {
                for nt in 1..=9 {
                    let plan = tree.plan(mt, nt);
                    plan.validate(mt, nt).unwrap();

                    for j in 0..Ord::min(mt, nt) {
                        let panel: Vec<_> = plan.ops().iter().filter(|op| op.panel() == j).collect();
                        let rows = mt - j;
                        let heads = rows.msrv_div_ceil(d);
                        let count = |l| panel.iter().filter(|op| level(op) == l).count();
                        assert_eq!(count(0), heads);
                        assert_eq!(count(1), rows - heads);
                        assert_eq!(count(2), heads - 1);

                        // levels never decrease inside a panel
                        assert!(panel.windows(2).all(|w| level(w[0]) <= level(w[1])));
                    }
                }
            }
        }
    }

    #[test]
    fn tall_single_panel_flattens_into_one_domain() {
        let plan = ReductionTree::default().plan(4, 1);
        assert_eq!(
            plan.ops(),
            [
                TreeOp::Ge { j: 0, k: 0 },
                TreeOp::Ts { j: 0, k: 1, kpiv: 0 },
                TreeOp::Ts { j: 0, k: 2, kpiv: 0 },
                TreeOp::Ts { j: 0, k: 3, kpiv: 0 },
            ]
        );
        assert!(qr_replays_in_reverse(Side::Left, Trans::NoTrans));
        assert!(!qr_replays_in_reverse(Side::Left, Trans::ConjTrans));

        let forward: Vec<_> = plan.replay(false).copied().collect();
        let mut backward: Vec<_> = plan.replay(true).copied().collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward[0], TreeOp::Ge { j: 0, k: 0 });
    }

    #[test]
    fn right_side_directions_are_exact_reverses() {
        let plan = ReductionTree::default().plan(2, 2);
        let order = |trans| -> Vec<TreeOp> {
            plan.replay(qr_replays_in_reverse(Side::Right, trans))
                .copied()
                .collect()
        };
        let no_trans = order(Trans::NoTrans);
        let mut conj_trans = order(Trans::ConjTrans);
        assert_eq!(no_trans, plan.ops());
        conj_trans.reverse();
        assert_eq!(no_trans, conj_trans);

        // lq mirrors qr
        for side in [Side::Left, Side::Right] {
            for trans in [Trans::NoTrans, Trans::ConjTrans] {
                assert_ne!(
                    qr_replays_in_reverse(side, trans),
                    lq_replays_in_reverse(side, trans)
                );
            }
        }
    }

    #[test]
    fn binary_merge_of_domain_heads() {
        let plan = ReductionTree::new(2).unwrap().plan(7, 1);
        let merges: Vec<_> = plan
            .ops()
            .iter()
            .filter(|op| matches!(op, TreeOp::Tt { .. }))
            .copied()
            .collect();
        assert_eq!(
            merges,
            [
                TreeOp::Tt { j: 0, k: 2, kpiv: 0 },
                TreeOp::Tt { j: 0, k: 6, kpiv: 4 },
                TreeOp::Tt { j: 0, k: 4, kpiv: 0 },
            ]
        );
    }

    #[test]
    fn inconsistent_plans_are_rejected() {
        let (mt, nt) = (3, 2);
        let plan = ReductionTree::default().plan(mt, nt);

        let mut ops = plan.ops().to_vec();
        ops.push(TreeOp::Ge { j: 0, k: 3 });
        assert_eq!(TreePlan::from_ops(ops).validate(mt, nt), Err(Error::IllegalKernel));

        // pivot used before being factorized
        let mut ops = plan.ops().to_vec();
        ops.swap(0, 1);
        assert_eq!(TreePlan::from_ops(ops).validate(mt, nt), Err(Error::IllegalKernel));

        // incomplete elimination
        let mut ops = plan.ops().to_vec();
        ops.pop();
        assert_eq!(TreePlan::from_ops(ops).validate(mt, nt), Err(Error::IllegalKernel));

        assert_eq!(ReductionTree::new(0), Err(Error::IllegalValue));
    }
}
