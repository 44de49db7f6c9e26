//! The QR factorization decomposes a matrix $A$ into a product of an orthogonal matrix $Q$ and
//! an upper trapezoidal matrix $R$.
//!
//! $Q$ is never formed explicitly. It is represented by the Householder reflectors left in the
//! factorized matrix, together with a [`HouseholderFactor`](super::HouseholderFactor) holding the
//! block factors of every elimination and the reduction tree plan that produced them.
//!
//! The tile columns of $A$ are processed one panel at a time. The diagonal tile and the other
//! domain heads of the panel are factorized independently, the remaining tiles of each domain
//! are annihilated against their head, and the heads are then merged pairwise. Updates of the
//! trailing tile columns run as soon as the elimination they depend on is done, so several
//! panels are typically in flight at once.

/// Computing the factorization.
pub mod compute;

/// Applying $Q$ or $Q^\top$ to a matrix.
pub mod apply;

/// Solving least squares problems.
pub mod solve;

pub use apply::{unmqr, unmqr_tile, unmqr_tree};
pub use compute::{geqrf, geqrf_tile, geqrf_tree};
pub use solve::{gels, geqrs, geqrs_tile};
