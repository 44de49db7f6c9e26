//! The LQ factorization decomposes a matrix $A$ into a product of a lower trapezoidal matrix $L$
//! and an orthogonal matrix $Q$.
//!
//! It is the transposed counterpart of the [QR factorization](super::qr): panels are tile rows,
//! and the reduction tree eliminates tile columns. Accordingly, applying $Q$ replays the plan in
//! the opposite direction of the QR factorization.

/// Computing the factorization.
pub mod compute;

/// Applying $Q$ or $Q^\top$ to a matrix.
pub mod apply;

/// Solving minimum norm problems.
pub mod solve;

pub use apply::{unmlq, unmlq_tile, unmlq_tree};
pub use compute::{gelqf, gelqf_tile, gelqf_tree};
pub use solve::{gelqs, gelqs_tile};
