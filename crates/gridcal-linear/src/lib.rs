//! Closed-form linear estimators for `gridcal`.
//!
//! Provides Hartley point normalization (with the variance bookkeeping the
//! weighted nonlinear stage needs) and the normalized-DLT estimator of the
//! 3×4 camera projection matrix. Outputs here are the initial estimates the
//! iterative refinement in `gridcal-optim` starts from.

pub mod dlt;
pub mod normalize;

pub use dlt::{estimate_camera_matrix, estimate_camera_matrix_normalized};
pub use normalize::{normalize_points_2d, normalize_points_3d, Normalization2d, Normalization3d};
