//! Nonlinear least-squares engine and calibration problems for `gridcal`.
//!
//! The [`engine`] module holds a generic Levenberg-Marquardt minimizer;
//! [`camera_fit`], [`skew_zero`], and [`line_fit`] supply the problem
//! definitions it consumes; [`distortion`] holds the radial lens models the
//! line fit estimates.

pub mod camera_fit;
pub mod distortion;
pub mod engine;
pub mod line_fit;
pub mod skew_zero;

pub use engine::{
    CancelFlag, Damping, Derivatives, FitReport, LeastSquaresProblem, LevenbergMarquardt,
    SolveOptions,
};
