//! Core math and geometry primitives for `gridcal`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - dense linear-system solving, including the minimum-norm solution of
//!   homogeneous systems via SVD,
//! - 2D line and conic (quadric) geometry used by the distortion fit,
//! - the calibration data model ([`CalibrationPoint`], [`RealGridData`]),
//! - the [`Camera`] projection matrix with its RQ decomposition.

/// Linear algebra type aliases and dense solvers.
pub mod math;
/// 2D lines and conics.
pub mod geom;
/// Calibration observations and grid geometry.
pub mod grid;
/// Camera projection matrix and its decomposition.
pub mod camera;

pub use camera::{rq_decompose, Camera, CameraError};
pub use geom::{Line2D, Quadric};
pub use grid::{CalibrationPoint, GridError, RealGridData};
pub use math::*;
