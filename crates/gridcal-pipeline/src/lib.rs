//! End-to-end orchestration for `gridcal`.
//!
//! [`calibrate`] drives the full camera-calibration sequence (linear
//! estimate, skew zeroing, joint nonlinear refinement, outlier elimination);
//! [`undistort`] prepares and runs the line-straightness distortion fit and
//! corrects arbitrary points with the result; [`params`] is the uniform
//! name/value/bounds contract hosts use to present and persist settings.

pub mod calibrate;
pub mod params;
pub mod undistort;

pub use calibrate::{CalibrationOptions, CalibrationReport, CameraCalibrator};
pub use params::{Describable, ParameterDescriptor};
pub use undistort::{AnyModel, CorrectionOptions, CorrectionReport, DistortionCorrector, ModelKind};
