//! Uniform parameter-description contract.
//!
//! Hosts present and persist settings through name/value/bounds descriptors
//! instead of depending on the option structs directly. Booleans are carried
//! as 0/1 values so the contract stays purely numeric.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use gridcal_core::Real;

use crate::calibrate::CalibrationOptions;
use crate::undistort::{CorrectionOptions, ModelKind};

/// One tunable setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub value: Real,
    pub min: Real,
    pub max: Real,
}

impl ParameterDescriptor {
    pub fn new(name: &str, value: Real, min: Real, max: Real) -> Self {
        Self {
            name: name.to_owned(),
            value,
            min,
            max,
        }
    }

    fn flag(name: &str, value: bool) -> Self {
        Self::new(name, if value { 1.0 } else { 0.0 }, 0.0, 1.0)
    }
}

/// Settings exposable through [`ParameterDescriptor`] lists.
pub trait Describable {
    fn parameters(&self) -> Vec<ParameterDescriptor>;
    fn set_parameter(&mut self, name: &str, value: Real) -> Result<()>;
}

impl Describable for CalibrationOptions {
    fn parameters(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::flag("normalize_linear", self.normalize_linear),
            ParameterDescriptor::flag("normalize_nonlinear", self.normalize_nonlinear),
            ParameterDescriptor::flag("zero_skew", self.zero_skew),
            ParameterDescriptor::flag("refine_nonlinear", self.refine_nonlinear),
            ParameterDescriptor::flag("eliminate_outliers", self.eliminate_outliers),
            ParameterDescriptor::new("outlier_coefficient", self.outlier_coefficient, 1.0, 10.0),
            ParameterDescriptor::flag("update_grids", self.update_grids),
            ParameterDescriptor::flag("use_covariance", self.use_covariance),
            ParameterDescriptor::new("image_variance", self.image_variance, 0.0, Real::INFINITY),
            ParameterDescriptor::new("world_variance", self.world_variance, 0.0, Real::INFINITY),
            ParameterDescriptor::new("max_iterations", self.max_iterations as Real, 1.0, 10_000.0),
            ParameterDescriptor::new("residual_target", self.residual_target, 0.0, Real::INFINITY),
        ]
    }

    fn set_parameter(&mut self, name: &str, value: Real) -> Result<()> {
        match name {
            "normalize_linear" => self.normalize_linear = value != 0.0,
            "normalize_nonlinear" => self.normalize_nonlinear = value != 0.0,
            "zero_skew" => self.zero_skew = value != 0.0,
            "refine_nonlinear" => self.refine_nonlinear = value != 0.0,
            "eliminate_outliers" => self.eliminate_outliers = value != 0.0,
            "outlier_coefficient" => self.outlier_coefficient = value,
            "update_grids" => self.update_grids = value != 0.0,
            "use_covariance" => self.use_covariance = value != 0.0,
            "image_variance" => self.image_variance = value,
            "world_variance" => self.world_variance = value,
            "max_iterations" => self.max_iterations = value as usize,
            "residual_target" => self.residual_target = value,
            other => bail!("unknown calibration parameter '{}'", other),
        }
        Ok(())
    }
}

impl Describable for CorrectionOptions {
    fn parameters(&self) -> Vec<ParameterDescriptor> {
        let model = match self.model {
            ModelKind::Rational => 0.0,
            ModelKind::Polynomial => 1.0,
        };
        vec![
            ParameterDescriptor::new("model", model, 0.0, 1.0),
            ParameterDescriptor::new("aspect", self.aspect, 0.1, 10.0),
            ParameterDescriptor::new("max_iterations", self.max_iterations as Real, 1.0, 10_000.0),
            ParameterDescriptor::new("residual_target", self.residual_target, 0.0, Real::INFINITY),
        ]
    }

    fn set_parameter(&mut self, name: &str, value: Real) -> Result<()> {
        match name {
            "model" => {
                self.model = if value != 0.0 {
                    ModelKind::Polynomial
                } else {
                    ModelKind::Rational
                }
            }
            "aspect" => self.aspect = value,
            "max_iterations" => self.max_iterations = value as usize,
            "residual_target" => self.residual_target = value,
            other => bail!("unknown correction parameter '{}'", other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_descriptors_round_trip() {
        let mut options = CalibrationOptions::default();
        for d in options.clone().parameters() {
            options.set_parameter(&d.name, d.value).unwrap();
        }
        assert_eq!(options, CalibrationOptions::default());
    }

    #[test]
    fn flags_toggle_through_descriptors() {
        let mut options = CalibrationOptions::default();
        options.set_parameter("eliminate_outliers", 1.0).unwrap();
        assert!(options.eliminate_outliers);
        options.set_parameter("eliminate_outliers", 0.0).unwrap();
        assert!(!options.eliminate_outliers);
    }

    #[test]
    fn model_kind_maps_to_a_numeric_value() {
        let mut options = CorrectionOptions::default();
        options.set_parameter("model", 1.0).unwrap();
        assert_eq!(options.model, ModelKind::Polynomial);
        options.set_parameter("model", 0.0).unwrap();
        assert_eq!(options.model, ModelKind::Rational);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut options = CalibrationOptions::default();
        assert!(options.set_parameter("no_such_setting", 1.0).is_err());
    }
}
