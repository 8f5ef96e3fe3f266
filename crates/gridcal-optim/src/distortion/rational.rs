//! Rational radial distortion: `r_u = r_d (1 + a r_d²) / (1 + b r_d²)`.

use anyhow::{ensure, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use gridcal_core::{Pt2, Real};

use super::{RadialDistortionModel, RADIUS_EPS};

/// Rational-of-radius model with two coefficients.
///
/// The extra denominator term lets the same parameter count capture both
/// mild barrel and strong cushion profiles; a vanishing denominator degrades
/// to the identity mapping instead of blowing up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RationalModel {
    pub a: Real,
    pub b: Real,
    pub center: Pt2,
    pub aspect: Real,
}

impl RationalModel {
    pub fn new(a: Real, b: Real, center: Pt2, aspect: Real) -> Self {
        Self {
            a,
            b,
            center,
            aspect,
        }
    }

    /// Identity mapping around a center.
    pub fn identity(center: Pt2, aspect: Real) -> Self {
        Self::new(0.0, 0.0, center, aspect)
    }
}

impl RadialDistortionModel for RationalModel {
    fn coefficient_count(&self) -> usize {
        2
    }

    fn coefficients(&self) -> DVector<Real> {
        DVector::from_column_slice(&[self.a, self.b])
    }

    fn set_coefficients(&mut self, coeffs: &[Real]) -> Result<()> {
        ensure!(
            coeffs.len() == 2,
            "rational model takes 2 coefficients, got {}",
            coeffs.len()
        );
        self.a = coeffs[0];
        self.b = coeffs[1];
        Ok(())
    }

    fn center(&self) -> Pt2 {
        self.center
    }

    fn set_center(&mut self, center: Pt2) {
        self.center = center;
    }

    fn aspect(&self) -> Real {
        self.aspect
    }

    fn map_radius(&self, r: Real) -> Real {
        let r2 = r * r;
        let denom = 1.0 + self.b * r2;
        if denom.abs() < RADIUS_EPS {
            return r;
        }
        r * (1.0 + self.a * r2) / denom
    }

    fn radius_gradient(&self, r: Real, out: &mut DVector<Real>) {
        let r2 = r * r;
        let denom = 1.0 + self.b * r2;
        if denom.abs() < RADIUS_EPS {
            out[0] = 0.0;
            out[1] = 0.0;
            return;
        }
        out[0] = r * r2 / denom;
        out[1] = -r * r2 * (1.0 + self.a * r2) / (denom * denom);
    }
}
