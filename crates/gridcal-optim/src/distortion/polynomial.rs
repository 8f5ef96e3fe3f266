//! Polynomial radial distortion: `r_u = r_d (1 + k₁ r_d² + k₂ r_d⁴)`.

use anyhow::{ensure, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use gridcal_core::{Pt2, Real};

use super::RadialDistortionModel;

/// Classic even-polynomial model with two coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolynomialModel {
    pub k1: Real,
    pub k2: Real,
    pub center: Pt2,
    pub aspect: Real,
}

impl PolynomialModel {
    pub fn new(k1: Real, k2: Real, center: Pt2, aspect: Real) -> Self {
        Self {
            k1,
            k2,
            center,
            aspect,
        }
    }

    /// Identity mapping around a center.
    pub fn identity(center: Pt2, aspect: Real) -> Self {
        Self::new(0.0, 0.0, center, aspect)
    }
}

impl RadialDistortionModel for PolynomialModel {
    fn coefficient_count(&self) -> usize {
        2
    }

    fn coefficients(&self) -> DVector<Real> {
        DVector::from_column_slice(&[self.k1, self.k2])
    }

    fn set_coefficients(&mut self, coeffs: &[Real]) -> Result<()> {
        ensure!(
            coeffs.len() == 2,
            "polynomial model takes 2 coefficients, got {}",
            coeffs.len()
        );
        self.k1 = coeffs[0];
        self.k2 = coeffs[1];
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
        r * (1.0 + self.k1 * r2 + self.k2 * r2 * r2)
    }

    fn radius_gradient(&self, r: Real, out: &mut DVector<Real>) {
        let r2 = r * r;
        out[0] = r * r2;
        out[1] = r * r2 * r2;
    }
}
