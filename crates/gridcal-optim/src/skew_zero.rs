//! Camera refinement that drives the intrinsic skew to zero.
//!
//! After the joint fit the decomposed intrinsics usually carry a small
//! non-zero skew that real sensors do not have. This stage re-fits only the
//! twelve camera-matrix entries against fixed world points and adds a single
//! penalty residual on the normalized skew entry of the RQ factorization, so
//! the optimizer trades a little reprojection error for a physically
//! plausible intrinsics matrix.

use anyhow::{ensure, Result};
use nalgebra::DVector;

use gridcal_core::camera::rq_decompose;
use gridcal_core::math::to_homogeneous_3d;
use gridcal_core::{Pt2, Pt3, Real};

use crate::camera_fit::{camera_from_params, camera_params, CAMERA_PARAMS};
use crate::engine::LeastSquaresProblem;

/// Tuning knobs for the skew-zeroing fit.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct SkewZeroOptions {
    /// Weight of the skew penalty against the reprojection rows. `None`
    /// picks `sqrt(point_count)` so the penalty keeps up with the residual
    /// mass of the point set.
    pub skew_weight: Option<Real>,
}

/// Least-squares problem over the camera matrix with a skew penalty row.
#[derive(Debug, Clone)]
pub struct SkewZeroProblem {
    world: Vec<Pt3>,
    image: Vec<Pt2>,
    skew_weight: Real,
}

impl SkewZeroProblem {
    pub fn new(world: Vec<Pt3>, image: Vec<Pt2>, options: SkewZeroOptions) -> Result<Self> {
        ensure!(!world.is_empty(), "skew zeroing needs at least one point");
        ensure!(
            world.len() == image.len(),
            "mismatched world ({}) and image ({}) point counts",
            world.len(),
            image.len()
        );
        let skew_weight = options
            .skew_weight
            .unwrap_or_else(|| (world.len() as Real).sqrt());
        ensure!(
            skew_weight.is_finite() && skew_weight >= 0.0,
            "skew weight must be finite and non-negative, got {}",
            skew_weight
        );
        Ok(Self {
            world,
            image,
            skew_weight,
        })
    }

    pub fn initial_params(&self, p: &gridcal_core::Mat34) -> DVector<Real> {
        camera_params(p)
    }

    pub fn camera_matrix(params: &DVector<Real>) -> gridcal_core::Mat34 {
        camera_from_params(params)
    }

    pub fn skew_weight(&self) -> Real {
        self.skew_weight
    }
}

impl LeastSquaresProblem for SkewZeroProblem {
    fn dimensions(&self) -> (usize, usize) {
        (2 * self.world.len() + 1, CAMERA_PARAMS)
    }

    fn residuals(&mut self, params: &DVector<Real>, out: &mut DVector<Real>) -> Result<()> {
        let p = camera_from_params(params);
        for (i, (world, image)) in self.world.iter().zip(self.image.iter()).enumerate() {
            let h = p * to_homogeneous_3d(world);
            out[2 * i] = image.x - h.x / h.z;
            out[2 * i + 1] = image.y - h.y / h.z;
        }

        // Normalized skew of the current matrix; the projective scale of the
        // parameters cancels through the K[2,2] division.
        let m = p.fixed_view::<3, 3>(0, 0).into_owned();
        let (k, _) = rq_decompose(&m);
        out[2 * self.world.len()] = -self.skew_weight * k[(0, 1)] / k[(2, 2)];
        Ok(())
    }
}
