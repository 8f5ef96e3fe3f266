//! Joint refinement of the camera matrix and the grid corner positions.
//!
//! The parameter vector stacks the 12 entries of the projection matrix with
//! 12 corner coordinates per grid. Residuals mix two kinds of error: per-point
//! reprojection error (two rows per observation) and the displacement of each
//! grid corner from its measured position (twelve rows per grid), scaled so
//! neither group dominates the other by sheer count.

use anyhow::{ensure, Context, Result};
use nalgebra::DVector;

use gridcal_core::math::to_homogeneous_3d;
use gridcal_core::{CalibrationPoint, Mat34, Real, RealGridData};

use crate::engine::LeastSquaresProblem;

/// Number of camera-matrix entries at the front of the parameter vector.
pub const CAMERA_PARAMS: usize = 12;

/// Corner coordinates contributed by each grid.
pub const GRID_PARAMS: usize = 12;

/// Tuning knobs for the joint fit.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct CameraFitOptions {
    /// Scale applied to the corner-displacement residuals. `None` picks
    /// `sqrt(point_count / (12 * grid_count))`, which balances the two
    /// residual groups against each other.
    pub grid_weight: Option<Real>,
}

/// Least-squares problem tying observed image points to bilinear grids.
#[derive(Debug, Clone)]
pub struct CameraFitProblem {
    points: Vec<CalibrationPoint>,
    grids: Vec<RealGridData>,
    corner_targets: Vec<[Real; GRID_PARAMS]>,
    grid_weight: Real,
    working: Vec<RealGridData>,
}

impl CameraFitProblem {
    pub fn new(
        points: Vec<CalibrationPoint>,
        grids: Vec<RealGridData>,
        options: CameraFitOptions,
    ) -> Result<Self> {
        ensure!(!points.is_empty(), "camera fit needs at least one point");
        ensure!(!grids.is_empty(), "camera fit needs at least one grid");
        for (i, pt) in points.iter().enumerate() {
            let grid = grids
                .get(pt.grid)
                .with_context(|| format!("point {} references missing grid {}", i, pt.grid))?;
            grid.interpolate(pt.row, pt.col)
                .with_context(|| format!("point {} references an out-of-range cell", i))?;
        }

        let grid_weight = options.grid_weight.unwrap_or_else(|| {
            (points.len() as Real / (GRID_PARAMS * grids.len()) as Real).sqrt()
        });
        ensure!(
            grid_weight.is_finite() && grid_weight >= 0.0,
            "grid weight must be finite and non-negative, got {}",
            grid_weight
        );

        let corner_targets = grids.iter().map(|g| g.corner_params()).collect();
        let working = grids.clone();
        Ok(Self {
            points,
            grids,
            corner_targets,
            grid_weight,
            working,
        })
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    pub fn grid_weight(&self) -> Real {
        self.grid_weight
    }

    /// Stack a camera matrix and the measured grid corners into a parameter
    /// vector suitable for [`LevenbergMarquardt::minimize`].
    ///
    /// [`LevenbergMarquardt::minimize`]: crate::engine::LevenbergMarquardt::minimize
    pub fn initial_params(&self, p: &Mat34) -> DVector<Real> {
        let mut out = DVector::zeros(CAMERA_PARAMS + GRID_PARAMS * self.grids.len());
        for r in 0..3 {
            for c in 0..4 {
                out[4 * r + c] = p[(r, c)];
            }
        }
        for (g, grid) in self.grids.iter().enumerate() {
            let base = CAMERA_PARAMS + GRID_PARAMS * g;
            for (k, v) in grid.corner_params().iter().enumerate() {
                out[base + k] = *v;
            }
        }
        out
    }

    /// Extract the camera matrix from a parameter vector.
    pub fn camera_matrix(params: &DVector<Real>) -> Mat34 {
        camera_from_params(params)
    }

    /// Extract the refined grids from a parameter vector.
    pub fn grid_estimates(&self, params: &DVector<Real>) -> Vec<RealGridData> {
        let mut out = self.grids.clone();
        for (g, grid) in out.iter_mut().enumerate() {
            grid.set_corner_params(&corner_slice(params, g));
        }
        out
    }

    /// Per-residual weights from measurement variances: one variance per
    /// point (applied to both of its residual rows) and one per grid (applied
    /// to its twelve corner rows). Weights are inverse variances.
    pub fn inverse_variance_weights(
        &self,
        point_variances: &[Real],
        grid_variances: &[Real],
    ) -> Result<DVector<Real>> {
        ensure!(
            point_variances.len() == self.points.len(),
            "expected {} point variances, got {}",
            self.points.len(),
            point_variances.len()
        );
        ensure!(
            grid_variances.len() == self.grids.len(),
            "expected {} grid variances, got {}",
            self.grids.len(),
            grid_variances.len()
        );

        let (residuals, _) = self.dimensions();
        let mut w = DVector::zeros(residuals);
        for (i, &var) in point_variances.iter().enumerate() {
            ensure!(var > 0.0, "point variance {} must be positive", i);
            w[2 * i] = 1.0 / var;
            w[2 * i + 1] = 1.0 / var;
        }
        let corner_base = 2 * self.points.len();
        for (g, &var) in grid_variances.iter().enumerate() {
            ensure!(var > 0.0, "grid variance {} must be positive", g);
            for k in 0..GRID_PARAMS {
                w[corner_base + GRID_PARAMS * g + k] = 1.0 / var;
            }
        }
        Ok(w)
    }
}

/// Row-major camera-matrix entries as the leading parameters of a fit.
pub fn camera_params(p: &Mat34) -> DVector<Real> {
    let mut out = DVector::zeros(CAMERA_PARAMS);
    for r in 0..3 {
        for c in 0..4 {
            out[4 * r + c] = p[(r, c)];
        }
    }
    out
}

/// Rebuild the camera matrix from the leading parameters of a fit.
pub fn camera_from_params(params: &DVector<Real>) -> Mat34 {
    let mut p = Mat34::zeros();
    for r in 0..3 {
        for c in 0..4 {
            p[(r, c)] = params[4 * r + c];
        }
    }
    p
}

fn corner_slice(params: &DVector<Real>, grid: usize) -> [Real; GRID_PARAMS] {
    let base = CAMERA_PARAMS + GRID_PARAMS * grid;
    let mut out = [0.0; GRID_PARAMS];
    for (k, v) in out.iter_mut().enumerate() {
        *v = params[base + k];
    }
    out
}

impl LeastSquaresProblem for CameraFitProblem {
    fn dimensions(&self) -> (usize, usize) {
        (
            2 * self.points.len() + GRID_PARAMS * self.grids.len(),
            CAMERA_PARAMS + GRID_PARAMS * self.grids.len(),
        )
    }

    fn residuals(&mut self, params: &DVector<Real>, out: &mut DVector<Real>) -> Result<()> {
        let p = Self::camera_matrix(params);
        for (g, grid) in self.working.iter_mut().enumerate() {
            grid.set_corner_params(&corner_slice(params, g));
        }

        for (i, pt) in self.points.iter().enumerate() {
            let world = self.working[pt.grid].interpolate(pt.row, pt.col)?;
            let h = p * to_homogeneous_3d(&world);
            // A vanishing depth produces non-finite rows; the solver rejects
            // such trial steps instead of this evaluation failing.
            out[2 * i] = pt.image.x - h.x / h.z;
            out[2 * i + 1] = pt.image.y - h.y / h.z;
        }

        let corner_base = 2 * self.points.len();
        for (g, target) in self.corner_targets.iter().enumerate() {
            let param_base = CAMERA_PARAMS + GRID_PARAMS * g;
            for k in 0..GRID_PARAMS {
                out[corner_base + GRID_PARAMS * g + k] =
                    (target[k] - params[param_base + k]) * self.grid_weight;
            }
        }
        Ok(())
    }
}
