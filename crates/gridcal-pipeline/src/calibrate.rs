//! The end-to-end camera calibration sequence.
//!
//! `calibrate()` chains the stages: closed-form linear estimate, optional
//! zero-skew refinement, joint nonlinear refinement of the camera matrix and
//! grid corners, a second zero-skew pass, bounded outlier elimination, and
//! the final decomposition into intrinsics, rotation, and translation. Point
//! normalization is applied per stage and undone before results are handed
//! back; measurement variances follow the normalization scale squared.

use anyhow::{ensure, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use gridcal_core::camera::project_with;
use gridcal_core::{CalibrationPoint, Camera, Mat34, Pt2, Pt3, Real, RealGridData};
use gridcal_linear::dlt::{estimate_camera_matrix, estimate_camera_matrix_normalized, MIN_POINTS};
use gridcal_linear::normalize::{
    normalize_points_2d, normalize_points_3d, Normalization2d, Normalization3d,
};
use gridcal_optim::camera_fit::{CameraFitOptions, CameraFitProblem};
use gridcal_optim::skew_zero::{SkewZeroOptions, SkewZeroProblem};
use gridcal_optim::{CancelFlag, LevenbergMarquardt, SolveOptions};

/// Stage toggles and tuning constants for one calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOptions {
    /// Hartley-normalize coordinates for the linear estimate.
    pub normalize_linear: bool,
    /// Run the nonlinear stages in normalized coordinates.
    pub normalize_nonlinear: bool,
    /// Refine toward a zero-skew intrinsics matrix.
    pub zero_skew: bool,
    /// Run the joint camera/grid nonlinear refinement.
    pub refine_nonlinear: bool,
    /// Drop points whose reprojection error exceeds the threshold and redo
    /// the calibration once with the reduced set.
    pub eliminate_outliers: bool,
    /// Outlier threshold as a multiple of the mean reprojection error.
    pub outlier_coefficient: Real,
    /// Overwrite the input grids with the refined corner estimates.
    pub update_grids: bool,
    /// Weight residual rows by inverse measurement variances.
    pub use_covariance: bool,
    /// Variance of an image-point measurement (squared pixels).
    pub image_variance: Real,
    /// Variance of a grid-corner measurement (squared world units).
    pub world_variance: Real,
    /// Grid-corner residual scale; `None` balances points against corners.
    pub grid_weight: Option<Real>,
    /// Iteration budget per nonlinear stage.
    pub max_iterations: usize,
    /// Residual target passed to the solver.
    pub residual_target: Real,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            normalize_linear: true,
            normalize_nonlinear: true,
            zero_skew: true,
            refine_nonlinear: true,
            eliminate_outliers: false,
            outlier_coefficient: 1.5,
            update_grids: false,
            use_covariance: false,
            image_variance: 1.0,
            world_variance: 1.0,
            grid_weight: None,
            max_iterations: 100,
            residual_target: 0.0,
        }
    }
}

/// Quality summary of a calibration run; best-effort, no pass/fail flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Mean pixel reprojection error over the retained points, measured in
    /// the original (unnormalized) coordinates.
    pub mean_reprojection_error: Real,
    /// Solver iterations summed over all nonlinear stages.
    pub iterations: usize,
    /// Points that survived outlier elimination.
    pub points_used: usize,
    /// Points dropped as outliers.
    pub outliers_removed: usize,
    /// Whether a cooperative cancellation cut the run short.
    pub cancelled: bool,
}

/// Drives the calibration stages; owns the cancellation flag.
#[derive(Debug, Default)]
pub struct CameraCalibrator {
    options: CalibrationOptions,
    cancel: CancelFlag,
}

impl CameraCalibrator {
    pub fn new(options: CalibrationOptions) -> Self {
        Self {
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    /// Request cooperative cancellation of a running calibration.
    pub fn terminate(&self) {
        self.cancel.terminate();
    }

    /// Run the full sequence. Grids are overwritten with refined corners
    /// only when `update_grids` is set.
    pub fn calibrate(
        &self,
        points: &[CalibrationPoint],
        grids: &mut [RealGridData],
    ) -> Result<(Camera, CalibrationReport)> {
        self.cancel.reset();
        self.run(points, grids, self.options.eliminate_outliers)
    }

    fn solver(&self) -> LevenbergMarquardt {
        LevenbergMarquardt::new(SolveOptions {
            max_iterations: self.options.max_iterations,
            residual_target: self.options.residual_target,
            ..SolveOptions::default()
        })
        .with_cancel_flag(self.cancel.clone())
    }

    fn run(
        &self,
        points: &[CalibrationPoint],
        grids: &mut [RealGridData],
        allow_elimination: bool,
    ) -> Result<(Camera, CalibrationReport)> {
        let o = &self.options;
        ensure!(
            points.len() >= MIN_POINTS,
            "calibration needs at least {} points, got {}",
            MIN_POINTS,
            points.len()
        );
        ensure!(!grids.is_empty(), "calibration needs at least one grid");
        for (i, pt) in points.iter().enumerate() {
            ensure!(
                pt.grid < grids.len(),
                "point {} references missing grid {}",
                i,
                pt.grid
            );
        }

        let world_raw: Vec<Pt3> = points.iter().map(|p| p.world).collect();
        let image_raw: Vec<Pt2> = points.iter().map(|p| p.image).collect();

        let mut p = if o.normalize_linear {
            estimate_camera_matrix_normalized(&world_raw, &image_raw)?
        } else {
            estimate_camera_matrix(&world_raw, &image_raw)?
        };
        debug!("linear estimate over {} points", points.len());

        // Move the nonlinear stages into a normalized frame when requested;
        // the camera matrix travels with the coordinates.
        let mut norm: Option<(Normalization2d, Normalization3d)> = None;
        let (fit_world, fit_image, fit_points, fit_grids) = if o.normalize_nonlinear {
            let (image_n, t_i) = normalize_points_2d(&image_raw)?;
            let (world_n, t_w) = normalize_points_3d(&world_raw)?;
            let t_w_inv = t_w
                .transform
                .try_inverse()
                .context("world normalization transform is not invertible")?;
            p = t_i.transform * p * t_w_inv;

            let pts: Vec<CalibrationPoint> = points
                .iter()
                .zip(image_n.iter().zip(world_n.iter()))
                .map(|(pt, (im, w))| CalibrationPoint::new(*im, *w, pt.grid, pt.row, pt.col))
                .collect();
            let gs: Vec<RealGridData> = grids
                .iter()
                .map(|g| g.map_corners(|c| t_w.apply(c)))
                .collect();
            norm = Some((t_i, t_w));
            (world_n, image_n, pts, gs)
        } else {
            (
                world_raw.clone(),
                image_raw.clone(),
                points.to_vec(),
                grids.to_vec(),
            )
        };

        let mut iterations = 0;
        let mut cancelled = false;

        if o.zero_skew {
            let (refined, iters, c) = self.skew_pass(&p, &fit_world, &fit_image)?;
            p = refined;
            iterations += iters;
            cancelled |= c;
        }

        let mut est_grids = fit_grids.clone();
        if o.refine_nonlinear {
            let mut problem = CameraFitProblem::new(
                fit_points.clone(),
                fit_grids.clone(),
                CameraFitOptions {
                    grid_weight: o.grid_weight,
                },
            )?;
            let mut solver = self.solver();
            if o.use_covariance {
                let image_var = norm
                    .as_ref()
                    .map_or(o.image_variance, |(t_i, _)| {
                        t_i.scaled_variance(o.image_variance)
                    });
                let world_var = norm
                    .as_ref()
                    .map_or(o.world_variance, |(_, t_w)| {
                        t_w.scaled_variance(o.world_variance)
                    });
                let weights = problem.inverse_variance_weights(
                    &vec![image_var; problem.point_count()],
                    &vec![world_var; problem.grid_count()],
                )?;
                solver = solver.with_weights(weights);
            }

            let start = problem.initial_params(&p);
            let report = solver.minimize(&mut problem, &start)?;
            debug!(
                "nonlinear refinement: residual {:.6e} -> {:.6e} in {} iterations",
                report.initial_residual, report.residual, report.iterations
            );
            p = CameraFitProblem::camera_matrix(&report.best);
            est_grids = problem.grid_estimates(&report.best);
            iterations += report.iterations;
            cancelled |= report.cancelled;

            if o.zero_skew {
                let (refined, iters, c) = self.skew_pass(&p, &fit_world, &fit_image)?;
                p = refined;
                iterations += iters;
                cancelled |= c;
            }
        }

        if allow_elimination {
            if let Some(keep) = retained_points(points, &fit_world, &fit_image, &p, o.outlier_coefficient)
            {
                let removed = points.len() - keep.len();
                if removed > 0 && keep.len() >= MIN_POINTS {
                    debug!("eliminating {} outliers, recalibrating", removed);
                    let (camera, mut report) = self.run(&keep, grids, false)?;
                    report.outliers_removed += removed;
                    return Ok((camera, report));
                }
            }
        }

        if let Some((t_i, t_w)) = &norm {
            let t_i_inv = t_i
                .transform
                .try_inverse()
                .context("image normalization transform is not invertible")?;
            p = t_i_inv * p * t_w.transform;
            est_grids = est_grids
                .iter()
                .map(|g| g.map_corners(|c| t_w.invert(c)))
                .collect();
        }

        if o.update_grids {
            for (dst, src) in grids.iter_mut().zip(est_grids.iter()) {
                *dst = src.clone();
            }
        }

        let camera = Camera::from_matrix(p)?;
        let mut mean_err = 0.0;
        for pt in points {
            mean_err += camera
                .reprojection_error(&pt.world, &pt.image)
                .context("calibrated camera projects a point to infinity")?;
        }
        mean_err /= points.len() as Real;

        Ok((
            camera,
            CalibrationReport {
                mean_reprojection_error: mean_err,
                iterations,
                points_used: points.len(),
                outliers_removed: 0,
                cancelled,
            },
        ))
    }

    fn skew_pass(
        &self,
        p: &Mat34,
        world: &[Pt3],
        image: &[Pt2],
    ) -> Result<(Mat34, usize, bool)> {
        let mut problem =
            SkewZeroProblem::new(world.to_vec(), image.to_vec(), SkewZeroOptions::default())?;
        let start = problem.initial_params(p);
        let report = self.solver().minimize(&mut problem, &start)?;
        debug!(
            "skew pass: residual {:.6e} -> {:.6e}",
            report.initial_residual, report.residual
        );
        Ok((
            SkewZeroProblem::camera_matrix(&report.best),
            report.iterations,
            report.cancelled,
        ))
    }
}

/// Points whose reprojection error stays within `coefficient × mean`;
/// `None` when no point projects at all.
fn retained_points(
    points: &[CalibrationPoint],
    world: &[Pt3],
    image: &[Pt2],
    p: &Mat34,
    coefficient: Real,
) -> Option<Vec<CalibrationPoint>> {
    let errors: Vec<Option<Real>> = world
        .iter()
        .zip(image.iter())
        .map(|(w, im)| project_with(p, w).map(|proj| (proj - im).norm()))
        .collect();

    let finite: Vec<Real> = errors.iter().filter_map(|e| *e).collect();
    if finite.is_empty() {
        return None;
    }
    let mean = finite.iter().sum::<Real>() / finite.len() as Real;
    if mean <= 0.0 {
        return None;
    }

    let threshold = coefficient * mean;
    Some(
        points
            .iter()
            .zip(errors.iter())
            .filter(|(_, e)| e.map_or(false, |e| e <= threshold))
            .map(|(pt, _)| *pt)
            .collect(),
    )
}
