//! Distortion-model fitting and point correction.
//!
//! Raw calibration lines arrive in pixel coordinates; the corrector scales
//! them into a normalized frame (centroid at the origin, mean radius one),
//! seeds a model from the line geometry, runs the line-straightness fit, and
//! keeps the fitted model together with the frame so arbitrary points can be
//! corrected later.

use anyhow::{bail, ensure, Context, Result};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use gridcal_core::{Pt2, Real};
use gridcal_optim::distortion::{
    seed_from_lines, DistortionDirection, PolynomialModel, RadialDistortionModel, RationalModel,
};
use gridcal_optim::line_fit::LineFitProblem;
use gridcal_optim::{CancelFlag, LeastSquaresProblem, LevenbergMarquardt, SolveOptions};

/// Which radial model variant to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Rational,
    Polynomial,
}

/// Tuning for one distortion fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOptions {
    pub model: ModelKind,
    /// Pixel aspect ratio applied to the y offset before the radius.
    pub aspect: Real,
    pub max_iterations: usize,
    pub residual_target: Real,
}

impl Default for CorrectionOptions {
    fn default() -> Self {
        Self {
            model: ModelKind::default(),
            aspect: 1.0,
            max_iterations: 100,
            residual_target: 0.0,
        }
    }
}

/// Either model variant behind one dispatchable value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AnyModel {
    Rational(RationalModel),
    Polynomial(PolynomialModel),
}

impl RadialDistortionModel for AnyModel {
    fn coefficient_count(&self) -> usize {
        match self {
            AnyModel::Rational(m) => m.coefficient_count(),
            AnyModel::Polynomial(m) => m.coefficient_count(),
        }
    }

    fn coefficients(&self) -> DVector<Real> {
        match self {
            AnyModel::Rational(m) => m.coefficients(),
            AnyModel::Polynomial(m) => m.coefficients(),
        }
    }

    fn set_coefficients(&mut self, coeffs: &[Real]) -> Result<()> {
        match self {
            AnyModel::Rational(m) => m.set_coefficients(coeffs),
            AnyModel::Polynomial(m) => m.set_coefficients(coeffs),
        }
    }

    fn center(&self) -> Pt2 {
        match self {
            AnyModel::Rational(m) => m.center(),
            AnyModel::Polynomial(m) => m.center(),
        }
    }

    fn set_center(&mut self, center: Pt2) {
        match self {
            AnyModel::Rational(m) => m.set_center(center),
            AnyModel::Polynomial(m) => m.set_center(center),
        }
    }

    fn aspect(&self) -> Real {
        match self {
            AnyModel::Rational(m) => m.aspect(),
            AnyModel::Polynomial(m) => m.aspect(),
        }
    }

    fn map_radius(&self, r: Real) -> Real {
        match self {
            AnyModel::Rational(m) => m.map_radius(r),
            AnyModel::Polynomial(m) => m.map_radius(r),
        }
    }

    fn radius_gradient(&self, r: Real, out: &mut DVector<Real>) {
        match self {
            AnyModel::Rational(m) => m.radius_gradient(r, out),
            AnyModel::Polynomial(m) => m.radius_gradient(r, out),
        }
    }
}

/// Similarity frame the fit runs in: centroid to the origin, mean radius
/// to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub origin: Pt2,
    pub scale: Real,
}

impl Frame {
    /// Frame fitted to all points of all lines.
    pub fn from_lines(lines: &[Vec<Pt2>]) -> Result<Self> {
        let total: usize = lines.iter().map(|l| l.len()).sum();
        ensure!(total > 0, "cannot build a frame from empty lines");

        let mut cx = 0.0;
        let mut cy = 0.0;
        for p in lines.iter().flatten() {
            cx += p.x;
            cy += p.y;
        }
        let origin = Pt2::new(cx / total as Real, cy / total as Real);

        let mut mean_radius = 0.0;
        for p in lines.iter().flatten() {
            mean_radius += (p - origin).norm();
        }
        mean_radius /= total as Real;
        ensure!(
            mean_radius > Real::EPSILON,
            "degenerate line set: all points coincide"
        );

        Ok(Self {
            origin,
            scale: 1.0 / mean_radius,
        })
    }

    pub fn to_normalized(&self, p: &Pt2) -> Pt2 {
        Pt2::new(
            (p.x - self.origin.x) * self.scale,
            (p.y - self.origin.y) * self.scale,
        )
    }

    pub fn to_measured(&self, p: &Pt2) -> Pt2 {
        Pt2::new(
            p.x / self.scale + self.origin.x,
            p.y / self.scale + self.origin.y,
        )
    }
}

/// Outcome of a model fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    /// Weighted squared straightness residual of the fitted model.
    pub residual: Real,
    /// Residual of the seeded starting model.
    pub initial_residual: Real,
    pub iterations: usize,
    pub cancelled: bool,
    /// Distortion direction classified per line at the fitted parameters.
    pub directions: Vec<DistortionDirection>,
}

/// Fits a distortion model from line sets and corrects points with it.
#[derive(Debug, Default)]
pub struct DistortionCorrector {
    options: CorrectionOptions,
    cancel: CancelFlag,
    fitted: Option<(AnyModel, Frame)>,
}

impl DistortionCorrector {
    pub fn new(options: CorrectionOptions) -> Self {
        Self {
            options,
            cancel: CancelFlag::new(),
            fitted: None,
        }
    }

    pub fn options(&self) -> &CorrectionOptions {
        &self.options
    }

    /// Request cooperative cancellation of a running fit.
    pub fn terminate(&self) {
        self.cancel.terminate();
    }

    /// The fitted model, if a fit has completed.
    pub fn model(&self) -> Option<&AnyModel> {
        self.fitted.as_ref().map(|(m, _)| m)
    }

    /// Fit the distortion model to the given line point sets.
    pub fn find_model_parameters(&mut self, lines: &[Vec<Pt2>]) -> Result<CorrectionReport> {
        self.cancel.reset();
        let frame = Frame::from_lines(lines)?;
        let scaled: Vec<Vec<Pt2>> = lines
            .iter()
            .map(|l| l.iter().map(|p| frame.to_normalized(p)).collect())
            .collect();

        let (center, coefficient) = seed_from_lines(&scaled)?;
        let model = match self.options.model {
            ModelKind::Rational => {
                AnyModel::Rational(RationalModel::new(coefficient, 0.0, center, self.options.aspect))
            }
            ModelKind::Polynomial => AnyModel::Polynomial(PolynomialModel::new(
                coefficient,
                0.0,
                center,
                self.options.aspect,
            )),
        };
        debug!(
            "distortion seed: coefficient {:.4e}, center ({:.4}, {:.4})",
            coefficient, center.x, center.y
        );

        let mut problem = LineFitProblem::new(model, scaled)?;
        let start = problem.initial_params();
        let solver = LevenbergMarquardt::new(SolveOptions {
            max_iterations: self.options.max_iterations,
            residual_target: self.options.residual_target,
            ..SolveOptions::default()
        })
        .with_cancel_flag(self.cancel.clone());

        let report = solver.minimize(&mut problem, &start)?;
        debug!(
            "distortion fit: residual {:.6e} -> {:.6e} in {} iterations",
            report.initial_residual, report.residual, report.iterations
        );

        // The last solver evaluation may have been a rejected trial; refresh
        // the per-line classification at the best parameters.
        let (rows, _) = problem.dimensions();
        let mut residuals = DVector::zeros(rows);
        problem.residuals(&report.best, &mut residuals)?;

        let fitted = problem.model_with_params(&report.best)?;
        self.fitted = Some((fitted, frame));

        Ok(CorrectionReport {
            residual: report.residual,
            initial_residual: report.initial_residual,
            iterations: report.iterations,
            cancelled: report.cancelled,
            directions: problem.directions().to_vec(),
        })
    }

    /// Map measured points to their undistorted positions with the fitted
    /// model. Fails until [`find_model_parameters`](Self::find_model_parameters)
    /// has run.
    pub fn correct_points(&self, points: &[Pt2]) -> Result<Vec<Pt2>> {
        let Some((model, frame)) = &self.fitted else {
            bail!("no distortion model fitted yet");
        };
        Ok(points
            .iter()
            .map(|p| frame.to_measured(&model.undistort(&frame.to_normalized(p))))
            .collect())
    }

    /// Correct a single point.
    pub fn correct_point(&self, point: &Pt2) -> Result<Pt2> {
        Ok(self
            .correct_points(std::slice::from_ref(point))?
            .pop()
            .context("empty correction result")?)
    }
}
