//! Line-straightness fit of a radial distortion model.
//!
//! Each calibration line is a point set sampled along a physically straight
//! edge in a distorted image. Under the current parameters every point is
//! undistorted, a conic is fitted through the line's anchor (the point
//! nearest the distortion center), and the conic's tangent at the anchor
//! stands in for the straight line the points should lie on. Residuals are
//! the signed perpendicular distances to that tangent, scaled by a
//! radius-ratio factor so angular error costs the same at every radius. The
//! measurements are identically zero; this is a pure penalty minimization.

use anyhow::{ensure, Result};
use nalgebra::DVector;

use gridcal_core::{Line2D, Pt2, Quadric, Real};

use crate::distortion::{classify_direction, DistortionDirection, RadialDistortionModel};
use crate::engine::LeastSquaresProblem;

/// `fit_through` needs four points besides the anchor.
pub const MIN_LINE_POINTS: usize = 5;

/// Least-squares problem over `[coefficients.., center.x, center.y]`.
#[derive(Debug, Clone)]
pub struct LineFitProblem<M> {
    model: M,
    lines: Vec<Vec<Pt2>>,
    point_count: usize,
    directions: Vec<DistortionDirection>,
    undistorted: Vec<Pt2>,
}

impl<M: RadialDistortionModel + Clone> LineFitProblem<M> {
    pub fn new(model: M, lines: Vec<Vec<Pt2>>) -> Result<Self> {
        ensure!(!lines.is_empty(), "line fit needs at least one line");
        for (i, line) in lines.iter().enumerate() {
            ensure!(
                line.len() >= MIN_LINE_POINTS,
                "line {} has {} points, need at least {}",
                i,
                line.len(),
                MIN_LINE_POINTS
            );
        }
        let point_count = lines.iter().map(|l| l.len()).sum();
        let line_count = lines.len();
        let max_line = lines.iter().map(|l| l.len()).max().unwrap_or(0);
        Ok(Self {
            model,
            lines,
            point_count,
            directions: vec![DistortionDirection::None; line_count],
            undistorted: Vec::with_capacity(max_line),
        })
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Direction classified for each line during the latest evaluation.
    pub fn directions(&self) -> &[DistortionDirection] {
        &self.directions
    }

    /// Current parameters of a model, in fit layout.
    pub fn initial_params(&self) -> DVector<Real> {
        let n = self.model.coefficient_count();
        let mut out = DVector::zeros(n + 2);
        let coeffs = self.model.coefficients();
        for k in 0..n {
            out[k] = coeffs[k];
        }
        let c = self.model.center();
        out[n] = c.x;
        out[n + 1] = c.y;
        out
    }

    /// A copy of the model carrying the given fit parameters.
    pub fn model_with_params(&self, params: &DVector<Real>) -> Result<M> {
        let mut model = self.model.clone();
        apply_params(&mut model, params)?;
        Ok(model)
    }
}

/// Write fit-layout parameters back into a model.
pub fn apply_params<M: RadialDistortionModel>(model: &mut M, params: &DVector<Real>) -> Result<()> {
    let n = model.coefficient_count();
    ensure!(
        params.len() == n + 2,
        "expected {} fit parameters, got {}",
        n + 2,
        params.len()
    );
    let coeffs: Vec<Real> = params.iter().take(n).copied().collect();
    model.set_coefficients(&coeffs)?;
    model.set_center(Pt2::new(params[n], params[n + 1]));
    Ok(())
}

impl<M: RadialDistortionModel + Clone> LeastSquaresProblem for LineFitProblem<M> {
    fn dimensions(&self) -> (usize, usize) {
        (self.point_count, self.model.coefficient_count() + 2)
    }

    fn residuals(&mut self, params: &DVector<Real>, out: &mut DVector<Real>) -> Result<()> {
        apply_params(&mut self.model, params)?;
        let center = self.model.center();

        let mut row = 0;
        for (li, line) in self.lines.iter().enumerate() {
            self.undistorted.clear();
            for p in line {
                self.undistorted.push(self.model.undistort(p));
            }

            let mut anchor_idx = 0;
            let mut best = Real::INFINITY;
            for (i, p) in self.undistorted.iter().enumerate() {
                let d = (p - center).norm();
                if d < best {
                    best = d;
                    anchor_idx = i;
                }
            }
            let anchor = self.undistorted[anchor_idx];
            let others: Vec<Pt2> = self
                .undistorted
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != anchor_idx)
                .map(|(_, p)| *p)
                .collect();

            // Collinear points leave the conic with a vanishing gradient at
            // the anchor; the plain orthogonal fit covers that case.
            let quadric_tangent = Quadric::fit_through(&anchor, &others)
                .ok()
                .and_then(|q| q.tangent_at(&anchor));
            let mut tangent = match quadric_tangent {
                Some(t) => t,
                None => Line2D::fit(&self.undistorted)?,
            };

            // Orient the normal away from the center so the residual sign is
            // stable across parameter perturbations.
            if tangent.evaluate(&center) > 0.0 {
                tangent = Line2D::new(-tangent.a, -tangent.b, -tangent.c);
            }

            self.directions[li] = classify_direction(&self.undistorted, &tangent, &center);

            for (p, u) in line.iter().zip(self.undistorted.iter()) {
                let q_d = p - center;
                let q_u = u - center;
                let r_d = q_d.norm();
                let r_u = q_u.norm();
                let ratio = if r_d > 0.0 && r_u > 0.0 {
                    (r_u / r_d).max(r_d / r_u)
                } else {
                    1.0
                };
                out[row] = -tangent.signed_distance(u) * ratio;
                row += 1;
            }
        }
        debug_assert_eq!(row, self.point_count);
        Ok(())
    }
}
