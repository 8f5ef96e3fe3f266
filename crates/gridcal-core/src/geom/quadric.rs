//! General conic `A·x² + B·x + C·xy + D·y + E·y² + F = 0`.
//!
//! Used by the distortion fit to approximate a bent calibration line in the
//! neighbourhood of an anchor point: the conic's tangent at the anchor is the
//! effective "straight" line the bent points are measured against.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geom::Line2D;
use crate::math::{linsys, Pt2, Real};

const EPS: Real = 1e-12;

/// Errors raised by conic fitting.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QuadricError {
    /// Too few points for the requested fit.
    #[error("need at least {needed} points for the conic fit, got {got}")]
    NotEnoughPoints { needed: usize, got: usize },
    /// The underlying homogeneous solve failed.
    #[error("conic fit failed: {0}")]
    Solve(#[from] linsys::LinSysError),
}

/// Conic coefficients in the order `A x² + B x + C xy + D y + E y² + F`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quadric {
    pub a: Real,
    pub b: Real,
    pub c: Real,
    pub d: Real,
    pub e: Real,
    pub f: Real,
}

impl Quadric {
    /// Evaluate the implicit conic equation at a point.
    pub fn evaluate(&self, p: &Pt2) -> Real {
        self.a * p.x * p.x
            + self.b * p.x
            + self.c * p.x * p.y
            + self.d * p.y
            + self.e * p.y * p.y
            + self.f
    }

    /// Least-squares fit to a point set (minimum-norm unit coefficient vector).
    pub fn fit(points: &[Pt2]) -> Result<Self, QuadricError> {
        if points.len() < 5 {
            return Err(QuadricError::NotEnoughPoints {
                needed: 5,
                got: points.len(),
            });
        }

        let mut m = DMatrix::<Real>::zeros(points.len(), 6);
        for (i, p) in points.iter().enumerate() {
            m[(i, 0)] = p.x * p.x;
            m[(i, 1)] = p.x;
            m[(i, 2)] = p.x * p.y;
            m[(i, 3)] = p.y;
            m[(i, 4)] = p.y * p.y;
            m[(i, 5)] = 1.0;
        }
        let x = linsys::solve_homogeneous(&m)?;
        Ok(Self {
            a: x[0],
            b: x[1],
            c: x[2],
            d: x[3],
            e: x[4],
            f: x[5],
        })
    }

    /// Fit constrained to pass exactly through `anchor`, using `points`.
    ///
    /// `F` is eliminated through the anchor constraint, leaving a five-
    /// coefficient homogeneous system over the remaining points.
    pub fn fit_through(anchor: &Pt2, points: &[Pt2]) -> Result<Self, QuadricError> {
        if points.len() < 4 {
            return Err(QuadricError::NotEnoughPoints {
                needed: 4,
                got: points.len(),
            });
        }

        let (x0, y0) = (anchor.x, anchor.y);
        let mut m = DMatrix::<Real>::zeros(points.len(), 5);
        for (i, p) in points.iter().enumerate() {
            m[(i, 0)] = p.x * p.x - x0 * x0;
            m[(i, 1)] = p.x - x0;
            m[(i, 2)] = p.x * p.y - x0 * y0;
            m[(i, 3)] = p.y - y0;
            m[(i, 4)] = p.y * p.y - y0 * y0;
        }
        let x = linsys::solve_homogeneous(&m)?;
        let f = -(x[0] * x0 * x0 + x[1] * x0 + x[2] * x0 * y0 + x[3] * y0 + x[4] * y0 * y0);
        Ok(Self {
            a: x[0],
            b: x[1],
            c: x[2],
            d: x[3],
            e: x[4],
            f,
        })
    }

    /// Gradient of the implicit equation at a point.
    pub fn gradient(&self, p: &Pt2) -> (Real, Real) {
        (
            2.0 * self.a * p.x + self.b + self.c * p.y,
            self.c * p.x + self.d + 2.0 * self.e * p.y,
        )
    }

    /// Tangent line at a point on (or near) the conic.
    ///
    /// `None` when the gradient vanishes (singular point of the conic).
    pub fn tangent_at(&self, p: &Pt2) -> Option<Line2D> {
        let (gx, gy) = self.gradient(p);
        if (gx * gx + gy * gy).sqrt() < EPS {
            return None;
        }
        Some(Line2D::new(gx, gy, -(gx * p.x + gy * p.y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle_points(r: Real, n: usize) -> Vec<Pt2> {
        (0..n)
            .map(|i| {
                let t = i as Real / n as Real * std::f64::consts::TAU;
                Pt2::new(r * t.cos(), r * t.sin())
            })
            .collect()
    }

    #[test]
    fn fit_recovers_circle() {
        let pts = circle_points(2.0, 12);
        let q = Quadric::fit(&pts).unwrap();
        for p in &pts {
            assert!(q.evaluate(p).abs() < 1e-9, "residual at {:?}", p);
        }
        // x² + y² - 4 = 0 up to scale: A == E, B == C == D == 0.
        assert!((q.a - q.e).abs() < 1e-9);
        assert!(q.b.abs() < 1e-9 && q.c.abs() < 1e-9 && q.d.abs() < 1e-9);
        assert!((q.f / q.a + 4.0).abs() < 1e-6);
    }

    #[test]
    fn constrained_fit_passes_through_anchor() {
        let mut pts = circle_points(1.5, 10);
        let anchor = pts.remove(0);
        let q = Quadric::fit_through(&anchor, &pts).unwrap();
        assert!(q.evaluate(&anchor).abs() < 1e-12);
        for p in &pts {
            assert!(q.evaluate(p).abs() < 1e-9);
        }
    }

    #[test]
    fn circle_tangent_is_perpendicular_to_radius() {
        let pts = circle_points(1.0, 16);
        let q = Quadric::fit(&pts).unwrap();
        let p = Pt2::new(1.0, 0.0);
        let tangent = q.tangent_at(&p).unwrap().normalized();
        // Tangent at (1, 0) of the unit circle is the vertical line x = 1.
        assert!(tangent.b.abs() < 1e-9, "b = {}", tangent.b);
        assert!((tangent.a - 1.0).abs() < 1e-9);
        assert!((tangent.c + 1.0).abs() < 1e-9, "c = {}", tangent.c);
    }
}
