//! 2D line `a·x + b·y + c = 0` with degenerate constructors, orthogonal
//! least-squares fitting, and line/line intersection.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{Pt2, Real};

const EPS: Real = 1e-12;

/// Errors raised by line construction and fitting.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// Fewer than two points supplied to a fit.
    #[error("need at least 2 points to fit a line, got {0}")]
    NotEnoughPoints(usize),
    /// All points coincide; direction undefined.
    #[error("degenerate point set: all points coincide")]
    Degenerate,
}

/// A 2D line in implicit form `a·x + b·y + c = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line2D {
    pub a: Real,
    pub b: Real,
    pub c: Real,
}

impl Line2D {
    pub fn new(a: Real, b: Real, c: Real) -> Self {
        Self { a, b, c }
    }

    /// Horizontal line `y = y0`.
    pub fn horizontal(y0: Real) -> Self {
        Self::new(0.0, 1.0, -y0)
    }

    /// Vertical line `x = x0`.
    pub fn vertical(x0: Real) -> Self {
        Self::new(1.0, 0.0, -x0)
    }

    /// Line through two points.
    pub fn through(p: &Pt2, q: &Pt2) -> Result<Self, LineError> {
        let dx = q.x - p.x;
        let dy = q.y - p.y;
        if dx.abs() < EPS && dy.abs() < EPS {
            return Err(LineError::Degenerate);
        }
        // Normal is the direction rotated by 90 degrees.
        let a = dy;
        let b = -dx;
        Ok(Self::new(a, b, -(a * p.x + b * p.y)))
    }

    /// Orthogonal least-squares fit through a point set.
    ///
    /// The normal direction is the eigenvector of the scatter matrix with the
    /// smallest eigenvalue; the line passes through the centroid. Exact for
    /// collinear input.
    pub fn fit(points: &[Pt2]) -> Result<Self, LineError> {
        if points.len() < 2 {
            return Err(LineError::NotEnoughPoints(points.len()));
        }

        let n = points.len() as Real;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for p in points {
            cx += p.x;
            cy += p.y;
        }
        cx /= n;
        cy /= n;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut syy = 0.0;
        for p in points {
            let dx = p.x - cx;
            let dy = p.y - cy;
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        if sxx + syy < EPS {
            return Err(LineError::Degenerate);
        }

        let scatter = Matrix2::new(sxx, sxy, sxy, syy);
        let eig = scatter.symmetric_eigen();
        let idx = if eig.eigenvalues[0] <= eig.eigenvalues[1] {
            0
        } else {
            1
        };
        let normal = eig.eigenvectors.column(idx);
        let a = normal[0];
        let b = normal[1];
        Ok(Self::new(a, b, -(a * cx + b * cy)))
    }

    /// Evaluate `a·x + b·y + c` at a point.
    pub fn evaluate(&self, p: &Pt2) -> Real {
        self.a * p.x + self.b * p.y + self.c
    }

    /// Signed perpendicular distance from a point to the line.
    pub fn signed_distance(&self, p: &Pt2) -> Real {
        self.evaluate(p) / self.normal_norm()
    }

    /// Orthogonal projection of a point onto the line.
    pub fn project(&self, p: &Pt2) -> Pt2 {
        let n = self.normal_norm();
        let d = self.evaluate(p) / (n * n);
        Pt2::new(p.x - self.a * d, p.y - self.b * d)
    }

    /// Intersection with another line; `None` when (near) parallel.
    pub fn intersect(&self, other: &Line2D) -> Option<Pt2> {
        let det = self.a * other.b - other.a * self.b;
        let scale = self.normal_norm() * other.normal_norm();
        if det.abs() <= EPS * scale.max(1.0) {
            return None;
        }
        let x = (self.b * other.c - other.b * self.c) / det;
        let y = (other.a * self.c - self.a * other.c) / det;
        Some(Pt2::new(x, y))
    }

    /// Same line with `√(a² + b²) = 1` and a canonical sign
    /// (`b > 0`, or `a > 0` when the line is vertical).
    pub fn normalized(&self) -> Self {
        let n = self.normal_norm();
        if n < EPS {
            return *self;
        }
        let mut s = 1.0 / n;
        if self.b < -EPS || (self.b.abs() <= EPS && self.a < 0.0) {
            s = -s;
        }
        Self::new(self.a * s, self.b * s, self.c * s)
    }

    fn normal_norm(&self) -> Real {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}
