//! Radial lens-distortion models.
//!
//! A model maps a measured (distorted) point to its undistorted position by
//! rescaling its radius around an estimated distortion center, with the y
//! offset stretched by an aspect ratio before the radius is taken. Variants
//! share the [`RadialDistortionModel`] contract and differ only in the radius
//! mapping: [`RationalModel`] uses a rational function of the squared radius,
//! [`PolynomialModel`] an even polynomial.
//!
//! The module also carries the two helpers the line-straightness fit needs:
//! distortion-direction classification and quadric-free initial-parameter
//! seeding from raw line point sets.

pub mod polynomial;
pub mod rational;

pub use polynomial::PolynomialModel;
pub use rational::RationalModel;

use anyhow::{ensure, Result};
use nalgebra::DVector;

use gridcal_core::{Line2D, Pt2, Real, Vec2};

/// Radii below this are treated as the center itself (identity mapping).
pub const RADIUS_EPS: Real = 1e-12;

const NEWTON_MAX_STEPS: usize = 32;
const NEWTON_TOL: Real = 1e-14;

/// Which way a bent calibration line says the lens pulls image points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DistortionDirection {
    /// Barrel-like: both line endpoints sit closer to the center than their
    /// projections onto the fitted line.
    TowardCenter,
    /// Cushion-like: both endpoints sit farther than their projections.
    AwayFromCenter,
    /// Endpoints disagree, or lie on the line within tolerance.
    None,
}

/// Radial distortion model: a coefficient vector, a distortion center, and a
/// pixel aspect ratio, plus the radius mapping they define.
///
/// `map_radius` and `radius_gradient` are the variant-specific pieces; point
/// mappings and the Newton inversion are shared provided methods.
pub trait RadialDistortionModel {
    fn coefficient_count(&self) -> usize;
    fn coefficients(&self) -> DVector<Real>;
    fn set_coefficients(&mut self, coeffs: &[Real]) -> Result<()>;
    fn center(&self) -> Pt2;
    fn set_center(&mut self, center: Pt2);
    fn aspect(&self) -> Real;

    /// Map a distorted radius to the corresponding undistorted radius.
    fn map_radius(&self, r: Real) -> Real;

    /// Partial derivatives of [`map_radius`](Self::map_radius) with respect
    /// to the coefficient vector.
    fn radius_gradient(&self, r: Real, out: &mut DVector<Real>);

    /// Undistort a measured point.
    fn undistort(&self, p: &Pt2) -> Pt2 {
        let c = self.center();
        let aspect = self.aspect();
        let q = Vec2::new(p.x - c.x, (p.y - c.y) * aspect);
        let r_d = q.norm();
        if r_d < RADIUS_EPS {
            return *p;
        }
        let s = self.map_radius(r_d) / r_d;
        Pt2::new(c.x + q.x * s, c.y + q.y * s / aspect)
    }

    /// Distort an undistorted point by inverting the radius mapping with a
    /// Newton iteration seeded at the input radius.
    fn distort(&self, p: &Pt2) -> Pt2 {
        let c = self.center();
        let aspect = self.aspect();
        let q = Vec2::new(p.x - c.x, (p.y - c.y) * aspect);
        let r_u = q.norm();
        if r_u < RADIUS_EPS {
            return *p;
        }
        let r_d = self.invert_radius(r_u);
        let s = r_d / r_u;
        Pt2::new(c.x + q.x * s, c.y + q.y * s / aspect)
    }

    /// Distorted radius whose mapping equals `r_u`.
    fn invert_radius(&self, r_u: Real) -> Real {
        let mut r = r_u;
        for _ in 0..NEWTON_MAX_STEPS {
            let f = self.map_radius(r) - r_u;
            if f.abs() < NEWTON_TOL * (1.0 + r_u) {
                break;
            }
            let h = 1e-7 * (1.0 + r);
            let df = (self.map_radius(r + h) - self.map_radius(r - h)) / (2.0 * h);
            if df.abs() < RADIUS_EPS {
                break;
            }
            r -= f / df;
            if r < 0.0 {
                r = 0.0;
            }
        }
        r
    }
}

/// One evaluated observation: the measured point, its undistorted position,
/// both radii, and the partial derivatives of the undistorted coordinates
/// with respect to the fit parameters `[coefficients.., center.x, center.y]`.
///
/// Recomputed whenever parameters or the input point change; never cached
/// across evaluations.
#[derive(Debug, Clone)]
pub struct DistortionPoint {
    pub raw: Pt2,
    pub undistorted: Pt2,
    pub radius_distorted: Real,
    pub radius_undistorted: Real,
    pub gradient_x: DVector<Real>,
    pub gradient_y: DVector<Real>,
}

/// Evaluate one point under a model, with coefficient gradients computed
/// analytically and center gradients by central differences of width `step`.
pub fn evaluate_point<M>(model: &M, p: &Pt2, step: Real) -> DistortionPoint
where
    M: RadialDistortionModel + Clone,
{
    let c = model.center();
    let aspect = model.aspect();
    let q = Vec2::new(p.x - c.x, (p.y - c.y) * aspect);
    let r_d = q.norm();

    let n = model.coefficient_count();
    let mut gradient_x = DVector::zeros(n + 2);
    let mut gradient_y = DVector::zeros(n + 2);

    if r_d < RADIUS_EPS {
        return DistortionPoint {
            raw: *p,
            undistorted: *p,
            radius_distorted: r_d,
            radius_undistorted: r_d,
            gradient_x,
            gradient_y,
        };
    }

    let r_u = model.map_radius(r_d);
    let undistorted = model.undistort(p);

    // The undistorted offset is q · r_u / r_d, so coefficient derivatives
    // scale the unit offset by d r_u / d coeff.
    let mut radius_grad = DVector::zeros(n);
    model.radius_gradient(r_d, &mut radius_grad);
    for k in 0..n {
        gradient_x[k] = q.x / r_d * radius_grad[k];
        gradient_y[k] = q.y / r_d * radius_grad[k] / aspect;
    }

    for axis in 0..2 {
        let mut shift = Vec2::zeros();
        shift[axis] = step;
        let mut plus = model.clone();
        plus.set_center(Pt2::new(c.x + shift.x, c.y + shift.y));
        let mut minus = model.clone();
        minus.set_center(Pt2::new(c.x - shift.x, c.y - shift.y));
        let up = plus.undistort(p);
        let um = minus.undistort(p);
        gradient_x[n + axis] = (up.x - um.x) / (2.0 * step);
        gradient_y[n + axis] = (up.y - um.y) / (2.0 * step);
    }

    DistortionPoint {
        raw: *p,
        undistorted,
        radius_distorted: r_d,
        radius_undistorted: r_u,
        gradient_x,
        gradient_y,
    }
}

/// Classify the distortion direction of one bent line.
///
/// Both endpoints closer to the center than their projections onto `line`
/// means the lens pulled the line toward the center (barrel); both farther
/// means it pushed the line away (cushion); anything else is undetermined.
pub fn classify_direction(points: &[Pt2], line: &Line2D, center: &Pt2) -> DistortionDirection {
    if points.len() < 2 {
        return DistortionDirection::None;
    }
    let mut toward = true;
    let mut away = true;
    for p in [&points[0], &points[points.len() - 1]] {
        let proj = line.project(p);
        let dp = (p - center).norm();
        let dj = (proj - center).norm();
        let eps = 1e-12 * (1.0 + dj);
        if dp < dj - eps {
            away = false;
        } else if dp > dj + eps {
            toward = false;
        } else {
            toward = false;
            away = false;
        }
    }
    if toward {
        DistortionDirection::TowardCenter
    } else if away {
        DistortionDirection::AwayFromCenter
    } else {
        DistortionDirection::None
    }
}

/// Estimate a distortion center and a leading radial coefficient from raw
/// line point sets, good enough to seed the nonlinear fit.
///
/// The center estimate is the centroid of all points. Each line contributes
/// its bow magnitude (largest chord sagitta over anchor radius cubed) and a
/// direction vote; the votes fix the coefficient's sign.
pub fn seed_from_lines(lines: &[Vec<Pt2>]) -> Result<(Pt2, Real)> {
    let total: usize = lines.iter().map(|l| l.len()).sum();
    ensure!(total > 0, "cannot seed a distortion model from empty lines");

    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in lines.iter().flatten() {
        cx += p.x;
        cy += p.y;
    }
    let center = Pt2::new(cx / total as Real, cy / total as Real);

    let mut votes = 0i64;
    let mut magnitude_sum = 0.0;
    let mut magnitude_count = 0usize;
    for line in lines {
        if line.len() < 3 {
            continue;
        }
        let chord = match Line2D::through(&line[0], &line[line.len() - 1]) {
            Ok(l) => l,
            Err(_) => continue,
        };

        let mut sagitta = 0.0;
        let mut anchor = line[0];
        for p in &line[1..line.len() - 1] {
            let d = chord.signed_distance(p).abs();
            if d > sagitta {
                sagitta = d;
                anchor = *p;
            }
        }
        let r = (anchor - center).norm();
        if r > RADIUS_EPS && sagitta > 0.0 {
            magnitude_sum += sagitta / r.powi(3);
            magnitude_count += 1;
        }

        match classify_direction(line, &chord, &center) {
            DistortionDirection::TowardCenter => votes += 1,
            DistortionDirection::AwayFromCenter => votes -= 1,
            DistortionDirection::None => {}
        }
    }

    let magnitude = if magnitude_count > 0 {
        magnitude_sum / magnitude_count as Real
    } else {
        0.0
    };
    let coefficient = match votes.cmp(&0) {
        std::cmp::Ordering::Greater => magnitude,
        std::cmp::Ordering::Less => -magnitude,
        std::cmp::Ordering::Equal => 0.0,
    };
    Ok((center, coefficient))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Sample straight lines and bend them through `model.distort`, producing
    /// the measured point sets a camera with that lens would deliver.
    pub fn distorted_lines<M>(model: &M) -> Vec<Vec<Pt2>>
    where
        M: RadialDistortionModel,
    {
        let mut lines = Vec::new();
        for &offset in &[-0.6, -0.35, 0.35, 0.6] {
            let mut horizontal = Vec::new();
            let mut vertical = Vec::new();
            for i in 0..11 {
                let t = -0.75 + 0.15 * i as Real;
                horizontal.push(model.distort(&Pt2::new(t, offset)));
                vertical.push(model.distort(&Pt2::new(offset, t)));
            }
            lines.push(horizontal);
            lines.push(vertical);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barrel_model() -> RationalModel {
        RationalModel::new(0.08, 0.0, Pt2::new(0.0, 0.0), 1.0)
    }

    fn cushion_model() -> RationalModel {
        RationalModel::new(-0.08, 0.0, Pt2::new(0.0, 0.0), 1.0)
    }

    #[test]
    fn barrel_lines_classify_toward_center() {
        let model = barrel_model();
        let center = model.center();
        for line in test_support::distorted_lines(&model) {
            let fit = Line2D::fit(&line).unwrap();
            assert_eq!(
                classify_direction(&line, &fit, &center),
                DistortionDirection::TowardCenter,
                "line {:?}",
                line[0]
            );
        }
    }

    #[test]
    fn cushion_lines_classify_away_from_center() {
        let model = cushion_model();
        let center = model.center();
        for line in test_support::distorted_lines(&model) {
            let fit = Line2D::fit(&line).unwrap();
            assert_eq!(
                classify_direction(&line, &fit, &center),
                DistortionDirection::AwayFromCenter
            );
        }
    }

    #[test]
    fn straight_lines_classify_as_none() {
        let identity = RationalModel::new(0.0, 0.0, Pt2::new(0.0, 0.0), 1.0);
        let center = identity.center();
        for line in test_support::distorted_lines(&identity) {
            let fit = Line2D::fit(&line).unwrap();
            assert_eq!(
                classify_direction(&line, &fit, &center),
                DistortionDirection::None
            );
        }
    }

    #[test]
    fn seeding_recovers_coefficient_sign_and_rough_center() {
        let model = RationalModel::new(0.08, 0.0, Pt2::new(0.05, -0.03), 1.0);
        let lines = test_support::distorted_lines(&model);
        let (center, coeff) = seed_from_lines(&lines).unwrap();
        assert!(coeff > 0.0, "expected a positive seed, got {}", coeff);
        assert!((center - model.center()).norm() < 0.2, "center {:?}", center);

        let cushion = RationalModel::new(-0.08, 0.0, Pt2::new(0.0, 0.0), 1.0);
        let (_, coeff) = seed_from_lines(&test_support::distorted_lines(&cushion)).unwrap();
        assert!(coeff < 0.0, "expected a negative seed, got {}", coeff);
    }

    #[test]
    fn analytic_coefficient_gradients_match_finite_differences() {
        let model = RationalModel::new(0.05, -0.02, Pt2::new(0.1, -0.05), 1.02);
        let p = Pt2::new(0.7, -0.4);
        let eval = evaluate_point(&model, &p, 1e-6);

        let h = 1e-7;
        for k in 0..model.coefficient_count() {
            let mut coeffs = model.coefficients();
            coeffs[k] += h;
            let mut plus = model.clone();
            plus.set_coefficients(coeffs.as_slice()).unwrap();
            coeffs[k] -= 2.0 * h;
            let mut minus = model.clone();
            minus.set_coefficients(coeffs.as_slice()).unwrap();

            let num_x = (plus.undistort(&p).x - minus.undistort(&p).x) / (2.0 * h);
            let num_y = (plus.undistort(&p).y - minus.undistort(&p).y) / (2.0 * h);
            assert!(
                (eval.gradient_x[k] - num_x).abs() < 1e-5,
                "x gradient {}: analytic {} vs numeric {}",
                k,
                eval.gradient_x[k],
                num_x
            );
            assert!((eval.gradient_y[k] - num_y).abs() < 1e-5);
        }
    }

    #[test]
    fn center_point_maps_to_itself_with_zero_gradients() {
        let model = barrel_model();
        let eval = evaluate_point(&model, &model.center(), 1e-6);
        assert_eq!(eval.undistorted, model.center());
        assert_eq!(eval.radius_distorted, 0.0);
        assert!(eval.gradient_x.iter().all(|g| *g == 0.0));
    }
}
