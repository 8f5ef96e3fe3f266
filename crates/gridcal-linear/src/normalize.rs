//! Hartley normalization for 2D and 3D points.
//!
//! Centering the data and scaling the mean distance from the origin to `√2`
//! (2D) or `√3` (3D) conditions the DLT system; the same transforms later
//! denormalize the estimated camera matrix and rescale measurement variances
//! so the weighted error metric stays consistent in normalized coordinates.

use anyhow::{bail, Result};
use gridcal_core::{Mat3, Mat4, Pt2, Pt3, Real};

/// Similarity transform produced by 2D normalization.
#[derive(Debug, Clone, Copy)]
pub struct Normalization2d {
    /// Transform `T` with `p_norm = T · p_homogeneous`.
    pub transform: Mat3,
    /// Isotropic scale factor of the transform.
    pub scale: Real,
}

/// Similarity transform produced by 3D normalization.
#[derive(Debug, Clone, Copy)]
pub struct Normalization3d {
    /// Transform `T` with `p_norm = T · p_homogeneous`.
    pub transform: Mat4,
    /// Isotropic scale factor of the transform.
    pub scale: Real,
}

impl Normalization2d {
    pub fn apply(&self, p: &Pt2) -> Pt2 {
        let t = &self.transform;
        Pt2::new(
            t[(0, 0)] * p.x + t[(0, 2)],
            t[(1, 1)] * p.y + t[(1, 2)],
        )
    }

    /// Variance of a measurement expressed in normalized coordinates.
    pub fn scaled_variance(&self, variance: Real) -> Real {
        variance * self.scale * self.scale
    }
}

impl Normalization3d {
    pub fn apply(&self, p: &Pt3) -> Pt3 {
        let t = &self.transform;
        Pt3::new(
            t[(0, 0)] * p.x + t[(0, 3)],
            t[(1, 1)] * p.y + t[(1, 3)],
            t[(2, 2)] * p.z + t[(2, 3)],
        )
    }

    /// Inverse mapping, back to the measurement frame.
    pub fn invert(&self, p: &Pt3) -> Pt3 {
        let t = &self.transform;
        Pt3::new(
            (p.x - t[(0, 3)]) / t[(0, 0)],
            (p.y - t[(1, 3)]) / t[(1, 1)],
            (p.z - t[(2, 3)]) / t[(2, 2)],
        )
    }

    pub fn scaled_variance(&self, variance: Real) -> Real {
        variance * self.scale * self.scale
    }
}

/// Normalize 2D points so the centroid is at the origin and the mean distance
/// from it is `√2`.
pub fn normalize_points_2d(points: &[Pt2]) -> Result<(Vec<Pt2>, Normalization2d)> {
    if points.is_empty() {
        bail!("cannot normalize an empty point set");
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

    let mut mean_dist = 0.0;
    for p in points {
        mean_dist += ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt();
    }
    mean_dist /= n;
    if mean_dist <= Real::EPSILON {
        bail!("degenerate 2d point configuration: all points coincide");
    }

    let scale = (2.0_f64).sqrt() / mean_dist;
    let transform = Mat3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    );
    let norm = Normalization2d { transform, scale };
    let mapped = points.iter().map(|p| norm.apply(p)).collect();
    Ok((mapped, norm))
}

/// Normalize 3D points so the centroid is at the origin and the mean distance
/// from it is `√3`.
pub fn normalize_points_3d(points: &[Pt3]) -> Result<(Vec<Pt3>, Normalization3d)> {
    if points.is_empty() {
        bail!("cannot normalize an empty point set");
    }

    let n = points.len() as Real;
    let mut c = [0.0; 3];
    for p in points {
        c[0] += p.x;
        c[1] += p.y;
        c[2] += p.z;
    }
    for v in &mut c {
        *v /= n;
    }

    let mut mean_dist = 0.0;
    for p in points {
        mean_dist +=
            ((p.x - c[0]).powi(2) + (p.y - c[1]).powi(2) + (p.z - c[2]).powi(2)).sqrt();
    }
    mean_dist /= n;
    if mean_dist <= Real::EPSILON {
        bail!("degenerate 3d point configuration: all points coincide");
    }

    let scale = (3.0_f64).sqrt() / mean_dist;
    let mut transform = Mat4::identity();
    for i in 0..3 {
        transform[(i, i)] = scale;
        transform[(i, 3)] = -scale * c[i];
    }
    let norm = Normalization3d { transform, scale };
    let mapped = points.iter().map(|p| norm.apply(p)).collect();
    Ok((mapped, norm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_2d_points_have_expected_spread() {
        let points = vec![
            Pt2::new(100.0, 200.0),
            Pt2::new(200.0, 300.0),
            Pt2::new(150.0, 250.0),
            Pt2::new(180.0, 210.0),
        ];
        let (norm, _t) = normalize_points_2d(&points).unwrap();

        let n = norm.len() as Real;
        let cx: Real = norm.iter().map(|p| p.x).sum::<Real>() / n;
        let cy: Real = norm.iter().map(|p| p.y).sum::<Real>() / n;
        assert!(cx.abs() < 1e-10 && cy.abs() < 1e-10);

        let mean_dist: Real = norm.iter().map(|p| (p.x * p.x + p.y * p.y).sqrt()).sum::<Real>() / n;
        assert!((mean_dist - 2.0_f64.sqrt()).abs() < 1e-10, "{}", mean_dist);
    }

    #[test]
    fn normalized_3d_points_have_expected_spread() {
        let points = vec![
            Pt3::new(1.0, 2.0, 3.0),
            Pt3::new(4.0, 5.0, 6.0),
            Pt3::new(7.0, 8.0, 10.0),
        ];
        let (norm, t) = normalize_points_3d(&points).unwrap();

        let n = norm.len() as Real;
        let mean_dist: Real = norm
            .iter()
            .map(|p| (p.x * p.x + p.y * p.y + p.z * p.z).sqrt())
            .sum::<Real>()
            / n;
        assert!((mean_dist - 3.0_f64.sqrt()).abs() < 1e-10);

        // invert() undoes apply().
        let back = t.invert(&norm[1]);
        assert!((back - points[1]).norm() < 1e-12);
    }

    #[test]
    fn variance_scales_with_squared_factor() {
        let points = vec![Pt2::new(0.0, 0.0), Pt2::new(2.0, 0.0)];
        let (_, t) = normalize_points_2d(&points).unwrap();
        // mean distance from centroid is 1, so scale = sqrt(2).
        assert!((t.scale - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!((t.scaled_variance(0.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn coincident_points_are_rejected() {
        let points = vec![Pt2::new(1.0, 1.0); 4];
        assert!(normalize_points_2d(&points).is_err());
    }
}
