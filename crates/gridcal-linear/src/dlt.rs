//! Direct linear transform estimation of the 3×4 camera matrix.
//!
//! Each correspondence contributes two rows of the homogeneous system built
//! from `x × (P·X) = 0`; the minimum-norm unit solution is the estimate. The
//! raw variant expects pre-conditioned coordinates; the normalized variant
//! wraps it with Hartley normalization and denormalizes the result.

use anyhow::{bail, Context, Result};
use gridcal_core::{linsys, Mat34, Pt2, Pt3, Real};
use nalgebra::{DMatrix, DVector};

use crate::normalize::{normalize_points_2d, normalize_points_3d};

/// Minimum correspondences for the 11-dof system.
pub const MIN_POINTS: usize = 6;

/// Estimate `P` from raw correspondences (no internal normalization).
///
/// The output is defined up to a global scale with `‖P‖ = 1`.
pub fn estimate_camera_matrix(world: &[Pt3], image: &[Pt2]) -> Result<Mat34> {
    let n = world.len();
    if n < MIN_POINTS {
        bail!("need at least {} point correspondences, got {}", MIN_POINTS, n);
    }
    if n != image.len() {
        bail!(
            "mismatched number of world points ({}) and image points ({})",
            n,
            image.len()
        );
    }

    let mut a = DMatrix::<Real>::zeros(2 * n, 12);
    for (i, (pw, pi)) in world.iter().zip(image.iter()).enumerate() {
        let (x, y, z) = (pw.x, pw.y, pw.z);
        let (u, v) = (pi.x, pi.y);

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;

        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * x;
        a[(r1, 9)] = -v * y;
        a[(r1, 10)] = -v * z;
        a[(r1, 11)] = -v;
    }

    let x = linsys::solve_homogeneous(&a).context("DLT nullspace solve failed")?;
    Ok(mat34_from_vector(&x))
}

/// Estimate `P` with internal Hartley normalization and denormalization.
pub fn estimate_camera_matrix_normalized(world: &[Pt3], image: &[Pt2]) -> Result<Mat34> {
    let (world_n, t_w) = normalize_points_3d(world)?;
    let (image_n, t_i) = normalize_points_2d(image)?;

    let p_norm = estimate_camera_matrix(&world_n, &image_n)?;

    let t_i_inv = t_i
        .transform
        .try_inverse()
        .context("image normalization transform is not invertible")?;
    Ok(t_i_inv * p_norm * t_w.transform)
}

fn mat34_from_vector(x: &DVector<Real>) -> Mat34 {
    debug_assert_eq!(x.len(), 12);
    let mut m = Mat34::zeros();
    for r in 0..3 {
        for c in 0..4 {
            m[(r, c)] = x[4 * r + c];
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcal_core::camera::project_with;
    use gridcal_core::{Camera, Mat3, Vec3};
    use nalgebra::Rotation3;

    fn synthetic_scene() -> (Mat34, Vec<Pt3>, Vec<Pt2>) {
        let k = Mat3::new(900.0, 0.0, 640.0, 0.0, 880.0, 360.0, 0.0, 0.0, 1.0);
        let rot = Rotation3::from_euler_angles(0.15, -0.05, 0.1);
        let cam = Camera::from_factors(&k, rot.matrix(), &Vec3::new(0.1, -0.05, 1.2));

        let mut world = Vec::new();
        let mut image = Vec::new();
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    let pw = Pt3::new(x as Real * 0.2, y as Real * 0.15, 2.0 + z as Real * 0.1);
                    world.push(pw);
                    image.push(cam.project(&pw).unwrap());
                }
            }
        }
        (cam.p, world, image)
    }

    fn align_scale(estimate: &Mat34, reference: &Mat34) -> Mat34 {
        let dot: Real = reference
            .as_slice()
            .iter()
            .zip(estimate.as_slice().iter())
            .map(|(a, b)| a * b)
            .sum();
        let denom: Real = estimate.as_slice().iter().map(|v| v * v).sum();
        estimate * (dot / denom)
    }

    #[test]
    fn noise_free_estimate_matches_ground_truth_up_to_scale() {
        let (p_gt, world, image) = synthetic_scene();
        let p_est = estimate_camera_matrix_normalized(&world, &image).unwrap();
        let diff = (align_scale(&p_est, &p_gt) - p_gt).norm();
        assert!(diff < 1e-6, "camera matrix diff too large: {}", diff);
    }

    #[test]
    fn noise_free_estimate_reprojects_all_points() {
        let (_, world, image) = synthetic_scene();
        let p_est = estimate_camera_matrix_normalized(&world, &image).unwrap();
        for (pw, pi) in world.iter().zip(image.iter()) {
            let proj = project_with(&p_est, pw).unwrap();
            let err = (proj - pi).norm();
            assert!(err < 0.01 * pi.coords.norm(), "reprojection error {}", err);
        }
    }

    #[test]
    fn too_few_points_are_rejected() {
        let world = vec![Pt3::origin(); 5];
        let image = vec![Pt2::origin(); 5];
        assert!(estimate_camera_matrix(&world, &image).is_err());
    }
}
