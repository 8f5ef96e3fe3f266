//! Camera projection matrix and its intrinsic/rotation/translation factors.
//!
//! The 3×4 matrix `P ~ K [R | t]` is the quantity the calibration actually
//! estimates; the decomposition is recovered afterwards via RQ factorization
//! of the leading 3×3 block.

use thiserror::Error;

use crate::math::{to_homogeneous_3d, Mat3, Mat34, Pt2, Pt3, Real, Vec3};

/// Errors raised when decomposing a projection matrix.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CameraError {
    /// The recovered intrinsics matrix is singular.
    #[error("intrinsics matrix is not invertible")]
    IntrinsicsNotInvertible,
    /// The leading 3×3 block is rank deficient.
    #[error("projection matrix has a degenerate 3x3 block")]
    DegenerateMatrix,
}

/// RQ decomposition of a 3×3 matrix into `(K, R)` with `K` upper-triangular.
///
/// The first two diagonal entries of `K` are forced non-negative by negating
/// the matching row of `R` (sign-ambiguity resolution); `K[2,2]` keeps its
/// sign for the caller to normalize.
pub fn rq_decompose(m: &Mat3) -> (Mat3, Mat3) {
    // Flip rows/columns so nalgebra's QR produces the RQ factors.
    let j = Mat3::new(0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0);

    let qr = (j * m.transpose() * j).qr();
    let mut k = j * qr.r().transpose() * j;
    let mut r = j * qr.q().transpose() * j;

    for i in 0..2 {
        if k[(i, i)] < 0.0 {
            for c in 0..3 {
                k[(c, i)] = -k[(c, i)];
                r[(i, c)] = -r[(i, c)];
            }
        }
    }

    (k, r)
}

/// A 3×4 projection matrix together with its decomposed factors.
///
/// Lifecycle: built from a linear estimate, mutated across optimizer
/// iterations as a raw matrix, and finalized by [`Camera::from_matrix`].
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Projection matrix, `P ~ K [R | t]`.
    pub p: Mat34,
    /// Upper-triangular intrinsics with `K[2,2] = 1`.
    pub k: Mat3,
    /// Rotation matrix (orthonormal, `det = +1`).
    pub r: Mat3,
    /// Translation in camera coordinates.
    pub t: Vec3,
}

impl Camera {
    /// Decompose a projection matrix into intrinsics, rotation, translation.
    pub fn from_matrix(p: Mat34) -> Result<Self, CameraError> {
        let m = p.fixed_view::<3, 3>(0, 0).into_owned();
        if m.determinant().abs() < 1e-300 {
            return Err(CameraError::DegenerateMatrix);
        }

        let (mut k, mut r) = rq_decompose(&m);
        let mut p = p;

        if k[(2, 2)] < 0.0 {
            k = -k;
            r = -r;
        }
        // Fix the projective scale so K[2,2] = 1.
        let scale = k[(2, 2)];
        if scale.abs() < 1e-300 {
            return Err(CameraError::IntrinsicsNotInvertible);
        }
        k /= scale;
        p /= scale;

        let k_inv = k
            .try_inverse()
            .ok_or(CameraError::IntrinsicsNotInvertible)?;
        let mut t: Vec3 = k_inv * p.column(3);

        if r.determinant() < 0.0 {
            r = -r;
            t = -t;
            p = -p;
        }

        Ok(Self { p, k, r, t })
    }

    /// Compose a camera from known factors.
    pub fn from_factors(k: &Mat3, r: &Mat3, t: &Vec3) -> Self {
        let mut p = Mat34::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&(k * r));
        p.set_column(3, &(k * t));
        Self {
            p,
            k: *k,
            r: *r,
            t: *t,
        }
    }

    /// Compose a camera from intrinsics, rotation, and optical center.
    pub fn looking_from(k: &Mat3, r: &Mat3, center: &Pt3) -> Self {
        let t = -(r * center.coords);
        Self::from_factors(k, r, &t)
    }

    /// Project a 3D point; `None` when the point maps to the plane at infinity.
    pub fn project(&self, world: &Pt3) -> Option<Pt2> {
        project_with(&self.p, world)
    }

    /// Pixel distance between a measured image point and the reprojection of
    /// its known 3D position.
    pub fn reprojection_error(&self, world: &Pt3, image: &Pt2) -> Option<Real> {
        let proj = self.project(world)?;
        Some((proj - image).norm())
    }

    /// Optical center `C = -Rᵀ·t`.
    pub fn center(&self) -> Pt3 {
        Pt3::from(-(self.r.transpose() * self.t))
    }

    /// Normalized skew entry of the intrinsics.
    pub fn skew(&self) -> Real {
        self.k[(0, 1)]
    }
}

/// Project a 3D point through a raw projection matrix.
pub fn project_with(p: &Mat34, world: &Pt3) -> Option<Pt2> {
    let h = p * to_homogeneous_3d(world);
    if h.z.abs() < 1e-12 {
        return None;
    }
    Some(Pt2::new(h.x / h.z, h.y / h.z))
}
