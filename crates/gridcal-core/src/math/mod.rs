//! Mathematical utilities and type definitions.
//!
//! Provides the scalar and vector/matrix aliases used throughout the
//! workspace plus homogeneous-coordinate helpers.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Point3, Vector2, Vector3, Vector4};

pub mod linsys;

pub use linsys::{solve_dense, solve_homogeneous, LinSysError};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 4D vector with [`Real`] components.
pub type Vec4 = Vector4<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 3×4 camera projection matrix with [`Real`] entries.
pub type Mat34 = Matrix3x4<Real>;
/// 4×4 matrix with [`Real`] entries.
pub type Mat4 = Matrix4<Real>;

/// Lift a 2D point into homogeneous coordinates `(x, y, 1)`.
pub fn to_homogeneous_2d(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

/// Lift a 3D point into homogeneous coordinates `(x, y, z, 1)`.
pub fn to_homogeneous_3d(p: &Pt3) -> Vec4 {
    Vec4::new(p.x, p.y, p.z, 1.0)
}

/// Drop a homogeneous 2D vector `(x, y, w)` back to `(x/w, y/w)`.
///
/// The caller is responsible for ensuring that `w != 0`.
pub fn from_homogeneous_2d(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Drop a homogeneous 3D vector `(x, y, z, w)` back to Euclidean coordinates.
pub fn from_homogeneous_3d(v: &Vec4) -> Pt3 {
    Pt3::new(v.x / v.w, v.y / v.w, v.z / v.w)
}
