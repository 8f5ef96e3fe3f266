//! Dense linear-system solving.
//!
//! Both solvers are SVD based so that rank-deficient systems yield a usable
//! (minimum-norm) answer instead of failing: the optimization engine relies
//! on this when the normal equations lose rank mid-iteration.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::Real;

/// Singular values below this fraction of the largest one are treated as zero.
const SV_EPS: Real = 1e-12;

/// Errors raised by the dense solvers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LinSysError {
    /// Matrix and right-hand side have incompatible shapes.
    #[error("dimension mismatch: matrix is {rows}x{cols}, rhs has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
    /// The system is empty.
    #[error("cannot solve an empty system")]
    Empty,
    /// SVD computation failed to produce the requested factors.
    #[error("svd failed")]
    SvdFailed,
}

/// Solve `A·x = b` in the least-squares sense.
///
/// Rank-deficient systems return the minimum-norm least-squares solution;
/// singular directions simply receive a zero component.
pub fn solve_dense(a: &DMatrix<Real>, b: &DVector<Real>) -> Result<DVector<Real>, LinSysError> {
    if a.nrows() == 0 || a.ncols() == 0 {
        return Err(LinSysError::Empty);
    }
    if a.nrows() != b.len() {
        return Err(LinSysError::DimensionMismatch {
            rows: a.nrows(),
            cols: a.ncols(),
            rhs: b.len(),
        });
    }

    let svd = a.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    svd.solve(b, max_sv * SV_EPS)
        .map_err(|_| LinSysError::SvdFailed)
}

/// Solve the homogeneous system `A·x = 0` for the minimum-norm unit solution.
///
/// Returns the right singular vector associated with the smallest singular
/// value, normalized to `‖x‖ = 1`.
pub fn solve_homogeneous(a: &DMatrix<Real>) -> Result<DVector<Real>, LinSysError> {
    if a.nrows() == 0 || a.ncols() == 0 {
        return Err(LinSysError::Empty);
    }

    let svd = a.clone().svd(false, true);
    let v_t = svd.v_t.ok_or(LinSysError::SvdFailed)?;
    let row = v_t.nrows() - 1;
    let mut x = DVector::<Real>::zeros(v_t.ncols());
    for c in 0..v_t.ncols() {
        x[c] = v_t[(row, c)];
    }
    let norm = x.norm();
    if norm > 0.0 {
        x /= norm;
    }
    Ok(x)
}
