//! Calibration observations and calibration-grid geometry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{Pt2, Pt3, Real};

/// Errors raised by grid lookups.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GridError {
    /// A cell index is outside the grid.
    #[error("cell ({row}, {col}) outside a {rows}x{cols} grid")]
    CellOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    /// A grid needs at least two rows and two columns.
    #[error("grid must be at least 2x2, got {rows}x{cols}")]
    TooSmall { rows: usize, cols: usize },
}

/// One observed correspondence: an image point, its known 3D position, and
/// the grid cell it came from.
///
/// Immutable once created; outlier elimination replaces the whole list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Measured pixel coordinate.
    pub image: Pt2,
    /// Measured 3D position of the grid cell.
    pub world: Pt3,
    /// Index of the grid this point belongs to.
    pub grid: usize,
    /// Cell row within the grid.
    pub row: usize,
    /// Cell column within the grid.
    pub col: usize,
}

/// The four 3D corners of a planar calibration pattern plus its cell counts.
///
/// Interior cell positions are bilinear combinations of the corners, so the
/// whole pattern is parameterized by 12 numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealGridData {
    pub top_left: Pt3,
    pub top_right: Pt3,
    pub bottom_left: Pt3,
    pub bottom_right: Pt3,
    pub rows: usize,
    pub cols: usize,
}

impl RealGridData {
    pub fn new(
        top_left: Pt3,
        top_right: Pt3,
        bottom_left: Pt3,
        bottom_right: Pt3,
        rows: usize,
        cols: usize,
    ) -> Result<Self, GridError> {
        if rows < 2 || cols < 2 {
            return Err(GridError::TooSmall { rows, cols });
        }
        Ok(Self {
            top_left,
            top_right,
            bottom_left,
            bottom_right,
            rows,
            cols,
        })
    }

    /// Bilinear interpolation of the 3D position of cell `(row, col)`.
    ///
    /// `(0, 0)` is the top-left corner, `(rows-1, cols-1)` the bottom-right.
    pub fn interpolate(&self, row: usize, col: usize) -> Result<Pt3, GridError> {
        if row >= self.rows || col >= self.cols {
            return Err(GridError::CellOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        let u = col as Real / (self.cols - 1) as Real;
        let v = row as Real / (self.rows - 1) as Real;

        let top = self.top_left.coords.lerp(&self.top_right.coords, u);
        let bottom = self.bottom_left.coords.lerp(&self.bottom_right.coords, u);
        Ok(Pt3::from(top.lerp(&bottom, v)))
    }

    /// Corners in parameter order: TL, TR, BL, BR.
    pub fn corners(&self) -> [Pt3; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }

    /// The 12-value corner layout used by the optimizer.
    pub fn corner_params(&self) -> [Real; 12] {
        let mut out = [0.0; 12];
        for (i, c) in self.corners().iter().enumerate() {
            out[3 * i] = c.x;
            out[3 * i + 1] = c.y;
            out[3 * i + 2] = c.z;
        }
        out
    }

    /// Overwrite the corners from a 12-value parameter slice.
    pub fn set_corner_params(&mut self, params: &[Real]) {
        debug_assert_eq!(params.len(), 12);
        self.top_left = Pt3::new(params[0], params[1], params[2]);
        self.top_right = Pt3::new(params[3], params[4], params[5]);
        self.bottom_left = Pt3::new(params[6], params[7], params[8]);
        self.bottom_right = Pt3::new(params[9], params[10], params[11]);
    }

    /// Apply a coordinate mapping to all four corners.
    pub fn map_corners(&self, f: impl Fn(&Pt3) -> Pt3) -> Self {
        Self {
            top_left: f(&self.top_left),
            top_right: f(&self.top_right),
            bottom_left: f(&self.bottom_left),
            bottom_right: f(&self.bottom_right),
            rows: self.rows,
            cols: self.cols,
        }
    }
}

impl CalibrationPoint {
    pub fn new(image: Pt2, world: Pt3, grid: usize, row: usize, col: usize) -> Self {
        Self {
            image,
            world,
            grid,
            row,
            col,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid() -> RealGridData {
        RealGridData::new(
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(1.0, 0.0, 0.0),
            Pt3::new(0.0, 1.0, 0.0),
            Pt3::new(1.0, 1.0, 0.0),
            5,
            5,
        )
        .unwrap()
    }

    #[test]
    fn corners_interpolate_to_themselves() {
        let g = unit_grid();
        assert_eq!(g.interpolate(0, 0).unwrap(), g.top_left);
        assert_eq!(g.interpolate(0, 4).unwrap(), g.top_right);
        assert_eq!(g.interpolate(4, 0).unwrap(), g.bottom_left);
        assert_eq!(g.interpolate(4, 4).unwrap(), g.bottom_right);
    }

    #[test]
    fn interior_cell_is_bilinear() {
        let g = unit_grid();
        let p = g.interpolate(2, 1).unwrap();
        assert!((p.x - 0.25).abs() < 1e-12);
        assert!((p.y - 0.5).abs() < 1e-12);
        assert!(p.z.abs() < 1e-12);
    }

    #[test]
    fn out_of_range_cell_is_rejected() {
        let g = unit_grid();
        assert!(matches!(
            g.interpolate(5, 0),
            Err(GridError::CellOutOfRange { .. })
        ));
    }

    #[test]
    fn corner_params_round_trip() {
        let g = unit_grid();
        let params = g.corner_params();
        let mut g2 = unit_grid();
        g2.set_corner_params(&params);
        assert_eq!(g, g2);
    }
}
