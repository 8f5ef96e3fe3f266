//! 2D geometry used by the distortion fit: lines and conics.

pub mod line;
pub mod quadric;

pub use line::Line2D;
pub use quadric::Quadric;
