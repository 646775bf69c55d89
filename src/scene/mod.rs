//! Scene data
//!
//! The scene is fixed: one cube, one camera and a Y-axis spin.

mod camera;
mod cube;
mod rotation;

pub use camera::*;
pub use cube::*;
pub use rotation::*;
