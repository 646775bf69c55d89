//! Resource management
//!
//! Handles state tracking, staged uploads into device memory, the streamed
//! mip-mapped texture and the per-frame constant store.

mod constants;
mod state;
mod texture;
mod upload;

pub use constants::*;
pub use state::*;
pub use texture::*;
pub use upload::*;
