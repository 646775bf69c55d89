//! Sampler Feedback Renderer - a spinning textured cube with mip streaming
//!
//! The renderer uploads a cube and a mip-mapped texture through staging
//! buffers, draws the cube every frame from multi-buffered constant slots and,
//! when the device supports sampler feedback, resolves the per-tile mip usage
//! recorded during the draw and paints it as a debug overlay.
//!
//! Two devices implement [`backend::GpuDevice`]:
//! - **Dummy**: a recording, validating CPU device used by the tests
//! - **wgpu**: a headless wgpu device (`wgpu-backend` feature, on by default)
//!
//! # Features
//! - Explicit per-resource state tracking with idempotent transitions
//! - Staged uploads released only against a GPU idle token
//! - Frame recorder state machine
//! - Sampler feedback resolve, readback and overlay composition

pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod feedback;
pub mod image_loader;
pub mod renderer;
pub mod resources;
pub mod scene;

pub use backend::{DummyDevice, DummyDeviceConfig, GpuDevice};
#[cfg(feature = "wgpu-backend")]
pub use backend::{WgpuDevice, WgpuDeviceConfig};
pub use config::{CameraConfig, RendererConfig};
pub use error::{RendererError, RendererResult};
pub use renderer::SceneRenderer;
