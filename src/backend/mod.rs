//! Device abstraction layer
//!
//! Provides the [`GpuDevice`] trait and the devices implementing it: a
//! recording [`DummyDevice`] and, behind the `wgpu-backend` feature, a headless
//! wgpu device.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use dummy::{CompositorEvent, DummyDevice, DummyDeviceConfig, FeedbackPattern, MappedWrite};
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::{WgpuDevice, WgpuDeviceConfig};
