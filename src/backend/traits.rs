//! Core device abstraction traits
//!
//! The renderer never touches a global device. Every component receives a
//! `&dyn GpuDevice` and talks to the GPU only through these traits, so the
//! same code runs against the headless wgpu device and the recording
//! [`DummyDevice`](super::DummyDevice) used in tests.

use crate::backend::types::*;
use crate::commands::CommandList;
use crate::feedback::OverlayCanvas;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Failed to submit command list: {0}")]
    SubmissionFailed(String),
    #[error("Failed to map buffer: {0}")]
    MapFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Exclusive access to one presentation image for the 2D overlay pass.
///
/// Handed out by [`Compositor::acquire_shared_target`] and consumed by
/// [`Compositor::release_shared_target`]. Not cloneable, so a target can only
/// be released once.
#[derive(Debug, PartialEq, Eq)]
pub struct SharedTarget {
    frame: u32,
    color: ResourceId,
}

impl SharedTarget {
    pub(crate) fn new(frame: u32, color: ResourceId) -> Self {
        Self { frame, color }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn color(&self) -> ResourceId {
        self.color
    }
}

/// Second rendering pass layered over the presentation chain.
///
/// The rasterization pass hands a presentation image back in the `Present`
/// state; the compositor acquires it, draws, and releases it before it is
/// presented.
pub trait Compositor {
    /// Take ownership of the presentation image for `frame`.
    fn acquire_shared_target(&self, frame: u32) -> BackendResult<SharedTarget>;

    /// Blend a premultiplied BGRA canvas into the top-left corner of the target.
    fn draw_overlay(&self, target: &SharedTarget, canvas: &OverlayCanvas) -> BackendResult<()>;

    /// Give the image back to the presentation chain.
    fn release_shared_target(&self, target: SharedTarget) -> BackendResult<()>;
}

/// GPU device, queue and presentation chain.
pub trait GpuDevice: Compositor + Send + Sync {
    /// Human readable backend name
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> DeviceCapabilities;

    // === Resource creation ===

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> BackendResult<ResourceId>;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> BackendResult<ResourceId>;

    /// Create a min-mip feedback map tracking `descriptor.paired`.
    ///
    /// Returns [`BackendError::FeatureNotSupported`] when
    /// `capabilities().sampler_feedback` is false. The map starts in the
    /// `UnorderedAccess` state.
    fn create_feedback_map(&self, descriptor: &FeedbackMapDescriptor) -> BackendResult<ResourceId>;

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineId>;

    /// Copy bytes into a persistently mapped upload buffer.
    fn write_mapped(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Read bytes from a readback buffer.
    ///
    /// Does not wait for the GPU: the contents are whatever the last completed
    /// copy into the buffer produced.
    fn read_mapped(&self, buffer: ResourceId, offset: u64, len: u64) -> BackendResult<Vec<u8>>;

    /// Release a buffer, texture or feedback map.
    ///
    /// Callers must only do this once the GPU no longer references the
    /// resource, see [`GpuDevice::wait_for_idle`].
    fn destroy(&self, resource: ResourceId) -> BackendResult<()>;

    fn destroy_pipeline(&self, pipeline: PipelineId) -> BackendResult<()>;

    // === Submission ===

    /// Execute a closed command list on the queue. Lists run in submission order.
    fn submit(&self, commands: &CommandList) -> BackendResult<SubmissionIndex>;

    /// Block until every submitted list has finished executing.
    fn wait_for_idle(&self) -> BackendResult<GpuIdle>;

    // === Presentation chain ===

    fn output_size(&self) -> Extent2d;

    /// Number of presentation images, which is also the pipeline depth.
    fn frame_count(&self) -> u32;

    fn current_frame_index(&self) -> u32;

    fn presentation_target(&self, frame: u32) -> BackendResult<PresentationTarget>;

    /// Present the current image and advance to the next frame index.
    fn present(&self) -> BackendResult<()>;
}
