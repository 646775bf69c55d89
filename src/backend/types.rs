//! Common types shared between devices

use bitflags::bitflags;

use crate::resources::ResourceState;

/// Handle to a GPU resource (buffer or texture) owned by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    /// Raw numeric value, for logging.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a compiled pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub(crate) u64);

/// Monotonic index of a submitted command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SubmissionIndex(pub u64);

/// Proof that the GPU finished every submission up to `completed`.
///
/// Only obtainable from [`GpuDevice::wait_for_idle`](super::GpuDevice::wait_for_idle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuIdle {
    completed: Option<SubmissionIndex>,
}

impl GpuIdle {
    pub(crate) fn new(completed: Option<SubmissionIndex>) -> Self {
        Self { completed }
    }

    /// Last submission known to be complete, if anything was submitted.
    pub fn completed(&self) -> Option<SubmissionIndex> {
        self.completed
    }

    /// Whether the given submission has finished executing.
    pub fn covers(&self, submission: SubmissionIndex) -> bool {
        self.completed.is_some_and(|done| submission <= done)
    }
}

/// Where a resource's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    /// Device-local memory, not CPU visible.
    Device,
    /// CPU-writable memory the GPU can read (staging, constants).
    Upload,
    /// CPU-readable memory the GPU can write (readback).
    Readback,
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 32-bit BGRA, premultiplied alpha as produced by the image decoder.
    Bgra8Unorm,
    /// One unsigned byte per texel (decoded feedback).
    R8Uint,
    Depth32Float,
    /// Opaque min-mip sampler feedback map.
    FeedbackMinMip,
}

impl TextureFormat {
    /// Bytes per texel for linear layouts. The feedback map has no CPU layout.
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            TextureFormat::Bgra8Unorm | TextureFormat::Depth32Float => Some(4),
            TextureFormat::R8Uint => Some(1),
            TextureFormat::FeedbackMinMip => None,
        }
    }
}

bitflags! {
    /// How a buffer may be used by the GPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const UNIFORM = 1 << 4;
    }
}

bitflags! {
    /// How a texture may be used by the GPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const RENDER_TARGET = 1 << 3;
        const DEPTH_STENCIL = 1 << 4;
        const UNORDERED_ACCESS = 1 << 5;
    }
}

/// Descriptor for buffer creation
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub domain: MemoryDomain,
    pub usage: BufferUsage,
    pub initial_state: ResourceState,
}

impl BufferDescriptor {
    /// Device-local buffer waiting for a copy.
    pub fn device(label: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(label.into()),
            size,
            domain: MemoryDomain::Device,
            usage: usage | BufferUsage::COPY_DST,
            initial_state: ResourceState::CopyDest,
        }
    }

    /// CPU-writable buffer the GPU reads from.
    pub fn upload(label: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(label.into()),
            size,
            domain: MemoryDomain::Upload,
            usage,
            initial_state: ResourceState::GenericRead,
        }
    }

    /// CPU-readable buffer the GPU copies into.
    pub fn readback(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: Some(label.into()),
            size,
            domain: MemoryDomain::Readback,
            usage: BufferUsage::COPY_DST,
            initial_state: ResourceState::CopyDest,
        }
    }

    pub fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed buffer")
    }
}

/// Descriptor for 2D texture creation
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_level_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
}

impl TextureDescriptor {
    pub fn new(
        label: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
        initial_state: ResourceState,
    ) -> Self {
        Self {
            label: Some(label.into()),
            width,
            height,
            mip_level_count: 1,
            format,
            usage,
            initial_state,
        }
    }

    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Size of the given mip level, never smaller than 1x1.
    pub fn mip_extent(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    pub fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed texture")
    }
}

/// Descriptor for a sampler feedback map paired with a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackMapDescriptor {
    pub label: Option<String>,
    /// The texture whose sampling is tracked.
    pub paired: ResourceId,
    pub paired_width: u32,
    pub paired_height: u32,
    pub paired_mip_levels: u32,
    /// Mip region (tile) size in texels.
    pub tile_width: u32,
    pub tile_height: u32,
}

/// Placed layout of a linear texture copy in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFootprint {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row in the buffer, padded to the copy pitch alignment.
    pub row_pitch: u32,
    pub bytes_per_pixel: u32,
}

impl TextureFootprint {
    /// Minimum row pitch alignment for buffer <-> texture copies.
    pub const PITCH_ALIGNMENT: u32 = 256;

    /// Footprint with a row pitch aligned to [`Self::PITCH_ALIGNMENT`].
    pub fn aligned(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let unpadded = width * bytes_per_pixel;
        let row_pitch = (unpadded + Self::PITCH_ALIGNMENT - 1) & !(Self::PITCH_ALIGNMENT - 1);
        Self {
            offset: 0,
            width,
            height,
            row_pitch,
            bytes_per_pixel,
        }
    }

    /// Tightly packed bytes in one row.
    pub fn packed_row_bytes(&self) -> u32 {
        self.width * self.bytes_per_pixel
    }

    /// Bytes needed in the buffer to hold this footprint.
    pub fn total_bytes(&self) -> u64 {
        self.offset + self.row_pitch as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// One image of the presentation chain with its depth buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationTarget {
    pub color: ResourceId,
    pub depth: ResourceId,
}

/// What the device can do, queried once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub sampler_feedback: bool,
    /// Minimum alignment of a constant buffer view offset.
    pub constant_buffer_alignment: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            sampler_feedback: false,
            constant_buffer_alignment: 256,
        }
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u64,
    pub location: u32,
}

/// What a binding table slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
}

/// Static sampler baked into the pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSampler {
    pub point_min_mag: bool,
    pub linear_mip: bool,
    /// Border addressing; devices without it fall back to clamp-to-edge.
    pub border_addressing: bool,
    pub max_lod: f32,
}

/// Fixed graphics pipeline description.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    pub label: Option<String>,
    pub vertex_stride: u64,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub bindings: Vec<BindingKind>,
    pub sampler: StaticSampler,
    pub color_format: TextureFormat,
    pub depth_format: TextureFormat,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}
