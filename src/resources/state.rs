//! Per-resource usage state tracking.
//!
//! Every GPU resource the renderer owns is wrapped in a [`TrackedResource`]
//! carrying the single [`ResourceState`] the GPU will see it in once all
//! recorded work has executed. The state can only change through
//! [`CommandList::transition`](crate::commands::CommandList::transition) or
//! [`CommandList::transition_from`](crate::commands::CommandList::transition_from),
//! which emit the barrier and update the field together.

use crate::backend::ResourceId;

/// The mode a resource is currently valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Destination of a copy.
    CopyDest,
    /// Source of a copy.
    CopySource,
    /// Readable by any stage. Upload memory lives here permanently.
    GenericRead,
    /// Vertex or constant buffer input.
    VertexBuffer,
    IndexBuffer,
    /// Written as a color attachment.
    RenderTarget,
    /// Owned by the presentation engine.
    Present,
    /// Read/write from shaders. Feedback maps are written here during draws.
    UnorderedAccess,
    ResolveSource,
    ResolveDest,
    /// Sampled in the pixel shader.
    PixelShaderResource,
    /// Depth attachment.
    DepthWrite,
}

/// A device resource together with its tracked usage state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedResource {
    id: ResourceId,
    label: String,
    state: ResourceState,
}

impl TrackedResource {
    pub fn new(id: ResourceId, label: impl Into<String>, state: ResourceState) -> Self {
        Self {
            id,
            label: label.into(),
            state,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }
}
