//! Recorded GPU commands.
//!
//! A [`CommandList`] is a plain ordered list of [`Command`]s. Devices execute
//! them in order on submission; nothing touches the GPU while recording.

mod recorder;

pub use recorder::{FrameRecorder, RecorderState};

use crate::backend::{IndexFormat, PipelineId, ResourceId, TextureFootprint};
use crate::error::{RendererError, RendererResult};
use crate::resources::{ResourceState, TrackedResource};

/// Resources bound to the single descriptor table of the cube pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTable {
    /// Upload buffer holding the per-frame constant slots.
    pub constants: ResourceId,
    /// Byte offset of the active frame's slot.
    pub constant_offset: u64,
    pub constant_size: u64,
    pub texture: ResourceId,
    /// Feedback map written while sampling `texture`, if feedback is active.
    pub feedback: Option<ResourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A single recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetPipeline(PipelineId),
    SetBindingTable(BindingTable),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    /// Usage state transition. Only emitted through [`CommandList::transition`]
    /// and [`CommandList::transition_from`].
    Barrier {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    ClearColor {
        target: ResourceId,
        color: [f32; 4],
    },
    ClearDepth {
        target: ResourceId,
        depth: f32,
    },
    SetRenderTargets {
        color: ResourceId,
        depth: ResourceId,
    },
    SetVertexBuffer {
        buffer: ResourceId,
        stride: u64,
    },
    SetIndexBuffer {
        buffer: ResourceId,
        format: IndexFormat,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyBuffer {
        src: ResourceId,
        dst: ResourceId,
        size: u64,
    },
    /// Copy a placed footprint from a buffer into one mip level.
    CopyBufferToTexture {
        src: ResourceId,
        footprint: TextureFootprint,
        dst: ResourceId,
        mip_level: u32,
    },
    /// Decode a min-mip feedback map into an `R8Uint` texture, one byte per tile.
    ResolveFeedback {
        feedback: ResourceId,
        decode: ResourceId,
    },
    /// Copy mip 0 of a texture into a buffer with the given placed footprint.
    CopyTextureToBuffer {
        src: ResourceId,
        dst: ResourceId,
        footprint: TextureFootprint,
    },
}

impl Command {
    /// Resources this command reads or writes.
    pub fn resources(&self) -> Vec<ResourceId> {
        match self {
            Command::SetBindingTable(table) => {
                let mut ids = vec![table.constants, table.texture];
                ids.extend(table.feedback);
                ids
            }
            Command::Barrier { resource, .. } => vec![*resource],
            Command::ClearColor { target, .. } | Command::ClearDepth { target, .. } => {
                vec![*target]
            }
            Command::SetRenderTargets { color, depth } => vec![*color, *depth],
            Command::SetVertexBuffer { buffer, .. } | Command::SetIndexBuffer { buffer, .. } => {
                vec![*buffer]
            }
            Command::CopyBuffer { src, dst, .. }
            | Command::CopyBufferToTexture { src, dst, .. }
            | Command::CopyTextureToBuffer { src, dst, .. } => vec![*src, *dst],
            Command::ResolveFeedback { feedback, decode } => vec![*feedback, *decode],
            Command::SetPipeline(_)
            | Command::SetViewport(_)
            | Command::SetScissor(_)
            | Command::DrawIndexed { .. } => Vec::new(),
        }
    }
}

/// An ordered sequence of commands for one submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    label: String,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop all recorded commands, keeping the allocation.
    pub fn reset(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.commands.clear();
    }

    /// Append a non-barrier command.
    ///
    /// Barriers must go through [`Self::transition`] or [`Self::transition_from`]
    /// so the tracked state stays in sync; pushing one directly is an
    /// invariant violation and records nothing.
    pub fn push(&mut self, command: Command) -> RendererResult<()> {
        if let Command::Barrier { resource, .. } = &command {
            return Err(RendererError::invariant(format!(
                "barrier for {:?} pushed into '{}' without a tracked transition",
                resource, self.label
            )));
        }
        self.commands.push(command);
        Ok(())
    }

    /// Move `resource` into `after`, recording a barrier only if its tracked
    /// state differs. Returns whether a barrier was recorded.
    pub fn transition(&mut self, resource: &mut TrackedResource, after: ResourceState) -> bool {
        let before = resource.state();
        if before == after {
            return false;
        }
        self.record_barrier(resource, before, after);
        true
    }

    /// Move `resource` from `expected` into `after`.
    ///
    /// The tracked state must be `expected`; anything else means the
    /// recording logic lost track of the resource and is reported as an
    /// invariant violation without recording anything.
    pub fn transition_from(
        &mut self,
        resource: &mut TrackedResource,
        expected: ResourceState,
        after: ResourceState,
    ) -> RendererResult<()> {
        Self::require_state(resource, expected)?;
        self.transition(resource, after);
        Ok(())
    }

    /// Check that an operation about to be recorded finds `resource` in `expected`.
    pub fn require_state(resource: &TrackedResource, expected: ResourceState) -> RendererResult<()> {
        if resource.state() != expected {
            return Err(RendererError::invariant(format!(
                "{} ({}) is in {:?}, expected {:?}",
                resource.label(),
                resource.id(),
                resource.state(),
                expected
            )));
        }
        Ok(())
    }

    fn record_barrier(
        &mut self,
        resource: &mut TrackedResource,
        before: ResourceState,
        after: ResourceState,
    ) {
        log::trace!(
            "{}: barrier {} {:?} -> {:?}",
            self.label,
            resource.label(),
            before,
            after
        );
        self.commands.push(Command::Barrier {
            resource: resource.id(),
            before,
            after,
        });
        resource.set_state(after);
    }

    /// Number of barriers recorded for `resource`.
    pub fn barrier_count(&self, resource: ResourceId) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Barrier { resource: r, .. } if *r == resource))
            .count()
    }
}
