//! Dummy GPU device for testing and development.
//!
//! Executes command lists on the CPU instead of a GPU: copies move real bytes,
//! feedback resolves write a configurable tile pattern and every command is
//! checked against the actual state of the resources it touches. Anything a
//! real driver would reject (a barrier whose `before` does not match, a copy
//! into a resource that is not in `CopyDest`, use after destroy) is returned
//! as [`BackendError::InvalidCommand`]. Submissions complete immediately.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::commands::{BindingTable, Command, CommandList};
use crate::feedback::{OverlayCanvas, UNUSED_TILE};
use crate::resources::ResourceState;

use super::traits::*;
use super::types::*;

/// What a resolve writes into a decode texture for tiles the draw sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackPattern {
    /// Every tile reports the same raw value.
    Uniform(u8),
    /// `(x + y) % 6`, covering all mip colors.
    Gradient,
    /// Row-major raw values; tiles past the end read as unused.
    Explicit(Vec<u8>),
}

impl FeedbackPattern {
    fn value(&self, x: u32, y: u32, width: u32) -> u8 {
        match self {
            FeedbackPattern::Uniform(raw) => *raw,
            FeedbackPattern::Gradient => ((x + y) % 6) as u8,
            FeedbackPattern::Explicit(raw) => raw
                .get((y * width + x) as usize)
                .copied()
                .unwrap_or(UNUSED_TILE),
        }
    }
}

/// Dummy device configuration
#[derive(Debug, Clone)]
pub struct DummyDeviceConfig {
    pub frame_count: u32,
    pub output_size: Extent2d,
    pub sampler_feedback: bool,
    pub constant_buffer_alignment: u64,
    pub feedback_pattern: FeedbackPattern,
    /// Allocations whose label contains this string fail with `OutOfMemory`.
    pub failing_allocation: Option<String>,
}

impl Default for DummyDeviceConfig {
    fn default() -> Self {
        Self {
            frame_count: 3,
            output_size: Extent2d::new(1280, 720),
            sampler_feedback: false,
            constant_buffer_alignment: 256,
            feedback_pattern: FeedbackPattern::Gradient,
            failing_allocation: None,
        }
    }
}

impl DummyDeviceConfig {
    pub fn with_frame_count(mut self, count: u32) -> Self {
        self.frame_count = count;
        self
    }

    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.output_size = Extent2d::new(width, height);
        self
    }

    pub fn with_sampler_feedback(mut self, supported: bool) -> Self {
        self.sampler_feedback = supported;
        self
    }

    pub fn with_feedback_pattern(mut self, pattern: FeedbackPattern) -> Self {
        self.feedback_pattern = pattern;
        self
    }

    pub fn with_failing_allocation(mut self, label: impl Into<String>) -> Self {
        self.failing_allocation = Some(label.into());
        self
    }
}

/// A CPU write into mapped upload memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedWrite {
    pub resource: ResourceId,
    pub offset: u64,
    pub len: u64,
}

/// Calls into the compositor, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorEvent {
    Acquire(u32),
    Draw(u32),
    Release(u32),
}

#[derive(Debug)]
enum ResourceKind {
    Buffer {
        domain: MemoryDomain,
        bytes: Vec<u8>,
    },
    Texture {
        descriptor: TextureDescriptor,
        levels: Vec<Vec<u8>>,
    },
    FeedbackMap {
        descriptor: FeedbackMapDescriptor,
    },
}

#[derive(Debug)]
struct DummyResource {
    label: String,
    kind: ResourceKind,
    state: ResourceState,
    /// Owned by the presentation chain; cannot be destroyed.
    presentation: bool,
}

#[derive(Debug, Default)]
struct DrawState {
    pipeline: Option<PipelineId>,
    binding: Option<BindingTable>,
    vertex: Option<ResourceId>,
    index: Option<(ResourceId, IndexFormat)>,
    targets: Option<(ResourceId, ResourceId)>,
}

#[derive(Debug, Default)]
struct DeviceState {
    next_id: u64,
    resources: HashMap<ResourceId, DummyResource>,
    destroyed: HashSet<ResourceId>,
    next_pipeline_id: u64,
    pipelines: HashMap<PipelineId, PipelineDescriptor>,
    presentation: Vec<PresentationTarget>,
    output_size: Extent2d,
    frame_index: u32,
    allocations: Vec<String>,
    submissions: Vec<CommandList>,
    mapped_writes: Vec<MappedWrite>,
    compositor_events: Vec<CompositorEvent>,
    acquired: Option<u32>,
    last_overlay: Option<OverlayCanvas>,
    /// Feedback maps written by a draw since their last resolve.
    sampled_feedback: HashSet<ResourceId>,
    draw_count: usize,
    present_count: usize,
    last_clear_color: Option<[f32; 4]>,
}

fn invalid(message: impl Into<String>) -> BackendError {
    BackendError::InvalidCommand(message.into())
}

fn texture_levels(descriptor: &TextureDescriptor) -> Vec<Vec<u8>> {
    let bpp = descriptor.format.bytes_per_pixel().unwrap_or(0);
    (0..descriptor.mip_level_count)
        .map(|level| {
            let (w, h) = descriptor.mip_extent(level);
            vec![0u8; (w * h * bpp) as usize]
        })
        .collect()
}

impl DeviceState {
    fn insert(&mut self, label: String, kind: ResourceKind, state: ResourceState) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        self.resources.insert(
            id,
            DummyResource {
                label,
                kind,
                state,
                presentation: false,
            },
        );
        id
    }

    fn resource(&self, id: ResourceId) -> BackendResult<&DummyResource> {
        if self.destroyed.contains(&id) {
            return Err(invalid(format!("resource {id} used after destroy")));
        }
        self.resources
            .get(&id)
            .ok_or_else(|| invalid(format!("unknown resource {id}")))
    }

    fn resource_mut(&mut self, id: ResourceId) -> BackendResult<&mut DummyResource> {
        if self.destroyed.contains(&id) {
            return Err(invalid(format!("resource {id} used after destroy")));
        }
        self.resources
            .get_mut(&id)
            .ok_or_else(|| invalid(format!("unknown resource {id}")))
    }

    fn expect_state(
        &self,
        id: ResourceId,
        allowed: &[ResourceState],
        operation: &str,
    ) -> BackendResult<()> {
        let resource = self.resource(id)?;
        if !allowed.contains(&resource.state) {
            return Err(invalid(format!(
                "{operation}: '{}' ({id}) is in {:?}, needs one of {:?}",
                resource.label, resource.state, allowed
            )));
        }
        Ok(())
    }

    fn buffer_bytes(&self, id: ResourceId) -> BackendResult<&[u8]> {
        match &self.resource(id)?.kind {
            ResourceKind::Buffer { bytes, .. } => Ok(bytes),
            _ => Err(invalid(format!("{id} is not a buffer"))),
        }
    }

    fn buffer_bytes_mut(&mut self, id: ResourceId) -> BackendResult<&mut Vec<u8>> {
        match &mut self.resource_mut(id)?.kind {
            ResourceKind::Buffer { bytes, .. } => Ok(bytes),
            _ => Err(invalid(format!("{id} is not a buffer"))),
        }
    }

    fn texture_mut(
        &mut self,
        id: ResourceId,
    ) -> BackendResult<(&TextureDescriptor, &mut Vec<Vec<u8>>)> {
        match &mut self.resource_mut(id)?.kind {
            ResourceKind::Texture { descriptor, levels } => Ok((descriptor, levels)),
            _ => Err(invalid(format!("{id} is not a texture"))),
        }
    }

    fn execute(&mut self, list: &CommandList, pattern: &FeedbackPattern) -> BackendResult<()> {
        const COPY_SOURCES: &[ResourceState] =
            &[ResourceState::GenericRead, ResourceState::CopySource];

        let mut draw = DrawState::default();
        for command in list.commands() {
            for id in command.resources() {
                self.resource(id)?;
            }
            log::trace!("DummyDevice: {:?}", command);

            match command {
                Command::SetPipeline(pipeline) => {
                    if !self.pipelines.contains_key(pipeline) {
                        return Err(invalid(format!("unknown pipeline {:?}", pipeline)));
                    }
                    draw.pipeline = Some(*pipeline);
                }
                Command::SetBindingTable(table) => draw.binding = Some(*table),
                Command::SetViewport(_) | Command::SetScissor(_) => {}
                Command::Barrier {
                    resource,
                    before,
                    after,
                } => {
                    let entry = self.resource_mut(*resource)?;
                    if entry.state != *before {
                        return Err(invalid(format!(
                            "barrier on '{}' ({resource}) expects {:?} but it is in {:?}",
                            entry.label, before, entry.state
                        )));
                    }
                    entry.state = *after;
                }
                Command::ClearColor { target, color } => {
                    self.expect_state(*target, &[ResourceState::RenderTarget], "clear color")?;
                    self.last_clear_color = Some(*color);
                }
                Command::ClearDepth { target, .. } => {
                    self.expect_state(*target, &[ResourceState::DepthWrite], "clear depth")?;
                }
                Command::SetRenderTargets { color, depth } => {
                    draw.targets = Some((*color, *depth));
                }
                Command::SetVertexBuffer { buffer, .. } => draw.vertex = Some(*buffer),
                Command::SetIndexBuffer { buffer, format } => draw.index = Some((*buffer, *format)),
                Command::DrawIndexed { index_count, .. } => {
                    self.validate_draw(&draw, *index_count)?;
                    if let Some(feedback) = draw.binding.and_then(|b| b.feedback) {
                        self.sampled_feedback.insert(feedback);
                    }
                    self.draw_count += 1;
                }
                Command::CopyBuffer { src, dst, size } => {
                    self.expect_state(*src, COPY_SOURCES, "copy buffer")?;
                    self.expect_state(*dst, &[ResourceState::CopyDest], "copy buffer")?;
                    let size = *size as usize;
                    let data = self
                        .buffer_bytes(*src)?
                        .get(..size)
                        .ok_or_else(|| invalid("copy buffer: source too small"))?
                        .to_vec();
                    self.buffer_bytes_mut(*dst)?
                        .get_mut(..size)
                        .ok_or_else(|| invalid("copy buffer: destination too small"))?
                        .copy_from_slice(&data);
                }
                Command::CopyBufferToTexture {
                    src,
                    footprint,
                    dst,
                    mip_level,
                } => {
                    self.expect_state(*src, COPY_SOURCES, "copy buffer to texture")?;
                    self.expect_state(*dst, &[ResourceState::CopyDest], "copy buffer to texture")?;
                    let source = self.buffer_bytes(*src)?.to_vec();
                    if source.len() < footprint.total_bytes() as usize {
                        return Err(invalid("copy buffer to texture: source too small"));
                    }
                    let (descriptor, levels) = self.texture_mut(*dst)?;
                    if descriptor.mip_extent(*mip_level) != (footprint.width, footprint.height)
                        || descriptor.format.bytes_per_pixel() != Some(footprint.bytes_per_pixel)
                    {
                        return Err(invalid(format!(
                            "copy buffer to texture: footprint {:?} does not match mip {}",
                            footprint, mip_level
                        )));
                    }
                    let level = levels
                        .get_mut(*mip_level as usize)
                        .ok_or_else(|| invalid(format!("mip level {mip_level} out of range")))?;
                    unpack_rows(&source, footprint, level);
                }
                Command::ResolveFeedback { feedback, decode } => {
                    self.resolve_feedback(*feedback, *decode, pattern)?;
                }
                Command::CopyTextureToBuffer {
                    src,
                    dst,
                    footprint,
                } => {
                    self.expect_state(*src, &[ResourceState::CopySource], "copy texture to buffer")?;
                    self.expect_state(*dst, &[ResourceState::CopyDest], "copy texture to buffer")?;
                    let (descriptor, levels) = self.texture_mut(*src)?;
                    if descriptor.mip_extent(0) != (footprint.width, footprint.height) {
                        return Err(invalid("copy texture to buffer: footprint size mismatch"));
                    }
                    let texels = levels[0].clone();
                    let bytes = self.buffer_bytes_mut(*dst)?;
                    if bytes.len() < footprint.total_bytes() as usize {
                        return Err(invalid("copy texture to buffer: destination too small"));
                    }
                    pack_rows(&texels, footprint, bytes);
                }
            }
        }
        Ok(())
    }

    fn validate_draw(&self, draw: &DrawState, index_count: u32) -> BackendResult<()> {
        if draw.pipeline.is_none() {
            return Err(invalid("draw without pipeline"));
        }
        let binding = draw.binding.ok_or_else(|| invalid("draw without binding table"))?;
        let vertex = draw.vertex.ok_or_else(|| invalid("draw without vertex buffer"))?;
        let (index, format) = draw.index.ok_or_else(|| invalid("draw without index buffer"))?;
        let (color, depth) = draw.targets.ok_or_else(|| invalid("draw without render targets"))?;

        self.expect_state(vertex, &[ResourceState::VertexBuffer], "draw")?;
        self.expect_state(index, &[ResourceState::IndexBuffer], "draw")?;
        self.expect_state(color, &[ResourceState::RenderTarget], "draw")?;
        self.expect_state(depth, &[ResourceState::DepthWrite], "draw")?;
        self.expect_state(binding.texture, &[ResourceState::PixelShaderResource], "draw")?;
        self.expect_state(
            binding.constants,
            &[ResourceState::GenericRead, ResourceState::VertexBuffer],
            "draw",
        )?;
        if let Some(feedback) = binding.feedback {
            self.expect_state(feedback, &[ResourceState::UnorderedAccess], "draw")?;
        }

        let constants = self.buffer_bytes(binding.constants)?;
        if binding.constant_offset + binding.constant_size > constants.len() as u64 {
            return Err(invalid("draw: constant slot past the end of the buffer"));
        }
        let index_size = match format {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        };
        if index_count as usize * index_size > self.buffer_bytes(index)?.len() {
            return Err(invalid("draw: index count past the end of the index buffer"));
        }
        Ok(())
    }

    fn resolve_feedback(
        &mut self,
        feedback: ResourceId,
        decode: ResourceId,
        pattern: &FeedbackPattern,
    ) -> BackendResult<()> {
        self.expect_state(feedback, &[ResourceState::ResolveSource], "resolve")?;
        self.expect_state(decode, &[ResourceState::ResolveDest], "resolve")?;

        let (grid_width, grid_height) = match &self.resource(feedback)?.kind {
            ResourceKind::FeedbackMap { descriptor } => (
                descriptor.paired_width.div_ceil(descriptor.tile_width),
                descriptor.paired_height.div_ceil(descriptor.tile_height),
            ),
            _ => return Err(invalid(format!("{feedback} is not a feedback map"))),
        };
        let sampled = self.sampled_feedback.remove(&feedback);

        let (descriptor, levels) = self.texture_mut(decode)?;
        if descriptor.format != TextureFormat::R8Uint
            || (descriptor.width, descriptor.height) != (grid_width, grid_height)
        {
            return Err(invalid(format!(
                "resolve: decode texture must be {}x{} R8Uint",
                grid_width, grid_height
            )));
        }
        for y in 0..grid_height {
            for x in 0..grid_width {
                levels[0][(y * grid_width + x) as usize] = if sampled {
                    pattern.value(x, y, grid_width)
                } else {
                    UNUSED_TILE
                };
            }
        }
        Ok(())
    }
}

fn unpack_rows(source: &[u8], footprint: &TextureFootprint, level: &mut [u8]) {
    let row = footprint.packed_row_bytes() as usize;
    for y in 0..footprint.height as usize {
        let start = footprint.offset as usize + y * footprint.row_pitch as usize;
        level[y * row..(y + 1) * row].copy_from_slice(&source[start..start + row]);
    }
}

fn pack_rows(texels: &[u8], footprint: &TextureFootprint, dest: &mut [u8]) {
    let row = footprint.packed_row_bytes() as usize;
    for y in 0..footprint.height as usize {
        let start = footprint.offset as usize + y * footprint.row_pitch as usize;
        dest[start..start + row].copy_from_slice(&texels[y * row..(y + 1) * row]);
    }
}

/// Dummy GPU device.
#[derive(Debug)]
pub struct DummyDevice {
    config: DummyDeviceConfig,
    state: Mutex<DeviceState>,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    pub fn new() -> Self {
        Self::with_config(DummyDeviceConfig::default())
    }

    pub fn with_config(mut config: DummyDeviceConfig) -> Self {
        config.frame_count = config.frame_count.max(1);
        let mut state = DeviceState {
            output_size: config.output_size,
            ..DeviceState::default()
        };

        let depth_descriptor = TextureDescriptor::new(
            "depth buffer",
            config.output_size.width,
            config.output_size.height,
            TextureFormat::Depth32Float,
            TextureUsage::DEPTH_STENCIL,
            ResourceState::DepthWrite,
        );
        let depth = state.insert(
            "depth buffer".to_string(),
            ResourceKind::Texture {
                levels: texture_levels(&depth_descriptor),
                descriptor: depth_descriptor,
            },
            ResourceState::DepthWrite,
        );

        for frame in 0..config.frame_count {
            let label = format!("back buffer {frame}");
            let descriptor = TextureDescriptor::new(
                label.clone(),
                config.output_size.width,
                config.output_size.height,
                TextureFormat::Bgra8Unorm,
                TextureUsage::RENDER_TARGET,
                ResourceState::Present,
            );
            let color = state.insert(
                label,
                ResourceKind::Texture {
                    levels: texture_levels(&descriptor),
                    descriptor,
                },
                ResourceState::Present,
            );
            state.presentation.push(PresentationTarget { color, depth });
        }
        for resource in state.resources.values_mut() {
            resource.presentation = true;
        }

        log::trace!(
            "DummyDevice: created with {} frames at {}x{}",
            config.frame_count,
            config.output_size.width,
            config.output_size.height
        );
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    fn check_allocation(&self, label: &str) -> BackendResult<()> {
        match &self.config.failing_allocation {
            Some(failing) if label.contains(failing.as_str()) => {
                log::trace!("DummyDevice: injected allocation failure for '{}'", label);
                Err(BackendError::OutOfMemory)
            }
            _ => Ok(()),
        }
    }

    /// Change the output size, as a window resize would.
    pub fn resize(&self, width: u32, height: u32) {
        self.state.lock().output_size = Extent2d::new(width, height);
    }

    // === Inspection ===

    /// Every successfully executed command list, in submission order.
    pub fn submissions(&self) -> Vec<CommandList> {
        self.state.lock().submissions.clone()
    }

    pub fn mapped_writes(&self) -> Vec<MappedWrite> {
        self.state.lock().mapped_writes.clone()
    }

    /// Labels of every buffer, texture and feedback map created, in order.
    pub fn allocations(&self) -> Vec<String> {
        self.state.lock().allocations.clone()
    }

    pub fn buffer_contents(&self, id: ResourceId) -> Option<Vec<u8>> {
        self.state.lock().buffer_bytes(id).ok().map(<[u8]>::to_vec)
    }

    /// Tightly packed texels of one mip level.
    pub fn texture_level(&self, id: ResourceId, level: u32) -> Option<Vec<u8>> {
        match &self.state.lock().resource(id).ok()?.kind {
            ResourceKind::Texture { levels, .. } => levels.get(level as usize).cloned(),
            _ => None,
        }
    }

    pub fn texture_descriptor(&self, id: ResourceId) -> Option<TextureDescriptor> {
        match &self.state.lock().resource(id).ok()?.kind {
            ResourceKind::Texture { descriptor, .. } => Some(descriptor.clone()),
            _ => None,
        }
    }

    /// State the resource is in after all submitted work.
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.state.lock().resource(id).ok().map(|r| r.state)
    }

    pub fn is_destroyed(&self, id: ResourceId) -> bool {
        self.state.lock().destroyed.contains(&id)
    }

    /// Live resources, excluding the presentation chain.
    pub fn live_resource_count(&self) -> usize {
        self.state
            .lock()
            .resources
            .values()
            .filter(|r| !r.presentation)
            .count()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    pub fn compositor_events(&self) -> Vec<CompositorEvent> {
        self.state.lock().compositor_events.clone()
    }

    pub fn last_overlay(&self) -> Option<OverlayCanvas> {
        self.state.lock().last_overlay.clone()
    }

    pub fn draw_count(&self) -> usize {
        self.state.lock().draw_count
    }

    pub fn present_count(&self) -> usize {
        self.state.lock().present_count
    }

    pub fn last_clear_color(&self) -> Option<[f32; 4]> {
        self.state.lock().last_clear_color
    }
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy Device"
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            sampler_feedback: self.config.sampler_feedback,
            constant_buffer_alignment: self.config.constant_buffer_alignment,
        }
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> BackendResult<ResourceId> {
        let label = descriptor.label_or_default().to_string();
        log::trace!(
            "DummyDevice: creating buffer '{}' (size: {}, {:?})",
            label,
            descriptor.size,
            descriptor.domain
        );
        self.check_allocation(&label)?;
        if descriptor.size == 0 {
            return Err(BackendError::ResourceCreationFailed(format!(
                "buffer '{label}' has zero size"
            )));
        }

        let mut state = self.state.lock();
        state.allocations.push(label.clone());
        Ok(state.insert(
            label,
            ResourceKind::Buffer {
                domain: descriptor.domain,
                bytes: vec![0; descriptor.size as usize],
            },
            descriptor.initial_state,
        ))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> BackendResult<ResourceId> {
        let label = descriptor.label_or_default().to_string();
        log::trace!(
            "DummyDevice: creating texture '{}' ({}x{}, {} mips, {:?})",
            label,
            descriptor.width,
            descriptor.height,
            descriptor.mip_level_count,
            descriptor.format
        );
        self.check_allocation(&label)?;
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.mip_level_count == 0 {
            return Err(BackendError::ResourceCreationFailed(format!(
                "texture '{label}' has an empty extent"
            )));
        }
        if descriptor.format.bytes_per_pixel().is_none() {
            return Err(BackendError::ResourceCreationFailed(format!(
                "texture '{label}' uses {:?}, which is not a texture format",
                descriptor.format
            )));
        }

        let mut state = self.state.lock();
        state.allocations.push(label.clone());
        Ok(state.insert(
            label,
            ResourceKind::Texture {
                levels: texture_levels(descriptor),
                descriptor: descriptor.clone(),
            },
            descriptor.initial_state,
        ))
    }

    fn create_feedback_map(&self, descriptor: &FeedbackMapDescriptor) -> BackendResult<ResourceId> {
        let label = descriptor
            .label
            .clone()
            .unwrap_or_else(|| "feedback map".to_string());
        if !self.config.sampler_feedback {
            return Err(BackendError::FeatureNotSupported(
                "sampler feedback".to_string(),
            ));
        }
        self.check_allocation(&label)?;
        if descriptor.tile_width == 0 || descriptor.tile_height == 0 {
            return Err(BackendError::ResourceCreationFailed(
                "feedback tile size must be non-zero".to_string(),
            ));
        }

        let mut state = self.state.lock();
        match &state.resource(descriptor.paired)?.kind {
            ResourceKind::Texture { .. } => {}
            _ => {
                return Err(BackendError::ResourceCreationFailed(format!(
                    "feedback map paired with non-texture {}",
                    descriptor.paired
                )))
            }
        }
        log::trace!(
            "DummyDevice: creating feedback map for {} ({}x{} tiles)",
            descriptor.paired,
            descriptor.tile_width,
            descriptor.tile_height
        );
        state.allocations.push(label.clone());
        Ok(state.insert(
            label,
            ResourceKind::FeedbackMap {
                descriptor: descriptor.clone(),
            },
            ResourceState::UnorderedAccess,
        ))
    }

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineId> {
        log::trace!("DummyDevice: creating pipeline {:?}", descriptor.label);
        if descriptor.vertex_attributes.is_empty() {
            return Err(BackendError::PipelineCreationFailed(
                "pipeline has no vertex attributes".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let id = PipelineId(state.next_pipeline_id);
        state.next_pipeline_id += 1;
        state.pipelines.insert(id, descriptor.clone());
        Ok(id)
    }

    fn write_mapped(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let resource = state.resource_mut(buffer)?;
        let bytes = match &mut resource.kind {
            ResourceKind::Buffer {
                domain: MemoryDomain::Upload,
                bytes,
            } => bytes,
            _ => {
                return Err(BackendError::MapFailed(format!(
                    "'{}' is not an upload buffer",
                    resource.label
                )))
            }
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(BackendError::MapFailed(format!(
                "write of {} bytes at {} past the end of '{}'",
                data.len(),
                offset,
                resource.label
            )));
        }
        bytes[start..end].copy_from_slice(data);
        state.mapped_writes.push(MappedWrite {
            resource: buffer,
            offset,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn read_mapped(&self, buffer: ResourceId, offset: u64, len: u64) -> BackendResult<Vec<u8>> {
        let state = self.state.lock();
        let resource = state.resource(buffer)?;
        match &resource.kind {
            ResourceKind::Buffer {
                domain: MemoryDomain::Readback,
                bytes,
            } => bytes
                .get(offset as usize..(offset + len) as usize)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| {
                    BackendError::MapFailed(format!("read past the end of '{}'", resource.label))
                }),
            _ => Err(BackendError::MapFailed(format!(
                "'{}' is not a readback buffer",
                resource.label
            ))),
        }
    }

    fn destroy(&self, resource: ResourceId) -> BackendResult<()> {
        let mut state = self.state.lock();
        let entry = state.resource(resource)?;
        if entry.presentation {
            return Err(invalid(format!(
                "'{}' belongs to the presentation chain",
                entry.label
            )));
        }
        log::trace!("DummyDevice: destroying '{}' ({})", entry.label, resource);
        state.resources.remove(&resource);
        state.destroyed.insert(resource);
        Ok(())
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) -> BackendResult<()> {
        self.state
            .lock()
            .pipelines
            .remove(&pipeline)
            .map(|_| ())
            .ok_or_else(|| invalid(format!("unknown pipeline {:?}", pipeline)))
    }

    fn submit(&self, commands: &CommandList) -> BackendResult<SubmissionIndex> {
        let mut state = self.state.lock();
        state.execute(commands, &self.config.feedback_pattern)?;
        let index = SubmissionIndex(state.submissions.len() as u64);
        state.submissions.push(commands.clone());
        log::trace!(
            "DummyDevice: executed '{}' ({} commands) as {:?}",
            commands.label(),
            commands.len(),
            index
        );
        Ok(index)
    }

    fn wait_for_idle(&self) -> BackendResult<GpuIdle> {
        let state = self.state.lock();
        let completed = state
            .submissions
            .len()
            .checked_sub(1)
            .map(|i| SubmissionIndex(i as u64));
        Ok(GpuIdle::new(completed))
    }

    fn output_size(&self) -> Extent2d {
        self.state.lock().output_size
    }

    fn frame_count(&self) -> u32 {
        self.config.frame_count
    }

    fn current_frame_index(&self) -> u32 {
        self.state.lock().frame_index
    }

    fn presentation_target(&self, frame: u32) -> BackendResult<PresentationTarget> {
        self.state
            .lock()
            .presentation
            .get(frame as usize)
            .copied()
            .ok_or_else(|| invalid(format!("frame {frame} out of range")))
    }

    fn present(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(frame) = state.acquired {
            return Err(invalid(format!(
                "present while frame {frame} is held by the compositor"
            )));
        }
        let frame = state.frame_index;
        let color = state.presentation[frame as usize].color;
        state.expect_state(color, &[ResourceState::Present], "present")?;
        state.frame_index = (frame + 1) % self.config.frame_count;
        state.present_count += 1;
        Ok(())
    }
}

impl Compositor for DummyDevice {
    fn acquire_shared_target(&self, frame: u32) -> BackendResult<SharedTarget> {
        let mut state = self.state.lock();
        if let Some(held) = state.acquired {
            return Err(invalid(format!("frame {held} is already acquired")));
        }
        let color = state
            .presentation
            .get(frame as usize)
            .map(|t| t.color)
            .ok_or_else(|| invalid(format!("frame {frame} out of range")))?;
        state.expect_state(color, &[ResourceState::Present], "acquire shared target")?;
        state.acquired = Some(frame);
        state.compositor_events.push(CompositorEvent::Acquire(frame));
        Ok(SharedTarget::new(frame, color))
    }

    fn draw_overlay(&self, target: &SharedTarget, canvas: &OverlayCanvas) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.acquired != Some(target.frame()) {
            return Err(invalid(format!(
                "draw on frame {} without holding it",
                target.frame()
            )));
        }
        state.compositor_events.push(CompositorEvent::Draw(target.frame()));
        state.last_overlay = Some(canvas.clone());
        Ok(())
    }

    fn release_shared_target(&self, target: SharedTarget) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.acquired != Some(target.frame()) {
            return Err(invalid(format!(
                "release of frame {} that is not held",
                target.frame()
            )));
        }
        state.acquired = None;
        state
            .compositor_events
            .push(CompositorEvent::Release(target.frame()));
        Ok(())
    }
}
