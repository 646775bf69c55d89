//! Headless wgpu device
//!
//! Renders into offscreen BGRA targets instead of a window surface. Command
//! lists are translated on submission: draws are buffered into render passes
//! and encoded together with the clears that precede them, copies go straight
//! to the encoder. Barriers are validated by the recorder and only logged
//! here, wgpu tracks usage itself.
//!
//! wgpu exposes no sampler feedback, so [`GpuDevice::capabilities`] always
//! reports it unsupported and feedback maps cannot be created.

use std::collections::HashMap;
use std::num::NonZeroU64;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::commands::{BindingTable, Command, CommandList, ScissorRect, Viewport};
use crate::feedback::OverlayCanvas;

/// Configuration for [`WgpuDevice`]
#[derive(Debug, Clone)]
pub struct WgpuDeviceConfig {
    pub frame_count: u32,
    pub output_size: Extent2d,
    pub power_preference: wgpu::PowerPreference,
}

impl Default for WgpuDeviceConfig {
    fn default() -> Self {
        Self {
            frame_count: 3,
            output_size: Extent2d::new(1280, 720),
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }
}

impl WgpuDeviceConfig {
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count.max(1);
        self
    }

    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.output_size = Extent2d::new(width.max(1), height.max(1));
        self
    }
}

enum WgpuResource {
    Buffer {
        buffer: wgpu::Buffer,
        domain: MemoryDomain,
    },
    Texture {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        descriptor: TextureDescriptor,
        presentation: bool,
    },
}

struct WgpuPipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BindGroupKey {
    pipeline: PipelineId,
    constants: ResourceId,
    constant_offset: u64,
    constant_size: u64,
    texture: ResourceId,
}

impl BindGroupKey {
    fn new(pipeline: PipelineId, table: &BindingTable) -> Self {
        Self {
            pipeline,
            constants: table.constants,
            constant_offset: table.constant_offset,
            constant_size: table.constant_size,
            texture: table.texture,
        }
    }

    fn references(&self, resource: ResourceId) -> bool {
        self.constants == resource || self.texture == resource
    }
}

/// Render state captured at the moment of a draw.
#[derive(Debug, Clone, Copy, Default)]
struct DrawState {
    pipeline: Option<PipelineId>,
    binding: Option<BindingTable>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    vertex_buffer: Option<ResourceId>,
    index_buffer: Option<(ResourceId, IndexFormat)>,
}

struct PendingDraw {
    state: DrawState,
    index_count: u32,
    instance_count: u32,
}

/// Render pass with buffered draws, encoded on flush
struct PendingRenderPass {
    color: ResourceId,
    depth: Option<ResourceId>,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    draws: Vec<PendingDraw>,
}

struct WgpuState {
    resources: HashMap<ResourceId, WgpuResource>,
    pipelines: HashMap<PipelineId, WgpuPipeline>,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,
    next_resource_id: u64,
    next_pipeline_id: u64,

    presentation: Vec<PresentationTarget>,
    frame_index: u32,
    acquired: Option<u32>,

    last_submission: Option<SubmissionIndex>,
}

impl WgpuState {
    fn allocate_id(&mut self) -> ResourceId {
        self.next_resource_id += 1;
        ResourceId(self.next_resource_id)
    }

    fn buffer(&self, id: ResourceId) -> BackendResult<&wgpu::Buffer> {
        match self.resources.get(&id) {
            Some(WgpuResource::Buffer { buffer, .. }) => Ok(buffer),
            Some(_) => Err(BackendError::InvalidCommand(format!("{id} is not a buffer"))),
            None => Err(BackendError::InvalidCommand(format!("unknown buffer {id}"))),
        }
    }

    fn texture(&self, id: ResourceId) -> BackendResult<(&wgpu::Texture, &wgpu::TextureView)> {
        match self.resources.get(&id) {
            Some(WgpuResource::Texture { texture, view, .. }) => Ok((texture, view)),
            Some(_) => Err(BackendError::InvalidCommand(format!("{id} is not a texture"))),
            None => Err(BackendError::InvalidCommand(format!("unknown texture {id}"))),
        }
    }
}

/// GPU device backed by wgpu, rendering offscreen.
pub struct WgpuDevice {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: WgpuDeviceConfig,
    border_sampling: bool,
    state: Mutex<WgpuState>,
}

impl WgpuDevice {
    /// Pick an adapter and create the device and its presentation targets.
    pub fn new(config: WgpuDeviceConfig) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(config))
    }

    async fn new_async(config: WgpuDeviceConfig) -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed("No suitable GPU adapter found".to_string())
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let required_features =
            adapter.features() & wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("sampler feedback renderer"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let wgpu_device = Self {
            instance,
            adapter,
            device,
            queue,
            border_sampling: !required_features.is_empty(),
            state: Mutex::new(WgpuState {
                resources: HashMap::new(),
                pipelines: HashMap::new(),
                bind_groups: HashMap::new(),
                next_resource_id: 0,
                next_pipeline_id: 0,
                presentation: Vec::new(),
                frame_index: 0,
                acquired: None,
                last_submission: None,
            }),
            config,
        };
        wgpu_device.create_presentation_targets()?;
        Ok(wgpu_device)
    }

    fn create_presentation_targets(&self) -> BackendResult<()> {
        let size = self.config.output_size;
        let depth = self.create_texture(&TextureDescriptor::new(
            "depth buffer",
            size.width,
            size.height,
            TextureFormat::Depth32Float,
            TextureUsage::DEPTH_STENCIL,
            crate::resources::ResourceState::DepthWrite,
        ))?;

        let mut targets = Vec::with_capacity(self.config.frame_count as usize);
        for frame in 0..self.config.frame_count {
            let color = self.create_texture(&TextureDescriptor::new(
                format!("back buffer {frame}"),
                size.width,
                size.height,
                TextureFormat::Bgra8Unorm,
                TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC | TextureUsage::COPY_DST,
                crate::resources::ResourceState::Present,
            ))?;
            targets.push(PresentationTarget { color, depth });
        }

        let mut state = self.state.lock();
        for target in &targets {
            for id in [target.color, target.depth] {
                if let Some(WgpuResource::Texture { presentation, .. }) =
                    state.resources.get_mut(&id)
                {
                    *presentation = true;
                }
            }
        }
        state.presentation = targets;
        Ok(())
    }

    fn convert_texture_format(format: TextureFormat) -> BackendResult<wgpu::TextureFormat> {
        match format {
            TextureFormat::Bgra8Unorm => Ok(wgpu::TextureFormat::Bgra8Unorm),
            TextureFormat::R8Uint => Ok(wgpu::TextureFormat::R8Uint),
            TextureFormat::Depth32Float => Ok(wgpu::TextureFormat::Depth32Float),
            TextureFormat::FeedbackMinMip => Err(BackendError::FeatureNotSupported(
                "sampler feedback maps".to_string(),
            )),
        }
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::SAMPLED) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.intersects(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_STENCIL) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if usage.contains(TextureUsage::UNORDERED_ACCESS) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        result
    }

    /// Upload buffers are written through the queue rather than mapped, so
    /// they carry `COPY_DST` in addition to their requested usage.
    fn convert_buffer_usage(domain: MemoryDomain, usage: BufferUsage) -> wgpu::BufferUsages {
        if domain == MemoryDomain::Readback {
            return wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST;
        }

        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) || domain == MemoryDomain::Upload {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        }
    }

    fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
        match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }

    /// Run `create` inside a validation error scope, turning a validation
    /// error into `Err` instead of the default panic.
    fn validated<T>(
        &self,
        create: impl FnOnce() -> T,
        on_error: impl FnOnce(String) -> BackendError,
    ) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if out_of_memory.is_some() {
            return Err(BackendError::OutOfMemory);
        }
        match validation {
            Some(error) => Err(on_error(error.to_string())),
            None => Ok(value),
        }
    }

    fn create_sampler(&self, sampler: &StaticSampler) -> wgpu::Sampler {
        let point_or_linear = |point: bool| {
            if point {
                wgpu::FilterMode::Nearest
            } else {
                wgpu::FilterMode::Linear
            }
        };
        let (address_mode, border_color) = if sampler.border_addressing && self.border_sampling {
            (
                wgpu::AddressMode::ClampToBorder,
                Some(wgpu::SamplerBorderColor::TransparentBlack),
            )
        } else {
            (wgpu::AddressMode::ClampToEdge, None)
        };

        self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("cube sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: point_or_linear(sampler.point_min_mag),
            min_filter: point_or_linear(sampler.point_min_mag),
            mipmap_filter: point_or_linear(!sampler.linear_mip),
            lod_min_clamp: 0.0,
            lod_max_clamp: sampler.max_lod.min(32.0),
            border_color,
            ..Default::default()
        })
    }

    fn ensure_bind_group(
        &self,
        state: &mut WgpuState,
        key: BindGroupKey,
    ) -> BackendResult<()> {
        if state.bind_groups.contains_key(&key) {
            return Ok(());
        }
        let pipeline = state.pipelines.get(&key.pipeline).ok_or_else(|| {
            BackendError::InvalidCommand(format!("unknown pipeline {:?}", key.pipeline))
        })?;
        let constants = state.buffer(key.constants)?;
        let (_, texture_view) = state.texture(key.texture)?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cube bind group"),
            layout: &pipeline.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: constants,
                        offset: key.constant_offset,
                        size: NonZeroU64::new(key.constant_size),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&pipeline.sampler),
                },
            ],
        });
        state.bind_groups.insert(key, bind_group);
        Ok(())
    }

    fn encode_render_pass(
        &self,
        state: &mut WgpuState,
        encoder: &mut wgpu::CommandEncoder,
        pass: PendingRenderPass,
    ) -> BackendResult<()> {
        for draw in &pass.draws {
            if let (Some(pipeline), Some(table)) = (draw.state.pipeline, draw.state.binding) {
                self.ensure_bind_group(state, BindGroupKey::new(pipeline, &table))?;
            }
        }
        let state = &*state;

        let (_, color_view) = state.texture(pass.color)?;
        let depth_view = match pass.depth {
            Some(depth) => Some(state.texture(depth)?.1),
            None => None,
        };

        let color_load = match pass.clear_color {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_load = match pass.clear_depth {
            Some(depth) => wgpu::LoadOp::Clear(depth),
            None => wgpu::LoadOp::Load,
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("scene pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth_view.map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for draw in &pass.draws {
            let missing = |what: &str| BackendError::InvalidCommand(format!("draw without {what}"));
            let pipeline_id = draw.state.pipeline.ok_or_else(|| missing("a pipeline"))?;
            let table = draw.state.binding.ok_or_else(|| missing("a binding table"))?;
            let vertex_buffer = draw.state.vertex_buffer.ok_or_else(|| missing("a vertex buffer"))?;
            let (index_buffer, index_format) =
                draw.state.index_buffer.ok_or_else(|| missing("an index buffer"))?;

            let pipeline = state.pipelines.get(&pipeline_id).ok_or_else(|| {
                BackendError::InvalidCommand(format!("unknown pipeline {pipeline_id:?}"))
            })?;
            let bind_group = state
                .bind_groups
                .get(&BindGroupKey::new(pipeline_id, &table))
                .ok_or_else(|| missing("a bind group"))?;

            render_pass.set_pipeline(&pipeline.pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            if let Some(v) = draw.state.viewport {
                render_pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
            }
            if let Some(s) = draw.state.scissor {
                render_pass.set_scissor_rect(s.x, s.y, s.width, s.height);
            }
            render_pass.set_vertex_buffer(0, state.buffer(vertex_buffer)?.slice(..));
            render_pass.set_index_buffer(
                state.buffer(index_buffer)?.slice(..),
                Self::convert_index_format(index_format),
            );
            render_pass.draw_indexed(0..draw.index_count, 0, 0..draw.instance_count);
        }
        Ok(())
    }

    /// Encode the open pass and any clears that never got a pass of their own.
    fn flush_passes(
        &self,
        state: &mut WgpuState,
        encoder: &mut wgpu::CommandEncoder,
        pass: &mut Option<PendingRenderPass>,
        color_clears: &mut HashMap<ResourceId, [f32; 4]>,
        depth_clears: &mut HashMap<ResourceId, f32>,
    ) -> BackendResult<()> {
        if let Some(pass) = pass.take() {
            self.encode_render_pass(state, encoder, pass)?;
        }
        for (color, clear) in color_clears.drain() {
            self.encode_render_pass(
                state,
                encoder,
                PendingRenderPass {
                    color,
                    depth: None,
                    clear_color: Some(clear),
                    clear_depth: None,
                    draws: Vec::new(),
                },
            )?;
        }
        for (depth, clear) in depth_clears.drain() {
            let (_, view) = state.texture(depth)?;
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("depth clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        Ok(())
    }

    fn encode_list(
        &self,
        state: &mut WgpuState,
        encoder: &mut wgpu::CommandEncoder,
        list: &CommandList,
    ) -> BackendResult<()> {
        let mut draw_state = DrawState::default();
        let mut pass: Option<PendingRenderPass> = None;
        let mut color_clears = HashMap::new();
        let mut depth_clears = HashMap::new();

        for command in list.commands() {
            match command {
                Command::SetPipeline(pipeline) => draw_state.pipeline = Some(*pipeline),
                Command::SetBindingTable(table) => {
                    if table.feedback.is_some() {
                        return Err(BackendError::FeatureNotSupported(
                            "sampler feedback binding".to_string(),
                        ));
                    }
                    draw_state.binding = Some(*table);
                }
                Command::SetViewport(viewport) => draw_state.viewport = Some(*viewport),
                Command::SetScissor(scissor) => draw_state.scissor = Some(*scissor),
                Command::SetVertexBuffer { buffer, .. } => {
                    draw_state.vertex_buffer = Some(*buffer)
                }
                Command::SetIndexBuffer { buffer, format } => {
                    draw_state.index_buffer = Some((*buffer, *format))
                }
                Command::Barrier {
                    resource,
                    before,
                    after,
                } => {
                    log::trace!("barrier {resource}: {before:?} -> {after:?}");
                }
                Command::ClearColor { target, color } => match pass.as_mut() {
                    Some(open) if open.color == *target && open.draws.is_empty() => {
                        open.clear_color = Some(*color)
                    }
                    _ => {
                        color_clears.insert(*target, *color);
                    }
                },
                Command::ClearDepth { target, depth } => match pass.as_mut() {
                    Some(open) if open.depth == Some(*target) && open.draws.is_empty() => {
                        open.clear_depth = Some(*depth)
                    }
                    _ => {
                        depth_clears.insert(*target, *depth);
                    }
                },
                Command::SetRenderTargets { color, depth } => {
                    if let Some(open) = pass.take() {
                        self.encode_render_pass(state, encoder, open)?;
                    }
                    pass = Some(PendingRenderPass {
                        color: *color,
                        depth: Some(*depth),
                        clear_color: color_clears.remove(color),
                        clear_depth: depth_clears.remove(depth),
                        draws: Vec::new(),
                    });
                }
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                } => {
                    let open = pass.as_mut().ok_or_else(|| {
                        BackendError::InvalidCommand("draw without render targets".to_string())
                    })?;
                    open.draws.push(PendingDraw {
                        state: draw_state,
                        index_count: *index_count,
                        instance_count: *instance_count,
                    });
                }
                Command::CopyBuffer { src, dst, size } => {
                    self.flush_passes(
                        state,
                        encoder,
                        &mut pass,
                        &mut color_clears,
                        &mut depth_clears,
                    )?;
                    encoder.copy_buffer_to_buffer(state.buffer(*src)?, 0, state.buffer(*dst)?, 0, *size);
                }
                Command::CopyBufferToTexture {
                    src,
                    footprint,
                    dst,
                    mip_level,
                } => {
                    self.flush_passes(
                        state,
                        encoder,
                        &mut pass,
                        &mut color_clears,
                        &mut depth_clears,
                    )?;
                    let (texture, _) = state.texture(*dst)?;
                    encoder.copy_buffer_to_texture(
                        wgpu::ImageCopyBuffer {
                            buffer: state.buffer(*src)?,
                            layout: image_layout(footprint),
                        },
                        wgpu::ImageCopyTexture {
                            texture,
                            mip_level: *mip_level,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        copy_extent(footprint),
                    );
                }
                Command::CopyTextureToBuffer {
                    src,
                    dst,
                    footprint,
                } => {
                    self.flush_passes(
                        state,
                        encoder,
                        &mut pass,
                        &mut color_clears,
                        &mut depth_clears,
                    )?;
                    let (texture, _) = state.texture(*src)?;
                    encoder.copy_texture_to_buffer(
                        wgpu::ImageCopyTexture {
                            texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::ImageCopyBuffer {
                            buffer: state.buffer(*dst)?,
                            layout: image_layout(footprint),
                        },
                        copy_extent(footprint),
                    );
                }
                Command::ResolveFeedback { .. } => {
                    return Err(BackendError::FeatureNotSupported(
                        "sampler feedback resolve".to_string(),
                    ));
                }
            }
        }

        self.flush_passes(state, encoder, &mut pass, &mut color_clears, &mut depth_clears)
    }

    /// Read back a presentation image as tightly packed BGRA rows.
    ///
    /// Submits its own copy and waits for it, so it also observes every
    /// earlier submission.
    pub fn read_presentation_target(&self, frame: u32) -> BackendResult<Vec<u8>> {
        let size = self.config.output_size;
        let footprint = TextureFootprint::aligned(size.width, size.height, 4);
        let target = self.presentation_target(frame)?;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("presentation readback"),
            size: footprint.total_bytes(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("presentation readback"),
            });
        {
            let state = self.state.lock();
            let (texture, _) = state.texture(target.color)?;
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &readback,
                    layout: image_layout(&footprint),
                },
                copy_extent(&footprint),
            );
        }
        self.queue.submit(Some(encoder.finish()));

        let pitched = self.map_and_read(&readback, 0, footprint.total_bytes())?;
        readback.destroy();

        let row_bytes = footprint.packed_row_bytes() as usize;
        let mut pixels = Vec::with_capacity(row_bytes * size.height as usize);
        for row in pitched.chunks(footprint.row_pitch as usize) {
            pixels.extend_from_slice(&row[..row_bytes]);
        }
        Ok(pixels)
    }

    fn map_and_read(&self, buffer: &wgpu::Buffer, offset: u64, len: u64) -> BackendResult<Vec<u8>> {
        let slice = buffer.slice(offset..offset + len);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| BackendError::MapFailed(e.to_string()))?
            .map_err(|e| BackendError::MapFailed(e.to_string()))?;
        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}

fn image_layout(footprint: &TextureFootprint) -> wgpu::ImageDataLayout {
    wgpu::ImageDataLayout {
        offset: footprint.offset,
        bytes_per_row: Some(footprint.row_pitch),
        rows_per_image: Some(footprint.height),
    }
}

fn copy_extent(footprint: &TextureFootprint) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: footprint.width,
        height: footprint.height,
        depth_or_array_layers: 1,
    }
}

impl Compositor for WgpuDevice {
    fn acquire_shared_target(&self, frame: u32) -> BackendResult<SharedTarget> {
        let mut state = self.state.lock();
        if let Some(acquired) = state.acquired {
            return Err(BackendError::InvalidCommand(format!(
                "frame {acquired} is still acquired by the compositor"
            )));
        }
        let target = state.presentation.get(frame as usize).copied().ok_or_else(|| {
            BackendError::InvalidCommand(format!("no presentation target for frame {frame}"))
        })?;
        state.acquired = Some(frame);
        Ok(SharedTarget::new(frame, target.color))
    }

    fn draw_overlay(&self, target: &SharedTarget, canvas: &OverlayCanvas) -> BackendResult<()> {
        let state = self.state.lock();
        if state.acquired != Some(target.frame()) {
            return Err(BackendError::InvalidCommand(format!(
                "overlay drawn on frame {} without acquiring it",
                target.frame()
            )));
        }
        let (texture, _) = state.texture(target.color())?;
        let size = self.config.output_size;
        let width = canvas.width().min(size.width);
        let height = canvas.height().min(size.height);
        if width == 0 || height == 0 {
            return Ok(());
        }

        // The canvas is opaque, so a plain copy matches a premultiplied blend.
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            canvas.pixels(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(canvas.width() * 4),
                rows_per_image: Some(canvas.height()),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn release_shared_target(&self, target: SharedTarget) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.acquired != Some(target.frame()) {
            return Err(BackendError::InvalidCommand(format!(
                "frame {} released without being acquired",
                target.frame()
            )));
        }
        state.acquired = None;
        Ok(())
    }
}

impl GpuDevice for WgpuDevice {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            sampler_feedback: false,
            constant_buffer_alignment: self.device.limits().min_uniform_buffer_offset_alignment
                as u64,
        }
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> BackendResult<ResourceId> {
        let label = descriptor.label_or_default();
        let buffer = self.validated(
            || {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: descriptor.size,
                    usage: Self::convert_buffer_usage(descriptor.domain, descriptor.usage),
                    mapped_at_creation: false,
                })
            },
            |e| BackendError::ResourceCreationFailed(format!("{label}: {e}")),
        )?;

        let mut state = self.state.lock();
        let id = state.allocate_id();
        log::trace!("created buffer {id} '{label}' ({} bytes)", descriptor.size);
        state.resources.insert(
            id,
            WgpuResource::Buffer {
                buffer,
                domain: descriptor.domain,
            },
        );
        Ok(id)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> BackendResult<ResourceId> {
        let label = descriptor.label_or_default();
        let format = Self::convert_texture_format(descriptor.format)?;
        let texture = self.validated(
            || {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: descriptor.width,
                        height: descriptor.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: descriptor.mip_level_count,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: Self::convert_texture_usage(descriptor.usage),
                    view_formats: &[],
                })
            },
            |e| BackendError::ResourceCreationFailed(format!("{label}: {e}")),
        )?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut state = self.state.lock();
        let id = state.allocate_id();
        log::trace!(
            "created texture {id} '{label}' ({}x{}, {} mips)",
            descriptor.width,
            descriptor.height,
            descriptor.mip_level_count
        );
        state.resources.insert(
            id,
            WgpuResource::Texture {
                texture,
                view,
                descriptor: descriptor.clone(),
                presentation: false,
            },
        );
        Ok(id)
    }

    fn create_feedback_map(&self, _descriptor: &FeedbackMapDescriptor) -> BackendResult<ResourceId> {
        Err(BackendError::FeatureNotSupported(
            "sampler feedback maps".to_string(),
        ))
    }

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> BackendResult<PipelineId> {
        let label = descriptor.label.as_deref().unwrap_or("unnamed pipeline");
        if descriptor.bindings.contains(&BindingKind::UnorderedAccess) {
            log::debug!("{label}: unordered access binding ignored, no sampler feedback");
        }

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("cube shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("cube.wgsl").into()),
        });

        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("cube bind group layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("cube pipeline layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let attributes: Vec<wgpu::VertexAttribute> = descriptor
            .vertex_attributes
            .iter()
            .map(|attr| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(attr.format),
                offset: attr.offset,
                shader_location: attr.location,
            })
            .collect();
        let color_format = Self::convert_texture_format(descriptor.color_format)?;
        let depth_format = Self::convert_texture_format(descriptor.depth_format)?;

        let pipeline = self.validated(
            || {
                self.device
                    .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(label),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &shader,
                            entry_point: "vs_main",
                            buffers: &[wgpu::VertexBufferLayout {
                                array_stride: descriptor.vertex_stride,
                                step_mode: wgpu::VertexStepMode::Vertex,
                                attributes: &attributes,
                            }],
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &shader,
                            entry_point: "fs_main",
                            targets: &[Some(wgpu::ColorTargetState {
                                format: color_format,
                                blend: Some(wgpu::BlendState::REPLACE),
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology: wgpu::PrimitiveTopology::TriangleList,
                            front_face: wgpu::FrontFace::Cw,
                            cull_mode: Some(wgpu::Face::Back),
                            ..Default::default()
                        },
                        depth_stencil: Some(wgpu::DepthStencilState {
                            format: depth_format,
                            depth_write_enabled: true,
                            depth_compare: wgpu::CompareFunction::Less,
                            stencil: wgpu::StencilState::default(),
                            bias: wgpu::DepthBiasState::default(),
                        }),
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                    })
            },
            BackendError::PipelineCreationFailed,
        )?;
        let sampler = self.create_sampler(&descriptor.sampler);

        let mut state = self.state.lock();
        state.next_pipeline_id += 1;
        let id = PipelineId(state.next_pipeline_id);
        state.pipelines.insert(
            id,
            WgpuPipeline {
                pipeline,
                bind_group_layout,
                sampler,
            },
        );
        log::debug!("created pipeline '{label}'");
        Ok(id)
    }

    fn write_mapped(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> BackendResult<()> {
        let state = self.state.lock();
        match state.resources.get(&buffer) {
            Some(WgpuResource::Buffer {
                buffer: wgpu_buffer,
                domain: MemoryDomain::Upload,
            }) => {
                if offset + data.len() as u64 > wgpu_buffer.size() {
                    return Err(BackendError::InvalidCommand(format!(
                        "write of {} bytes at {offset} overflows buffer {buffer}",
                        data.len()
                    )));
                }
                self.queue.write_buffer(wgpu_buffer, offset, data);
                Ok(())
            }
            Some(_) => Err(BackendError::InvalidCommand(format!(
                "{buffer} is not an upload buffer"
            ))),
            None => Err(BackendError::InvalidCommand(format!("unknown buffer {buffer}"))),
        }
    }

    fn read_mapped(&self, buffer: ResourceId, offset: u64, len: u64) -> BackendResult<Vec<u8>> {
        let state = self.state.lock();
        match state.resources.get(&buffer) {
            Some(WgpuResource::Buffer {
                buffer: wgpu_buffer,
                domain: MemoryDomain::Readback,
            }) => self.map_and_read(wgpu_buffer, offset, len),
            Some(_) => Err(BackendError::InvalidCommand(format!(
                "{buffer} is not a readback buffer"
            ))),
            None => Err(BackendError::InvalidCommand(format!("unknown buffer {buffer}"))),
        }
    }

    fn destroy(&self, resource: ResourceId) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(WgpuResource::Texture {
            presentation: true, ..
        }) = state.resources.get(&resource)
        {
            return Err(BackendError::InvalidCommand(format!(
                "{resource} belongs to the presentation chain"
            )));
        }
        match state.resources.remove(&resource) {
            Some(WgpuResource::Buffer { buffer, .. }) => buffer.destroy(),
            Some(WgpuResource::Texture {
                texture,
                descriptor,
                ..
            }) => {
                log::trace!("destroying texture '{}'", descriptor.label_or_default());
                texture.destroy();
            }
            None => {
                return Err(BackendError::InvalidCommand(format!(
                    "destroy of unknown resource {resource}"
                )))
            }
        }
        state.bind_groups.retain(|key, _| !key.references(resource));
        Ok(())
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.pipelines.remove(&pipeline).ok_or_else(|| {
            BackendError::InvalidCommand(format!("destroy of unknown pipeline {pipeline:?}"))
        })?;
        state.bind_groups.retain(|key, _| key.pipeline != pipeline);
        Ok(())
    }

    fn submit(&self, commands: &CommandList) -> BackendResult<SubmissionIndex> {
        let mut state = self.state.lock();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(commands.label()),
            });
        self.encode_list(&mut state, &mut encoder, commands)?;
        self.queue.submit(Some(encoder.finish()));

        let index = SubmissionIndex(state.last_submission.map_or(0, |last| last.0 + 1));
        state.last_submission = Some(index);
        log::trace!("submitted '{}' as {:?}", commands.label(), index);
        Ok(index)
    }

    fn wait_for_idle(&self) -> BackendResult<GpuIdle> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(GpuIdle::new(self.state.lock().last_submission))
    }

    fn output_size(&self) -> Extent2d {
        self.config.output_size
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
            .ok_or_else(|| {
                BackendError::InvalidCommand(format!("no presentation target for frame {frame}"))
            })
    }

    fn present(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(acquired) = state.acquired {
            return Err(BackendError::InvalidCommand(format!(
                "present while frame {acquired} is acquired by the compositor"
            )));
        }
        state.frame_index = (state.frame_index + 1) % self.config.frame_count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders_clamp() {
        let config = WgpuDeviceConfig::default()
            .with_frame_count(0)
            .with_output_size(0, 480);
        assert_eq!(config.frame_count, 1);
        assert_eq!(config.output_size, Extent2d::new(1, 480));
    }

    #[test]
    fn test_readback_buffers_are_map_read_only() {
        let usage = WgpuDevice::convert_buffer_usage(MemoryDomain::Readback, BufferUsage::COPY_DST);
        assert_eq!(
            usage,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST
        );
    }

    #[test]
    fn test_upload_buffers_are_queue_writable() {
        let usage = WgpuDevice::convert_buffer_usage(MemoryDomain::Upload, BufferUsage::UNIFORM);
        assert!(usage.contains(wgpu::BufferUsages::COPY_DST));
        assert!(usage.contains(wgpu::BufferUsages::UNIFORM));
    }

    #[test]
    fn test_feedback_format_unsupported() {
        assert!(WgpuDevice::convert_texture_format(TextureFormat::FeedbackMinMip).is_err());
        assert_eq!(
            WgpuDevice::convert_texture_format(TextureFormat::R8Uint).ok(),
            Some(wgpu::TextureFormat::R8Uint)
        );
    }
}
