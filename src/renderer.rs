//! The spinning cube renderer.
//!
//! Ties the components together: a one-time staged upload of the cube and
//! its mip chain, then per frame a constant slot write, one recorded command
//! list (draw plus optional feedback resolve) and, when sampler feedback is
//! available, the overlay pass.

use std::sync::Arc;

use crate::backend::{
    BufferUsage, DeviceCapabilities, GpuDevice, IndexFormat, PipelineId, PresentationTarget,
    ResourceId, SubmissionIndex,
};
use crate::commands::{BindingTable, Command, CommandList, FrameRecorder, ScissorRect, Viewport};
use crate::config::RendererConfig;
use crate::error::{RendererError, RendererResult};
use crate::feedback::{compose_overlay, visualize, DecodeGrid, FeedbackPipeline};
use crate::resources::{
    create_and_upload, discard_resources, load_mip_chain, validate_mip_chain, ConstantStore,
    DecodedImage, MipTexture, ResourceState, StagingArena, TrackedResource, TransformData,
};
use crate::scene::{
    cube_indices, cube_pipeline_descriptor, Camera, CubeVertex, Rotation, CUBE_VERTICES,
};

/// Geometry and texture, present once loading has completed.
#[derive(Debug)]
struct LoadedScene {
    vertices: TrackedResource,
    indices: TrackedResource,
    index_count: u32,
    texture: MipTexture,
}

/// Renders a textured cube and, where supported, a sampler feedback overlay.
pub struct SceneRenderer {
    device: Arc<dyn GpuDevice>,
    config: RendererConfig,
    capabilities: DeviceCapabilities,

    pipeline: PipelineId,
    constants: ConstantStore,
    recorder: FrameRecorder,
    arena: StagingArena,

    /// Back buffer per frame slot, tracked in `Present` between frames.
    back_buffers: Vec<TrackedResource>,
    depth: TrackedResource,

    camera: Camera,
    rotation: Rotation,
    viewport: Viewport,
    scissor: ScissorRect,

    scene: Option<LoadedScene>,
    feedback: Option<FeedbackPipeline>,
    last_grid: Option<DecodeGrid>,
}

impl SceneRenderer {
    /// Create the pipeline and constant store.
    ///
    /// Device capabilities are queried once here and cached for the lifetime
    /// of the renderer.
    pub fn new(device: Arc<dyn GpuDevice>, config: RendererConfig) -> RendererResult<Self> {
        let capabilities = device.capabilities();
        log::info!(
            "Creating renderer on {} ({} frames, sampler feedback: {})",
            device.name(),
            device.frame_count(),
            capabilities.sampler_feedback
        );

        let pipeline = device
            .create_pipeline(&cube_pipeline_descriptor())
            .map_err(|e| RendererError::resource_creation("cube pipeline", e))?;
        let constants = ConstantStore::new(
            device.as_ref(),
            device.frame_count(),
            capabilities.constant_buffer_alignment,
        )?;

        let mut back_buffers = Vec::with_capacity(device.frame_count() as usize);
        let mut depth = None;
        for frame in 0..device.frame_count() {
            let target = device.presentation_target(frame)?;
            back_buffers.push(TrackedResource::new(
                target.color,
                format!("back buffer {frame}"),
                ResourceState::Present,
            ));
            depth.get_or_insert_with(|| {
                TrackedResource::new(target.depth, "depth buffer", ResourceState::DepthWrite)
            });
        }
        let depth =
            depth.ok_or_else(|| RendererError::invariant("device has no presentation targets"))?;

        let output = device.output_size();
        let camera = Camera::new(config.camera.clone(), output);
        let rotation = Rotation::new(config.rotation_speed, config.rotate_on_start);

        Ok(Self {
            device,
            capabilities,
            pipeline,
            constants,
            recorder: FrameRecorder::new(),
            arena: StagingArena::new(),
            back_buffers,
            depth,
            camera,
            rotation,
            viewport: Viewport::full(output.width, output.height),
            scissor: ScissorRect {
                x: 0,
                y: 0,
                width: output.width,
                height: output.height,
            },
            scene: None,
            feedback: None,
            last_grid: None,
            config,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.scene.is_some()
    }

    /// Whether the feedback resolve and overlay run each frame.
    pub fn feedback_active(&self) -> bool {
        self.feedback.is_some()
    }

    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    pub fn constant_store(&self) -> &ConstantStore {
        &self.constants
    }

    pub fn texture(&self) -> Option<&MipTexture> {
        self.scene.as_ref().map(|s| &s.texture)
    }

    pub fn feedback_pipeline(&self) -> Option<&FeedbackPipeline> {
        self.feedback.as_ref()
    }

    /// Feedback grid drawn by the most recent overlay pass.
    pub fn last_feedback_grid(&self) -> Option<&DecodeGrid> {
        self.last_grid.as_ref()
    }

    /// Upload the cube and the mip chain, then create the feedback resources.
    ///
    /// Blocks until the GPU is idle so the staging buffers can be released.
    /// On failure everything created so far is released again and the
    /// renderer stays unloaded.
    pub fn load(&mut self, images: &[DecodedImage]) -> RendererResult<()> {
        if self.scene.is_some() {
            return Err(RendererError::invariant("renderer is already loaded"));
        }
        validate_mip_chain(images)?;

        let mut created = Vec::new();
        let (scene, feedback) = match self.create_scene(images, &mut created) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("Loading failed: {}", e);
                self.discard_partial_load(&created);
                return Err(e);
            }
        };

        if feedback.is_none() {
            log::info!("Sampler feedback not supported, overlay disabled");
        }
        log::info!(
            "Loaded cube and {}x{} texture with {} mips",
            scene.texture.width,
            scene.texture.height,
            scene.texture.mip_levels
        );
        self.feedback = feedback;
        self.scene = Some(scene);
        Ok(())
    }

    /// Every device resource the scene owns is appended to `created` as soon
    /// as it exists.
    fn create_scene(
        &mut self,
        images: &[DecodedImage],
        created: &mut Vec<ResourceId>,
    ) -> RendererResult<(LoadedScene, Option<FeedbackPipeline>)> {
        let device = self.device.as_ref();

        let list = self.recorder.begin("initial upload")?;
        let (vertices, staging) = create_and_upload(
            device,
            list,
            "cube vertices",
            bytemuck::cast_slice(&CUBE_VERTICES),
            BufferUsage::VERTEX,
            ResourceState::VertexBuffer,
        )?;
        created.push(vertices.id());
        self.arena.push(staging);

        let indices = cube_indices();
        let (index_buffer, staging) = create_and_upload(
            device,
            list,
            "cube indices",
            bytemuck::cast_slice(&indices),
            BufferUsage::INDEX,
            ResourceState::IndexBuffer,
        )?;
        created.push(index_buffer.id());
        self.arena.push(staging);

        let texture = load_mip_chain(device, list, images, &mut self.arena)?;
        created.push(texture.resource.id());

        let submission = self.recorder.submit(device)?;
        self.arena.mark_submitted(submission);
        let idle = device.wait_for_idle()?;
        self.arena.release(device, &idle)?;

        let feedback = if self.capabilities.sampler_feedback {
            Some(FeedbackPipeline::new(
                device,
                &texture,
                self.config.feedback_tile_size,
            )?)
        } else {
            None
        };

        let scene = LoadedScene {
            vertices,
            indices: index_buffer,
            index_count: indices.len() as u32,
            texture,
        };
        Ok((scene, feedback))
    }

    /// Release what a failed [`Self::load`] left behind.
    ///
    /// Errors are logged so the load error is the one reported.
    fn discard_partial_load(&mut self, created: &[ResourceId]) {
        self.recorder.abandon();
        let device = self.device.as_ref();
        let idle = match device.wait_for_idle() {
            Ok(idle) => idle,
            Err(e) => {
                log::warn!(
                    "Device did not go idle, keeping {} resources of the failed load: {}",
                    created.len(),
                    e
                );
                return;
            }
        };
        if let Err(e) = self.arena.release_all(device, &idle) {
            log::warn!("Failed to release staging buffers: {}", e);
        }
        discard_resources(device, created);
    }

    /// Advance the rotation. Does nothing until loading has completed.
    pub fn update(&mut self, elapsed_seconds: f64) {
        if self.scene.is_some() {
            self.rotation.advance(elapsed_seconds);
        }
    }

    pub fn on_key_toggle_rotation(&mut self) {
        self.rotation.toggle();
        log::debug!("Rotation enabled: {}", self.rotation.is_enabled());
    }

    /// Recompute projection, viewport and scissor from the current output size.
    pub fn on_window_size_changed(&mut self) {
        let output = self.device.output_size();
        self.camera.resize(output);
        self.viewport = Viewport::full(output.width, output.height);
        self.scissor = ScissorRect {
            x: 0,
            y: 0,
            width: output.width,
            height: output.height,
        };
        log::debug!("Output resized to {}x{}", output.width, output.height);
    }

    fn transform(&self) -> TransformData {
        TransformData::new(
            self.rotation.model_matrix(),
            self.camera.view_matrix(),
            self.camera.projection_matrix(),
        )
    }

    /// Record and submit one frame.
    ///
    /// Returns `false` while loading has not completed.
    ///
    /// A recording error leaves the frame unsubmitted and the back buffer's
    /// tracked state as it was.
    pub fn render(&mut self) -> RendererResult<bool> {
        if self.scene.is_none() {
            return Ok(false);
        }
        let frame = self.device.current_frame_index();
        let slot = frame as usize;
        if slot >= self.back_buffers.len() {
            return Err(RendererError::invariant(format!(
                "frame index {frame} out of range"
            )));
        }

        let transform = self.transform();
        let constant_offset = self
            .constants
            .write_slot(self.device.as_ref(), frame, &transform)?;
        let target = self.device.presentation_target(frame)?;

        let back_buffer_state = self.back_buffers[slot].state();
        if let Err(e) = self.record_frame(frame, constant_offset, &target) {
            self.recorder.abandon();
            self.back_buffers[slot].set_state(back_buffer_state);
            return Err(e);
        }

        let device = self.device.as_ref();
        if let Some(feedback) = self.feedback.as_ref() {
            if let Some(grid) = feedback.read_grid(device)? {
                let canvas = visualize(&grid, self.config.overlay_canvas_size).rasterize();
                compose_overlay(device, frame, &self.back_buffers[slot], &canvas)?;
                self.last_grid = Some(grid);
            }
        }
        Ok(true)
    }

    /// Record the frame's draw and resolve, then submit it.
    fn record_frame(
        &mut self,
        frame: u32,
        constant_offset: u64,
        target: &PresentationTarget,
    ) -> RendererResult<()> {
        let device = self.device.as_ref();
        let scene = self
            .scene
            .as_ref()
            .ok_or_else(|| RendererError::invariant("recording a frame before load"))?;
        let slot = frame as usize;

        let list = self.recorder.begin(&format!("frame {frame}"))?;
        list.push(Command::SetPipeline(self.pipeline))?;
        list.push(Command::SetBindingTable(BindingTable {
            constants: self.constants.buffer(),
            constant_offset,
            constant_size: self.constants.aligned_slot_size(),
            texture: scene.texture.resource.id(),
            feedback: self.feedback.as_ref().map(FeedbackPipeline::feedback_map),
        }))?;
        list.push(Command::SetViewport(self.viewport))?;
        list.push(Command::SetScissor(self.scissor))?;

        let back_buffer = &mut self.back_buffers[slot];
        list.transition_from(back_buffer, ResourceState::Present, ResourceState::RenderTarget)?;
        list.push(Command::ClearColor {
            target: target.color,
            color: self.config.clear_color,
        })?;
        CommandList::require_state(&self.depth, ResourceState::DepthWrite)?;
        list.push(Command::ClearDepth {
            target: target.depth,
            depth: self.config.clear_depth,
        })?;
        list.push(Command::SetRenderTargets {
            color: target.color,
            depth: target.depth,
        })?;
        list.push(Command::SetVertexBuffer {
            buffer: scene.vertices.id(),
            stride: std::mem::size_of::<CubeVertex>() as u64,
        })?;
        list.push(Command::SetIndexBuffer {
            buffer: scene.indices.id(),
            format: IndexFormat::Uint16,
        })?;
        list.push(Command::DrawIndexed {
            index_count: scene.index_count,
            instance_count: 1,
        })?;
        list.transition_from(back_buffer, ResourceState::RenderTarget, ResourceState::Present)?;

        if let Some(feedback) = self.feedback.as_mut() {
            feedback.record_resolve(list)?;
        }
        self.recorder.submit(device)?;
        Ok(())
    }

    /// Present the current back buffer and move to the next frame slot.
    pub fn present(&mut self) -> RendererResult<()> {
        self.device.present()?;
        Ok(())
    }

    pub fn last_submission(&self) -> Option<SubmissionIndex> {
        self.recorder.last_submission()
    }

    /// Wait for the GPU to go idle, then release every resource.
    pub fn shutdown(mut self) -> RendererResult<()> {
        let device = self.device.as_ref();
        let idle = device.wait_for_idle()?;
        log::info!("Shutting down renderer");

        self.arena.release_all(device, &idle)?;
        if let Some(feedback) = self.feedback.take() {
            feedback.destroy(device)?;
        }
        if let Some(scene) = self.scene.take() {
            device.destroy(scene.texture.resource.id())?;
            device.destroy(scene.indices.id())?;
            device.destroy(scene.vertices.id())?;
        }
        self.constants.destroy(device)?;
        device.destroy_pipeline(self.pipeline)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyDevice, DummyDeviceConfig};

    fn loaded(device: &Arc<DummyDevice>) -> SceneRenderer {
        let shared: Arc<dyn GpuDevice> = device.clone();
        let mut renderer = SceneRenderer::new(shared, RendererConfig::default()).unwrap();
        let images: Vec<_> = (0..4)
            .map(|level| DecodedImage::solid(64 >> level, 64 >> level, [0, 0, 255, 255]))
            .collect();
        renderer.load(&images).unwrap();
        renderer
    }

    #[test]
    fn test_drifted_back_buffer_fails_render_without_submitting() {
        let device = Arc::new(DummyDevice::with_config(
            DummyDeviceConfig::default().with_sampler_feedback(true),
        ));
        let mut renderer = loaded(&device);
        let submitted = device.submissions().len();

        // The device still has the image in Present
        renderer.back_buffers[0].set_state(ResourceState::RenderTarget);
        assert!(matches!(
            renderer.render(),
            Err(RendererError::InvariantViolation(_))
        ));
        assert_eq!(device.submissions().len(), submitted);
        assert_eq!(device.draw_count(), 0);
        assert!(device.compositor_events().is_empty());
        assert_eq!(
            renderer.back_buffers[0].state(),
            ResourceState::RenderTarget
        );

        // Once the tracked state agrees again the next frame records normally
        renderer.back_buffers[0].set_state(ResourceState::Present);
        assert!(renderer.render().unwrap());
        assert_eq!(device.submissions().len(), submitted + 1);
        assert_eq!(renderer.back_buffers[0].state(), ResourceState::Present);
    }
}
