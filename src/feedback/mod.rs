//! Sampler feedback capture, resolve, readback and visualization.
//!
//! While the cube is drawn the GPU records, per 16x16 texel tile, the finest
//! mip level sampled from the streamed texture into an opaque feedback map.
//! Each frame the map is resolved into a one-byte-per-tile decode texture,
//! which is copied into a readback buffer. The CPU reads that buffer without
//! waiting, so the grid it sees is from the most recently completed frame.

pub mod compositor;
pub mod decode;
pub mod overlay;

pub use compositor::compose_overlay;
pub use decode::{decode_tile, ColorKey, TileUsage, UNUSED_TILE};
pub use overlay::{visualize, Overlay, OverlayCanvas, OverlayCell, PixelRect};

use crate::backend::{
    BackendError, BufferDescriptor, FeedbackMapDescriptor, GpuDevice, ResourceId, TextureDescriptor,
    TextureFootprint, TextureFormat, TextureUsage,
};
use crate::commands::{Command, CommandList};
use crate::error::{RendererError, RendererResult};
use crate::resources::{discard_resources, MipTexture, ResourceState, TrackedResource};

/// Resolved feedback, one raw byte per tile, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeGrid {
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<u8>,
}

impl DecodeGrid {
    pub fn raw(&self, x: u32, y: u32) -> u8 {
        self.tiles[y as usize * self.width as usize + x as usize]
    }

    /// Number of tiles sampled at any level.
    pub fn used_tiles(&self) -> usize {
        self.tiles.iter().filter(|&&raw| raw != UNUSED_TILE).count()
    }
}

/// Tile grid dimensions for a texture, rounding partial tiles up.
///
/// `None` for a zero tile size.
pub fn tile_grid_extent(width: u32, height: u32, tile_size: u32) -> Option<(u32, u32)> {
    if tile_size == 0 {
        return None;
    }
    Some((width.div_ceil(tile_size), height.div_ceil(tile_size)))
}

/// Feedback map, decode texture and readback buffer for one texture.
#[derive(Debug)]
pub struct FeedbackPipeline {
    feedback: TrackedResource,
    decode: TrackedResource,
    readback: TrackedResource,
    footprint: TextureFootprint,
    resolved: bool,
}

impl FeedbackPipeline {
    /// Create the feedback resources for `texture`.
    ///
    /// Must run after the texture upload has completed, since the decode
    /// texture is sized from the final texture dimensions.
    pub fn new(device: &dyn GpuDevice, texture: &MipTexture, tile_size: u32) -> RendererResult<Self> {
        let (grid_width, grid_height) = tile_grid_extent(texture.width, texture.height, tile_size)
            .ok_or_else(|| {
                RendererError::resource_creation(
                    "feedback map",
                    BackendError::ResourceCreationFailed(
                        "feedback tile size must be non-zero".to_string(),
                    ),
                )
            })?;

        let feedback_id = device
            .create_feedback_map(&FeedbackMapDescriptor {
                label: Some("feedback map".to_string()),
                paired: texture.resource.id(),
                paired_width: texture.width,
                paired_height: texture.height,
                paired_mip_levels: texture.mip_levels,
                tile_width: tile_size,
                tile_height: tile_size,
            })
            .map_err(|e| RendererError::resource_creation("feedback map", e))?;
        let feedback =
            TrackedResource::new(feedback_id, "feedback map", ResourceState::UnorderedAccess);

        let decode_desc = TextureDescriptor::new(
            "feedback decode",
            grid_width,
            grid_height,
            TextureFormat::R8Uint,
            TextureUsage::COPY_SRC,
            ResourceState::ResolveDest,
        );
        let decode_id = match device.create_texture(&decode_desc) {
            Ok(id) => id,
            Err(e) => {
                discard_resources(device, &[feedback_id]);
                return Err(RendererError::resource_creation("feedback decode texture", e));
            }
        };
        let decode = TrackedResource::new(decode_id, "feedback decode", ResourceState::ResolveDest);

        let footprint = TextureFootprint::aligned(grid_width, grid_height, 1);
        let readback_desc = BufferDescriptor::readback("feedback readback", footprint.total_bytes());
        let readback_id = match device.create_buffer(&readback_desc) {
            Ok(id) => id,
            Err(e) => {
                discard_resources(device, &[decode_id, feedback_id]);
                return Err(RendererError::resource_creation("feedback readback buffer", e));
            }
        };
        let readback =
            TrackedResource::new(readback_id, "feedback readback", ResourceState::CopyDest);

        log::info!(
            "Sampler feedback enabled: {}x{} tiles of {}x{} texels",
            grid_width,
            grid_height,
            tile_size,
            tile_size
        );
        Ok(Self {
            feedback,
            decode,
            readback,
            footprint,
            resolved: false,
        })
    }

    pub fn feedback_map(&self) -> ResourceId {
        self.feedback.id()
    }

    pub fn decode_texture(&self) -> ResourceId {
        self.decode.id()
    }

    pub fn readback_buffer(&self) -> ResourceId {
        self.readback.id()
    }

    pub fn grid_extent(&self) -> (u32, u32) {
        (self.footprint.width, self.footprint.height)
    }

    /// Record resolve of the feedback map and the copy into the readback buffer.
    ///
    /// Leaves every resource in the state it started in, ready for the next
    /// frame's draw and resolve.
    pub fn record_resolve(&mut self, list: &mut CommandList) -> RendererResult<()> {
        let states = (self.feedback.state(), self.decode.state());
        let result = self.record_resolve_commands(list);
        if result.is_err() {
            self.feedback.set_state(states.0);
            self.decode.set_state(states.1);
        }
        result
    }

    fn record_resolve_commands(&mut self, list: &mut CommandList) -> RendererResult<()> {
        list.transition_from(
            &mut self.feedback,
            ResourceState::UnorderedAccess,
            ResourceState::ResolveSource,
        )?;
        CommandList::require_state(&self.decode, ResourceState::ResolveDest)?;
        list.push(Command::ResolveFeedback {
            feedback: self.feedback.id(),
            decode: self.decode.id(),
        })?;
        list.transition_from(
            &mut self.feedback,
            ResourceState::ResolveSource,
            ResourceState::UnorderedAccess,
        )?;

        list.transition_from(
            &mut self.decode,
            ResourceState::ResolveDest,
            ResourceState::CopySource,
        )?;
        CommandList::require_state(&self.readback, ResourceState::CopyDest)?;
        list.push(Command::CopyTextureToBuffer {
            src: self.decode.id(),
            dst: self.readback.id(),
            footprint: self.footprint,
        })?;
        list.transition_from(
            &mut self.decode,
            ResourceState::CopySource,
            ResourceState::ResolveDest,
        )?;

        self.resolved = true;
        Ok(())
    }

    /// Read the latest resolved grid, `None` before the first resolve was recorded.
    pub fn read_grid(&self, device: &dyn GpuDevice) -> RendererResult<Option<DecodeGrid>> {
        if !self.resolved {
            return Ok(None);
        }
        let bytes = device.read_mapped(self.readback.id(), 0, self.footprint.total_bytes())?;
        let row = self.footprint.packed_row_bytes() as usize;
        let pitch = self.footprint.row_pitch as usize;
        let tiles = bytes
            .chunks(pitch)
            .take(self.footprint.height as usize)
            .flat_map(|line| line[..row].iter().copied())
            .collect();
        Ok(Some(DecodeGrid {
            width: self.footprint.width,
            height: self.footprint.height,
            tiles,
        }))
    }

    pub fn destroy(self, device: &dyn GpuDevice) -> RendererResult<()> {
        device.destroy(self.readback.id())?;
        device.destroy(self.decode.id())?;
        device.destroy(self.feedback.id())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyDevice, DummyDeviceConfig, FeedbackPattern};
    use crate::resources::{load_mip_chain, DecodedImage, StagingArena};

    fn texture(device: &DummyDevice, size: u32) -> MipTexture {
        let mut list = CommandList::new("upload");
        let mut arena = StagingArena::new();
        let images = vec![
            DecodedImage::solid(size, size, [0, 0, 0, 255]),
            DecodedImage::solid(size / 2, size / 2, [0, 0, 0, 255]),
        ];
        let texture = load_mip_chain(device, &mut list, &images, &mut arena).unwrap();
        device.submit(&list).unwrap();
        texture
    }

    #[test]
    fn test_tile_grid_rounds_up() {
        assert_eq!(tile_grid_extent(256, 256, 16), Some((16, 16)));
        assert_eq!(tile_grid_extent(100, 33, 16), Some((7, 3)));
        assert_eq!(tile_grid_extent(1, 1, 16), Some((1, 1)));
        assert_eq!(tile_grid_extent(256, 256, 0), None);
    }

    #[test]
    fn test_zero_tile_size_is_rejected_before_allocating() {
        let device = DummyDevice::with_config(DummyDeviceConfig::default().with_sampler_feedback(true));
        let texture = texture(&device, 64);
        let live = device.live_resource_count();

        match FeedbackPipeline::new(&device, &texture, 0) {
            Err(RendererError::ResourceCreation { resource, .. }) => {
                assert_eq!(resource, "feedback map")
            }
            other => panic!("expected a resource creation error, got {other:?}"),
        }
        assert_eq!(device.live_resource_count(), live);
    }

    #[test]
    fn test_failed_readback_allocation_releases_map_and_decode() {
        let device = DummyDevice::with_config(
            DummyDeviceConfig::default()
                .with_sampler_feedback(true)
                .with_failing_allocation("feedback readback"),
        );
        let texture = texture(&device, 64);
        let live = device.live_resource_count();

        assert!(FeedbackPipeline::new(&device, &texture, 16).is_err());
        assert_eq!(device.live_resource_count(), live);
    }

    #[test]
    fn test_record_resolve_sequence() {
        let device = DummyDevice::with_config(DummyDeviceConfig::default().with_sampler_feedback(true));
        let texture = texture(&device, 64);
        let mut pipeline = FeedbackPipeline::new(&device, &texture, 16).unwrap();
        let mut list = CommandList::new("frame");

        pipeline.record_resolve(&mut list).unwrap();

        let feedback = pipeline.feedback_map();
        let decode = pipeline.decode_texture();
        let barrier = |resource, before, after| Command::Barrier {
            resource,
            before,
            after,
        };
        assert_eq!(
            list.commands(),
            &[
                barrier(feedback, ResourceState::UnorderedAccess, ResourceState::ResolveSource),
                Command::ResolveFeedback { feedback, decode },
                barrier(feedback, ResourceState::ResolveSource, ResourceState::UnorderedAccess),
                barrier(decode, ResourceState::ResolveDest, ResourceState::CopySource),
                Command::CopyTextureToBuffer {
                    src: decode,
                    dst: pipeline.readback_buffer(),
                    footprint: TextureFootprint::aligned(4, 4, 1),
                },
                barrier(decode, ResourceState::CopySource, ResourceState::ResolveDest),
            ]
        );
    }

    #[test]
    fn test_failed_resolve_restores_tracked_states() {
        let device = DummyDevice::with_config(DummyDeviceConfig::default().with_sampler_feedback(true));
        let texture = texture(&device, 64);
        let mut pipeline = FeedbackPipeline::new(&device, &texture, 16).unwrap();
        pipeline.readback.set_state(ResourceState::CopySource);
        let mut list = CommandList::new("frame");

        let result = pipeline.record_resolve(&mut list);

        assert!(matches!(result, Err(RendererError::InvariantViolation(_))));
        assert_eq!(pipeline.feedback.state(), ResourceState::UnorderedAccess);
        assert_eq!(pipeline.decode.state(), ResourceState::ResolveDest);
    }

    #[test]
    fn test_read_grid_strips_row_padding() {
        let device = DummyDevice::with_config(
            DummyDeviceConfig::default()
                .with_sampler_feedback(true)
                .with_feedback_pattern(FeedbackPattern::Uniform(1)),
        );
        let texture = texture(&device, 64);
        let mut pipeline = FeedbackPipeline::new(&device, &texture, 16).unwrap();
        assert_eq!(pipeline.read_grid(&device).unwrap(), None);

        let mut list = CommandList::new("frame");
        pipeline.record_resolve(&mut list).unwrap();
        device.submit(&list).unwrap();

        let grid = pipeline.read_grid(&device).unwrap().unwrap();
        assert_eq!((grid.width, grid.height), (4, 4));
        // No draw sampled the texture, so every tile reads as unused
        assert_eq!(grid.tiles, vec![UNUSED_TILE; 16]);
        assert_eq!(grid.used_tiles(), 0);
    }

    #[test]
    fn test_feedback_unsupported() {
        let device = DummyDevice::new();
        let texture = texture(&device, 32);
        assert!(matches!(
            FeedbackPipeline::new(&device, &texture, 16),
            Err(RendererError::ResourceCreation { .. })
        ));
    }
}
