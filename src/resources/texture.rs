//! Mip-mapped texture streaming

use crate::backend::{
    GpuDevice, TextureDescriptor, TextureFootprint, TextureFormat, TextureUsage,
};
use crate::commands::{Command, CommandList};
use crate::error::{RendererError, RendererResult};

use super::{discard_resources, ResourceState, StagingArena, StagingBuffer, TrackedResource};

/// A decoded image: tightly packed 32-bit BGRA with premultiplied alpha.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub const BYTES_PER_PIXEL: u32 = 4;

    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Create a single color image
    pub fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let pixels = bgra
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * Self::BYTES_PER_PIXEL as usize)
            .collect();
        Self::new(width, height, pixels)
    }

    /// Size of a tightly packed `width` x `height` image, `None` on overflow.
    pub fn byte_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(Self::BYTES_PER_PIXEL as usize)
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL as usize
    }

    /// Copy the rows into a buffer laid out with the footprint's row pitch.
    pub fn to_pitched(&self, footprint: &TextureFootprint) -> Vec<u8> {
        let pitch = footprint.row_pitch as usize;
        let row = self.row_bytes();
        let mut out = vec![0u8; footprint.total_bytes() as usize];
        for (y, src) in self.pixels.chunks_exact(row).enumerate() {
            let start = footprint.offset as usize + y * pitch;
            out[start..start + row].copy_from_slice(src);
        }
        out
    }
}

/// Check that `images` form a standard mip chain, largest first.
///
/// Level `i + 1` must be `max(1, level_i / 2)` in each dimension and every
/// pixel buffer must be exactly `width * height * 4` bytes.
pub fn validate_mip_chain(images: &[DecodedImage]) -> RendererResult<()> {
    let first = images
        .first()
        .ok_or_else(|| RendererError::InvalidMipChain("no images supplied".to_string()))?;
    if first.width == 0 || first.height == 0 {
        return Err(RendererError::InvalidMipChain(format!(
            "level 0 is {}x{}",
            first.width, first.height
        )));
    }

    let mut expected = (first.width, first.height);
    for (level, image) in images.iter().enumerate() {
        if (image.width, image.height) != expected {
            return Err(RendererError::InvalidMipChain(format!(
                "level {} is {}x{}, expected {}x{}",
                level, image.width, image.height, expected.0, expected.1
            )));
        }
        let max_row = u32::MAX - (TextureFootprint::PITCH_ALIGNMENT - 1);
        let row_fits = image
            .width
            .checked_mul(DecodedImage::BYTES_PER_PIXEL)
            .is_some_and(|row| row <= max_row);
        let expected_len = DecodedImage::byte_len(image.width, image.height)
            .filter(|_| row_fits)
            .ok_or_else(|| {
                RendererError::InvalidMipChain(format!(
                    "level {} is {}x{}, too large to address",
                    level, image.width, image.height
                ))
            })?;
        if image.pixels.len() != expected_len {
            return Err(RendererError::InvalidMipChain(format!(
                "level {} has {} bytes, expected {}",
                level,
                image.pixels.len(),
                expected_len
            )));
        }
        expected = ((expected.0 / 2).max(1), (expected.1 / 2).max(1));
    }

    let max_levels = 32 - first.width.max(first.height).leading_zeros();
    if images.len() as u32 > max_levels {
        return Err(RendererError::InvalidMipChain(format!(
            "{} levels for a {}x{} texture, at most {} allowed",
            images.len(),
            first.width,
            first.height,
            max_levels
        )));
    }
    Ok(())
}

/// The streamed texture after its upload has been recorded.
#[derive(Debug)]
pub struct MipTexture {
    pub resource: TrackedResource,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
}

/// Record the upload of a full mip chain into one texture.
///
/// One staging buffer and one copy per level, followed by a single
/// transition of the whole texture to `PixelShaderResource`. Staging buffers
/// are handed to `arena`.
pub fn load_mip_chain(
    device: &dyn GpuDevice,
    list: &mut CommandList,
    images: &[DecodedImage],
    arena: &mut StagingArena,
) -> RendererResult<MipTexture> {
    validate_mip_chain(images)?;

    let width = images[0].width;
    let height = images[0].height;
    let mip_levels = images.len() as u32;
    let format = TextureFormat::Bgra8Unorm;

    let descriptor = TextureDescriptor::new(
        "mip texture",
        width,
        height,
        format,
        TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        ResourceState::CopyDest,
    )
    .with_mip_levels(mip_levels);
    let id = device
        .create_texture(&descriptor)
        .map_err(|e| RendererError::resource_creation("mip texture", e))?;
    let mut resource = TrackedResource::new(id, "mip texture", ResourceState::CopyDest);

    if let Err(e) = record_level_copies(device, list, images, &resource, arena) {
        discard_resources(device, &[id]);
        return Err(e);
    }

    list.transition(&mut resource, ResourceState::PixelShaderResource);

    log::debug!(
        "Scheduled {}x{} texture upload with {} mip levels",
        width,
        height,
        mip_levels
    );
    Ok(MipTexture {
        resource,
        width,
        height,
        mip_levels,
        format,
    })
}

fn record_level_copies(
    device: &dyn GpuDevice,
    list: &mut CommandList,
    images: &[DecodedImage],
    texture: &TrackedResource,
    arena: &mut StagingArena,
) -> RendererResult<()> {
    for (level, image) in images.iter().enumerate() {
        let footprint =
            TextureFootprint::aligned(image.width, image.height, DecodedImage::BYTES_PER_PIXEL);
        let staging = StagingBuffer::with_contents(
            device,
            format!("mip {level} upload"),
            &image.to_pitched(&footprint),
        )?;
        let src = staging.id();
        arena.push(staging);

        CommandList::require_state(texture, ResourceState::CopyDest)?;
        list.push(Command::CopyBufferToTexture {
            src,
            footprint,
            dst: texture.id(),
            mip_level: level as u32,
        })?;
    }
    Ok(())
}
