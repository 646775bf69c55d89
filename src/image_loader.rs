//! Image file decoding into premultiplied BGRA pixels

use std::path::{Path, PathBuf};

use image::RgbaImage;

use crate::error::{RendererError, RendererResult};
use crate::resources::DecodedImage;

/// Decode an image file into 32-bit BGRA with premultiplied alpha.
pub fn decode_image<P: AsRef<Path>>(path: P) -> RendererResult<DecodedImage> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|source| RendererError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = from_rgba(&img.to_rgba8());
    log::debug!(
        "Decoded {} ({}x{})",
        path.display(),
        decoded.width,
        decoded.height
    );
    Ok(decoded)
}

/// Convert straight-alpha RGBA into premultiplied BGRA.
pub fn from_rgba(rgba: &RgbaImage) -> DecodedImage {
    let (width, height) = rgba.dimensions();
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for px in rgba.pixels() {
        let [r, g, b, a] = px.0;
        let premultiply = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
        pixels.extend_from_slice(&[premultiply(b), premultiply(g), premultiply(r), a]);
    }
    DecodedImage::new(width, height, pixels)
}

/// Decode every mip file under `dir`, in the given order.
pub fn load_mip_images<S: AsRef<str>>(dir: &Path, names: &[S]) -> RendererResult<Vec<DecodedImage>> {
    names
        .iter()
        .map(|name| {
            let path: PathBuf = dir.join(name.as_ref());
            decode_image(path)
        })
        .collect()
}
