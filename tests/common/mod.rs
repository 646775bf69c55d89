//! Shared fixtures for the renderer integration tests.

use std::sync::Arc;

use sampler_feedback_renderer::backend::{DummyDevice, DummyDeviceConfig, GpuDevice};
use sampler_feedback_renderer::resources::DecodedImage;
use sampler_feedback_renderer::{RendererConfig, SceneRenderer};

/// Initialize logging for test output.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// A full mip chain starting at `size`, each level a different solid color.
pub fn mip_chain(size: u32, levels: u32) -> Vec<DecodedImage> {
    (0..levels)
        .map(|level| {
            let extent = (size >> level).max(1);
            let shade = (level * 40) as u8;
            DecodedImage::solid(extent, extent, [shade, 255 - shade, level as u8, 255])
        })
        .collect()
}

/// The six level chain the demo ships with: 256x256 down to 8x8.
pub fn demo_mip_chain() -> Vec<DecodedImage> {
    mip_chain(256, 6)
}

/// A renderer over a dummy device, returning the device for inspection.
#[allow(dead_code)]
pub fn dummy_renderer(config: DummyDeviceConfig) -> (Arc<DummyDevice>, SceneRenderer) {
    configured_renderer(config, RendererConfig::default())
}

/// Same as [`dummy_renderer`] with a non-default renderer configuration.
#[allow(dead_code)]
pub fn configured_renderer(
    device_config: DummyDeviceConfig,
    renderer_config: RendererConfig,
) -> (Arc<DummyDevice>, SceneRenderer) {
    init_logging();
    let device = Arc::new(DummyDevice::with_config(device_config));
    let shared: Arc<dyn GpuDevice> = device.clone();
    let renderer = match SceneRenderer::new(shared, renderer_config) {
        Ok(renderer) => renderer,
        Err(e) => panic!("renderer creation failed: {e}"),
    };
    (device, renderer)
}

/// Same as [`dummy_renderer`], with the demo mip chain already loaded.
#[allow(dead_code)]
pub fn loaded_renderer(config: DummyDeviceConfig) -> (Arc<DummyDevice>, SceneRenderer) {
    let (device, mut renderer) = dummy_renderer(config);
    renderer
        .load(&demo_mip_chain())
        .expect("loading the demo mip chain");
    (device, renderer)
}
