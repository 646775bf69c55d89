//! Two-phase hand-off of a presentation image to the overlay pass.

use crate::backend::GpuDevice;
use crate::commands::CommandList;
use crate::error::RendererResult;
use crate::resources::{ResourceState, TrackedResource};

use super::OverlayCanvas;

/// Draw `canvas` over the presentation image of `frame`.
///
/// The rasterization pass must already have returned `target` to `Present`.
/// The target is always released, even when drawing fails.
pub fn compose_overlay(
    device: &dyn GpuDevice,
    frame: u32,
    target: &TrackedResource,
    canvas: &OverlayCanvas,
) -> RendererResult<()> {
    CommandList::require_state(target, ResourceState::Present)?;

    let shared = device.acquire_shared_target(frame)?;
    let drawn = device.draw_overlay(&shared, canvas);
    device.release_shared_target(shared)?;
    drawn?;

    log::trace!(
        "Composited {}x{} overlay onto frame {}",
        canvas.width(),
        canvas.height(),
        frame
    );
    Ok(())
}
