//! End-to-end renderer tests against the recording dummy device.
//!
//! Every frame the renderer records is executed by the dummy device, which
//! validates resource states, so a wrong transition fails the submit and
//! therefore the test.

mod common;

use rstest::rstest;

use common::{configured_renderer, demo_mip_chain, dummy_renderer, loaded_renderer, mip_chain};
use sampler_feedback_renderer::backend::{CompositorEvent, DummyDeviceConfig, FeedbackPattern};
use sampler_feedback_renderer::commands::{Command, Viewport};
use sampler_feedback_renderer::feedback::{ColorKey, UNUSED_TILE};
use sampler_feedback_renderer::resources::ResourceState;
use sampler_feedback_renderer::{RendererConfig, RendererError};

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_records_one_copy_per_mip_and_one_transition() {
    let (device, renderer) = loaded_renderer(DummyDeviceConfig::default());

    let texture = renderer.texture().expect("texture after load");
    assert_eq!(texture.mip_levels, 6);
    assert_eq!((texture.width, texture.height), (256, 256));
    let texture_id = texture.resource.id();

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 1);
    let upload = &submissions[0];
    assert_eq!(upload.label(), "initial upload");

    let copies = upload
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::CopyBufferToTexture { dst, .. } if *dst == texture_id))
        .count();
    assert_eq!(copies, 6);

    let texture_barriers: Vec<_> = upload
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::Barrier {
                resource,
                before,
                after,
            } if *resource == texture_id => Some((*before, *after)),
            _ => None,
        })
        .collect();
    assert_eq!(
        texture_barriers,
        vec![(ResourceState::CopyDest, ResourceState::PixelShaderResource)]
    );
    assert_eq!(
        device.resource_state(texture_id),
        Some(ResourceState::PixelShaderResource)
    );
}

#[test]
fn test_load_uploads_every_level_verbatim() {
    let images = demo_mip_chain();
    let (device, mut renderer) = dummy_renderer(DummyDeviceConfig::default());
    renderer.load(&images).unwrap();

    let texture_id = renderer.texture().unwrap().resource.id();
    for (level, image) in images.iter().enumerate() {
        assert_eq!(
            device.texture_level(texture_id, level as u32).as_deref(),
            Some(image.pixels.as_slice()),
            "mip level {level}"
        );
    }
}

#[test]
fn test_load_releases_staging_buffers() {
    let (device, renderer) = loaded_renderer(DummyDeviceConfig::default());

    let staging: Vec<_> = device
        .allocations()
        .into_iter()
        .filter(|label| label.contains("upload"))
        .collect();
    // vertices, indices and one per mip level
    assert_eq!(staging.len(), 8);

    // vertex buffer, index buffer, texture, constant buffer
    assert_eq!(device.live_resource_count(), 4);
    assert!(renderer.is_loaded());
}

#[test]
fn test_load_twice_is_rejected() {
    let (_device, mut renderer) = loaded_renderer(DummyDeviceConfig::default());
    let result = renderer.load(&demo_mip_chain());
    assert!(matches!(result, Err(RendererError::InvariantViolation(_))));
}

#[test]
fn test_broken_mip_chain_is_rejected_before_allocating() {
    let (device, mut renderer) = dummy_renderer(DummyDeviceConfig::default());
    let mut images = mip_chain(256, 3);
    images.push(mip_chain(64, 1).remove(0));

    let result = renderer.load(&images);
    assert!(matches!(result, Err(RendererError::InvalidMipChain(_))));
    assert!(device.submissions().is_empty());
    assert!(!renderer.is_loaded());
}

#[rstest]
#[case::texture("mip texture")]
#[case::vertices("cube vertices")]
fn test_allocation_failure_surfaces_as_resource_creation(#[case] label: &str) {
    let (_device, mut renderer) =
        dummy_renderer(DummyDeviceConfig::default().with_failing_allocation(label));

    match renderer.load(&demo_mip_chain()) {
        Err(RendererError::ResourceCreation { resource, .. }) => assert_eq!(resource, label),
        other => panic!("expected a resource creation error, got {other:?}"),
    }
    assert!(!renderer.is_loaded());
}

#[rstest]
#[case::indices("cube indices", false)]
#[case::texture("mip texture", false)]
#[case::level_upload("mip 3 upload", false)]
#[case::decode_texture("feedback decode", true)]
#[case::readback("feedback readback", true)]
fn test_failed_load_leaves_nothing_after_shutdown(#[case] label: &str, #[case] feedback: bool) {
    let (device, mut renderer) = dummy_renderer(
        DummyDeviceConfig::default()
            .with_sampler_feedback(feedback)
            .with_failing_allocation(label),
    );

    assert!(renderer.load(&demo_mip_chain()).is_err());
    assert!(!renderer.is_loaded());
    assert!(!renderer.feedback_active());
    // only the constant buffer created with the renderer survives
    assert_eq!(device.live_resource_count(), 1);

    renderer.shutdown().unwrap();
    assert_eq!(device.live_resource_count(), 0);
    assert_eq!(device.live_pipeline_count(), 0);
}

#[test]
fn test_load_can_be_retried_after_failure() {
    let (_device, mut renderer) =
        dummy_renderer(DummyDeviceConfig::default().with_failing_allocation("mip 5 upload"));
    assert!(renderer.load(&demo_mip_chain()).is_err());

    // A shorter chain never reaches the failing allocation
    renderer.load(&mip_chain(256, 4)).unwrap();
    assert!(renderer.is_loaded());
    assert!(renderer.render().unwrap());
}

#[test]
fn test_zero_feedback_tile_size_is_a_resource_error() {
    let (device, mut renderer) = configured_renderer(
        DummyDeviceConfig::default().with_sampler_feedback(true),
        RendererConfig::default().with_feedback_tile_size(0),
    );

    match renderer.load(&demo_mip_chain()) {
        Err(RendererError::ResourceCreation { resource, .. }) => {
            assert_eq!(resource, "feedback map")
        }
        other => panic!("expected a resource creation error, got {other:?}"),
    }
    assert!(!renderer.is_loaded());
    renderer.shutdown().unwrap();
    assert_eq!(device.live_resource_count(), 0);
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn test_render_before_load_does_nothing() {
    let (device, mut renderer) = dummy_renderer(DummyDeviceConfig::default());
    assert!(!renderer.render().unwrap());
    assert!(device.submissions().is_empty());
    assert_eq!(device.draw_count(), 0);
}

#[test]
fn test_render_without_feedback_skips_resolve_and_overlay() {
    let (device, mut renderer) = loaded_renderer(DummyDeviceConfig::default());
    assert!(!renderer.feedback_active());

    assert!(renderer.render().unwrap());
    renderer.present().unwrap();

    let frame = device.submissions().pop().unwrap();
    assert!(!frame
        .commands()
        .iter()
        .any(|c| matches!(c, Command::ResolveFeedback { .. })));
    assert!(device.compositor_events().is_empty());
    assert_eq!(device.draw_count(), 1);
    assert_eq!(device.present_count(), 1);
    assert_eq!(
        device.last_clear_color(),
        Some(renderer.config().clear_color)
    );
}

#[rstest]
#[case::triple_buffered(3, vec![0, 256, 512, 0])]
#[case::double_buffered(2, vec![0, 256, 0, 256])]
fn test_constant_slot_follows_frame_index(#[case] frames: u32, #[case] expected: Vec<u64>) {
    let (device, mut renderer) =
        loaded_renderer(DummyDeviceConfig::default().with_frame_count(frames));
    let constants = renderer.constant_store().buffer();

    for _ in 0..expected.len() {
        assert!(renderer.render().unwrap());
        renderer.present().unwrap();
    }

    let offsets: Vec<u64> = device
        .mapped_writes()
        .into_iter()
        .filter(|w| w.resource == constants)
        .map(|w| w.offset)
        .collect();
    assert_eq!(offsets, expected);
}

#[test]
fn test_back_buffer_returns_to_present() {
    let (device, mut renderer) = loaded_renderer(DummyDeviceConfig::default());
    for _ in 0..5 {
        renderer.render().unwrap();
        renderer.present().unwrap();
    }
    for frame in 0..3 {
        let target = sampler_feedback_renderer::GpuDevice::presentation_target(
            device.as_ref(),
            frame,
        )
        .unwrap();
        assert_eq!(
            device.resource_state(target.color),
            Some(ResourceState::Present)
        );
    }
}

#[test]
fn test_resize_updates_viewport() {
    let (device, mut renderer) = loaded_renderer(DummyDeviceConfig::default());
    device.resize(800, 1000);
    renderer.on_window_size_changed();
    renderer.render().unwrap();

    let frame = device.submissions().pop().unwrap();
    let viewport = frame.commands().iter().find_map(|c| match c {
        Command::SetViewport(v) => Some(*v),
        _ => None,
    });
    assert_eq!(viewport, Some(Viewport::full(800, 1000)));
}

// ============================================================================
// Rotation
// ============================================================================

#[test]
fn test_update_before_load_keeps_angle() {
    let (_device, mut renderer) = dummy_renderer(DummyDeviceConfig::default());
    renderer.on_key_toggle_rotation();
    renderer.update(1.0);
    assert_eq!(renderer.rotation().angle(), 0.0);
}

#[test]
fn test_double_toggle_restores_rotation_state() {
    let (_device, mut renderer) = loaded_renderer(DummyDeviceConfig::default());
    let initial = renderer.rotation().is_enabled();

    renderer.on_key_toggle_rotation();
    assert_ne!(renderer.rotation().is_enabled(), initial);
    renderer.on_key_toggle_rotation();
    assert_eq!(renderer.rotation().is_enabled(), initial);
}

#[test]
fn test_rotation_advances_once_enabled() {
    let (_device, mut renderer) = loaded_renderer(DummyDeviceConfig::default());
    renderer.update(1.0);
    assert_eq!(renderer.rotation().angle(), 0.0);

    renderer.on_key_toggle_rotation();
    renderer.update(1.0);
    assert!(renderer.rotation().angle() > 0.0);
}

// ============================================================================
// Sampler feedback
// ============================================================================

#[test]
fn test_feedback_overlay_is_composited() {
    let (device, mut renderer) =
        loaded_renderer(DummyDeviceConfig::default().with_sampler_feedback(true));
    assert!(renderer.feedback_active());

    assert!(renderer.render().unwrap());
    assert_eq!(
        device.compositor_events(),
        vec![
            CompositorEvent::Acquire(0),
            CompositorEvent::Draw(0),
            CompositorEvent::Release(0)
        ]
    );
    renderer.present().unwrap();

    let grid = renderer.last_feedback_grid().expect("grid after first frame");
    assert_eq!((grid.width, grid.height), (16, 16));
    assert_eq!(grid.raw(1, 2), 3);

    let canvas = device.last_overlay().expect("overlay canvas");
    assert_eq!((canvas.width(), canvas.height()), (400, 400));
    // tile (0, 0) reports mip 0
    assert_eq!(canvas.pixel(12, 12), Some(ColorKey::Maroon.bgra()));
    assert_eq!(canvas.pixel(0, 0), Some(ColorKey::Black.bgra()));
}

#[test]
fn test_feedback_resolve_leaves_states_unchanged() {
    let (device, mut renderer) =
        loaded_renderer(DummyDeviceConfig::default().with_sampler_feedback(true));
    for _ in 0..4 {
        renderer.render().unwrap();
        renderer.present().unwrap();
    }

    let feedback = renderer.feedback_pipeline().unwrap();
    assert_eq!(
        device.resource_state(feedback.feedback_map()),
        Some(ResourceState::UnorderedAccess)
    );
    assert_eq!(
        device.resource_state(feedback.decode_texture()),
        Some(ResourceState::ResolveDest)
    );
    assert_eq!(
        device.resource_state(feedback.readback_buffer()),
        Some(ResourceState::CopyDest)
    );
    assert_eq!(device.compositor_events().len(), 12);
}

#[test]
fn test_unused_tiles_are_reported() {
    let (_device, mut renderer) = loaded_renderer(
        DummyDeviceConfig::default()
            .with_sampler_feedback(true)
            .with_feedback_pattern(FeedbackPattern::Explicit(vec![2, 5])),
    );
    renderer.render().unwrap();

    let grid = renderer.last_feedback_grid().unwrap();
    assert_eq!(grid.raw(0, 0), 2);
    assert_eq!(grid.raw(1, 0), 5);
    assert_eq!(grid.raw(2, 0), UNUSED_TILE);
    assert_eq!(grid.used_tiles(), 2);
}

// ============================================================================
// Shutdown
// ============================================================================

#[rstest]
#[case::without_feedback(false)]
#[case::with_feedback(true)]
fn test_shutdown_releases_everything(#[case] feedback: bool) {
    let (device, mut renderer) =
        loaded_renderer(DummyDeviceConfig::default().with_sampler_feedback(feedback));
    renderer.render().unwrap();
    renderer.present().unwrap();

    renderer.shutdown().unwrap();
    assert_eq!(device.live_resource_count(), 0);
    assert_eq!(device.live_pipeline_count(), 0);
}

#[test]
fn test_shutdown_before_load() {
    let (device, renderer) = dummy_renderer(DummyDeviceConfig::default());
    renderer.shutdown().unwrap();
    assert_eq!(device.live_resource_count(), 0);
}
