//! Staged uploads from CPU memory into device-local resources.
//!
//! Device memory is not CPU visible, so every upload goes through a transient
//! staging buffer in upload memory followed by a recorded GPU copy. The
//! staging buffer has to outlive that copy; [`StagingArena`] holds on to it
//! until the caller proves the GPU is idle.

use crate::backend::{
    BufferDescriptor, BufferUsage, GpuDevice, GpuIdle, ResourceId, SubmissionIndex,
};
use crate::commands::{Command, CommandList};
use crate::error::{RendererError, RendererResult};

use super::{ResourceState, TrackedResource};

/// A transient upload-memory buffer feeding one recorded copy.
#[derive(Debug, PartialEq, Eq)]
pub struct StagingBuffer {
    id: ResourceId,
    label: String,
    size: u64,
}

impl StagingBuffer {
    /// Allocate an upload buffer and fill it with `bytes`.
    pub fn with_contents(
        device: &dyn GpuDevice,
        label: impl Into<String>,
        bytes: &[u8],
    ) -> RendererResult<Self> {
        let label = label.into();
        let size = bytes.len() as u64;
        let descriptor = BufferDescriptor::upload(label.clone(), size, BufferUsage::COPY_SRC);
        let id = device
            .create_buffer(&descriptor)
            .map_err(|e| RendererError::resource_creation(label.clone(), e))?;
        if let Err(e) = device.write_mapped(id, 0, bytes) {
            discard_resources(device, &[id]);
            return Err(e.into());
        }
        log::debug!("Created staging buffer '{}' ({} bytes)", label, size);
        Ok(Self { id, label, size })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Create a device-local buffer holding `data`.
///
/// Allocates the destination in `CopyDest`, a staging buffer in `GenericRead`
/// holding a copy of `data`, records the copy and then a transition of the
/// destination into `final_state`. Nothing is submitted; the returned staging
/// buffer must be kept alive until the list has executed.
pub fn create_and_upload(
    device: &dyn GpuDevice,
    list: &mut CommandList,
    label: &str,
    data: &[u8],
    usage: BufferUsage,
    final_state: ResourceState,
) -> RendererResult<(TrackedResource, StagingBuffer)> {
    let size = data.len() as u64;
    let descriptor = BufferDescriptor::device(label, size, usage);
    let id = device
        .create_buffer(&descriptor)
        .map_err(|e| RendererError::resource_creation(label, e))?;
    let mut resource = TrackedResource::new(id, label, descriptor.initial_state);

    let staging = match StagingBuffer::with_contents(device, format!("{label} upload"), data) {
        Ok(staging) => staging,
        Err(e) => {
            discard_resources(device, &[id]);
            return Err(e);
        }
    };

    list.push(Command::CopyBuffer {
        src: staging.id(),
        dst: id,
        size,
    })?;
    list.transition(&mut resource, final_state);

    log::debug!(
        "Scheduled upload of '{}' ({} bytes) -> {:?}",
        label,
        size,
        final_state
    );
    Ok((resource, staging))
}

/// Destroy resources left behind by an operation that failed part way.
///
/// Failures are only logged so the original error reaches the caller.
pub(crate) fn discard_resources(device: &dyn GpuDevice, resources: &[ResourceId]) {
    for &resource in resources {
        if let Err(e) = device.destroy(resource) {
            log::warn!("Failed to release {:?} after an error: {}", resource, e);
        }
    }
}

#[derive(Debug)]
struct PendingStaging {
    buffer: StagingBuffer,
    submission: Option<SubmissionIndex>,
}

/// Keeps staging buffers alive until the GPU has consumed them.
#[derive(Debug, Default)]
pub struct StagingArena {
    pending: Vec<PendingStaging>,
}

impl StagingArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, buffer: StagingBuffer) {
        self.pending.push(PendingStaging {
            buffer,
            submission: None,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Bytes currently held in staging memory.
    pub fn total_bytes(&self) -> u64 {
        self.pending.iter().map(|p| p.buffer.size()).sum()
    }

    /// Record that every not-yet-submitted buffer is read by `submission`.
    pub fn mark_submitted(&mut self, submission: SubmissionIndex) {
        for pending in self.pending.iter_mut().filter(|p| p.submission.is_none()) {
            pending.submission = Some(submission);
        }
    }

    /// Destroy every buffer whose submission `idle` covers.
    ///
    /// Buffers that were never submitted are kept. Returns the number released.
    /// When a destroy fails that buffer is dropped and the error returned, the
    /// rest stay pending.
    pub fn release(&mut self, device: &dyn GpuDevice, idle: &GpuIdle) -> RendererResult<usize> {
        let mut released = 0;
        let mut index = 0;

        while index < self.pending.len() {
            match self.pending[index].submission {
                Some(submission) if idle.covers(submission) => {
                    let pending = self.pending.remove(index);
                    device.destroy(pending.buffer.id())?;
                    released += 1;
                }
                Some(_) => index += 1,
                None => {
                    log::warn!(
                        "Staging buffer '{}' was never submitted, keeping it",
                        self.pending[index].buffer.label()
                    );
                    index += 1;
                }
            }
        }

        log::debug!(
            "Released {} staging buffers, {} still pending",
            released,
            self.pending.len()
        );
        Ok(released)
    }

    /// Destroy everything regardless of submission. Only valid after a full idle wait.
    ///
    /// Stops at the first failed destroy, leaving the remaining buffers pending.
    pub fn release_all(&mut self, device: &dyn GpuDevice, _idle: &GpuIdle) -> RendererResult<()> {
        while let Some(pending) = self.pending.pop() {
            device.destroy(pending.buffer.id())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyDevice, DummyDeviceConfig};

    #[test]
    fn test_create_and_upload_records_copy_then_transition() {
        let device = DummyDevice::new();
        let mut list = CommandList::new("upload");
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];

        let (buffer, staging) = create_and_upload(
            &device,
            &mut list,
            "vertices",
            &data,
            BufferUsage::VERTEX,
            ResourceState::VertexBuffer,
        )
        .unwrap();

        assert_eq!(buffer.state(), ResourceState::VertexBuffer);
        assert_eq!(
            list.commands(),
            &[
                Command::CopyBuffer {
                    src: staging.id(),
                    dst: buffer.id(),
                    size: 8,
                },
                Command::Barrier {
                    resource: buffer.id(),
                    before: ResourceState::CopyDest,
                    after: ResourceState::VertexBuffer,
                },
            ]
        );
        // Nothing is submitted by the upload itself
        assert!(device.submissions().is_empty());
        assert_eq!(device.buffer_contents(staging.id()).unwrap(), data.to_vec());
    }

    #[test]
    fn test_create_and_upload_allocation_failure() {
        let device = DummyDevice::with_config(
            DummyDeviceConfig::default().with_failing_allocation("indices"),
        );
        let mut list = CommandList::new("upload");

        let result = create_and_upload(
            &device,
            &mut list,
            "indices",
            &[0u8; 72],
            BufferUsage::INDEX,
            ResourceState::IndexBuffer,
        );

        match result {
            Err(RendererError::ResourceCreation { resource, .. }) => assert_eq!(resource, "indices"),
            other => panic!("expected ResourceCreation, got {other:?}"),
        }
        assert!(list.is_empty());
    }

    #[test]
    fn test_arena_releases_only_covered_buffers() {
        let device = DummyDevice::new();
        let mut arena = StagingArena::new();

        arena.push(StagingBuffer::with_contents(&device, "a", &[0; 16]).unwrap());
        arena.mark_submitted(SubmissionIndex(0));
        arena.push(StagingBuffer::with_contents(&device, "b", &[0; 16]).unwrap());
        assert_eq!(arena.total_bytes(), 32);

        let idle = GpuIdle::new(Some(SubmissionIndex(0)));
        let released = arena.release(&device, &idle).unwrap();

        assert_eq!(released, 1);
        assert_eq!(arena.len(), 1);
        assert_eq!(device.live_resource_count(), 1);
    }

    #[test]
    fn test_arena_keeps_buffers_newer_than_idle_token() {
        let device = DummyDevice::new();
        let mut arena = StagingArena::new();
        arena.push(StagingBuffer::with_contents(&device, "a", &[0; 4]).unwrap());
        arena.mark_submitted(SubmissionIndex(5));

        let idle = GpuIdle::new(Some(SubmissionIndex(4)));
        assert_eq!(arena.release(&device, &idle).unwrap(), 0);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_create_and_upload_releases_buffer_when_staging_fails() {
        let device = DummyDevice::with_config(
            DummyDeviceConfig::default().with_failing_allocation("vertices upload"),
        );
        let mut list = CommandList::new("upload");

        let result = create_and_upload(
            &device,
            &mut list,
            "vertices",
            &[0u8; 32],
            BufferUsage::VERTEX,
            ResourceState::VertexBuffer,
        );

        assert!(matches!(result, Err(RendererError::ResourceCreation { .. })));
        assert_eq!(device.live_resource_count(), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn test_failed_release_keeps_remaining_buffers_pending() {
        let device = DummyDevice::new();
        let mut arena = StagingArena::new();
        let first = StagingBuffer::with_contents(&device, "a", &[0; 4]).unwrap();
        let first_id = first.id();
        arena.push(first);
        arena.push(StagingBuffer::with_contents(&device, "b", &[0; 4]).unwrap());
        arena.push(StagingBuffer::with_contents(&device, "c", &[0; 4]).unwrap());
        arena.mark_submitted(SubmissionIndex(0));

        // "a" is gone behind the arena's back, so destroying it fails
        device.destroy(first_id).unwrap();
        let idle = GpuIdle::new(Some(SubmissionIndex(0)));
        assert!(arena.release(&device, &idle).is_err());
        assert_eq!(arena.len(), 2);
        assert_eq!(device.live_resource_count(), 2);

        assert_eq!(arena.release(&device, &idle).unwrap(), 2);
        assert!(arena.is_empty());
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    fn test_failed_release_all_keeps_remaining_buffers_pending() {
        let device = DummyDevice::new();
        let mut arena = StagingArena::new();
        arena.push(StagingBuffer::with_contents(&device, "a", &[0; 4]).unwrap());
        let last = StagingBuffer::with_contents(&device, "b", &[0; 4]).unwrap();
        let last_id = last.id();
        arena.push(last);

        device.destroy(last_id).unwrap();
        let idle = GpuIdle::new(None);
        assert!(arena.release_all(&device, &idle).is_err());
        assert_eq!(arena.len(), 1);

        arena.release_all(&device, &idle).unwrap();
        assert_eq!(device.live_resource_count(), 0);
    }
}
