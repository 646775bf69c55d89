//! Per-frame constant data.
//!
//! A single upload-memory buffer holds one aligned slot of [`TransformData`]
//! per frame in flight. The CPU writes slot `k` while the GPU may still be
//! reading the other slots, which is safe as long as the slot count equals the
//! pipeline depth.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use static_assertions::const_assert_eq;

use crate::backend::{BufferDescriptor, BufferUsage, GpuDevice, ResourceId};
use crate::error::{RendererError, RendererResult};

use super::{ResourceState, TrackedResource};

/// Model, view and projection matrices, column-major.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformData {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

const_assert_eq!(std::mem::size_of::<TransformData>(), 192);

impl Default for TransformData {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            view: Mat4::IDENTITY.to_cols_array_2d(),
            projection: Mat4::IDENTITY.to_cols_array_2d(),
        }
    }
}

impl TransformData {
    pub fn new(model: Mat4, view: Mat4, projection: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
        }
    }
}

/// Align a value up to the given alignment.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of 2");
    (value + alignment - 1) & !(alignment - 1)
}

/// Multi-buffered constant slots in persistently mapped upload memory.
#[derive(Debug)]
pub struct ConstantStore {
    buffer: TrackedResource,
    slot_count: u32,
    aligned_slot_size: u64,
}

impl ConstantStore {
    /// Allocate `slot_count` slots, each aligned to `alignment` bytes.
    pub fn new(device: &dyn GpuDevice, slot_count: u32, alignment: u64) -> RendererResult<Self> {
        if slot_count == 0 {
            return Err(RendererError::invariant("constant store needs at least one slot"));
        }
        let aligned_slot_size =
            align_up(std::mem::size_of::<TransformData>() as u64, alignment.max(1));
        let size = aligned_slot_size * slot_count as u64;

        let descriptor = BufferDescriptor::upload("constant store", size, BufferUsage::UNIFORM);
        let id = device
            .create_buffer(&descriptor)
            .map_err(|e| RendererError::resource_creation("constant store", e))?;

        log::debug!(
            "Created constant store: {} slots x {} bytes",
            slot_count,
            aligned_slot_size
        );
        Ok(Self {
            buffer: TrackedResource::new(id, "constant store", ResourceState::GenericRead),
            slot_count,
            aligned_slot_size,
        })
    }

    pub fn buffer(&self) -> ResourceId {
        self.buffer.id()
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn aligned_slot_size(&self) -> u64 {
        self.aligned_slot_size
    }

    /// Byte offset of the slot for `frame_index`.
    pub fn slot_offset(&self, frame_index: u32) -> RendererResult<u64> {
        if frame_index >= self.slot_count {
            return Err(RendererError::invariant(format!(
                "constant slot {} out of range (0..{})",
                frame_index, self.slot_count
            )));
        }
        Ok(frame_index as u64 * self.aligned_slot_size)
    }

    /// Copy `data` into the slot for `frame_index`. Returns the slot offset.
    pub fn write_slot(
        &self,
        device: &dyn GpuDevice,
        frame_index: u32,
        data: &TransformData,
    ) -> RendererResult<u64> {
        let offset = self.slot_offset(frame_index)?;
        device.write_mapped(self.buffer.id(), offset, bytemuck::bytes_of(data))?;
        Ok(offset)
    }

    pub fn destroy(self, device: &dyn GpuDevice) -> RendererResult<()> {
        device.destroy(self.buffer.id())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(192, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn test_slot_layout() {
        let device = DummyDevice::new();
        let store = ConstantStore::new(&device, 3, 256).unwrap();

        assert_eq!(store.aligned_slot_size(), 256);
        assert_eq!(store.slot_offset(0).unwrap(), 0);
        assert_eq!(store.slot_offset(2).unwrap(), 512);
        assert!(matches!(
            store.slot_offset(3),
            Err(RendererError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_write_slot_does_not_touch_other_slots() {
        let device = DummyDevice::new();
        let store = ConstantStore::new(&device, 3, 256).unwrap();

        let a = TransformData::new(Mat4::from_rotation_y(1.0), Mat4::IDENTITY, Mat4::IDENTITY);
        let b = TransformData::new(Mat4::from_scale(glam::Vec3::splat(2.0)), Mat4::IDENTITY, Mat4::IDENTITY);
        store.write_slot(&device, 0, &a).unwrap();
        store.write_slot(&device, 2, &a).unwrap();
        let before = device.buffer_contents(store.buffer()).unwrap();

        store.write_slot(&device, 1, &b).unwrap();
        let after = device.buffer_contents(store.buffer()).unwrap();

        assert_eq!(before[..256], after[..256]);
        assert_eq!(before[512..], after[512..]);
        assert_eq!(&after[256..256 + 192], bytemuck::bytes_of(&b));
    }

    #[test]
    fn test_write_out_of_range_slot() {
        let device = DummyDevice::new();
        let store = ConstantStore::new(&device, 2, 256).unwrap();
        assert!(store
            .write_slot(&device, 2, &TransformData::default())
            .is_err());
        assert!(device.mapped_writes().is_empty());
    }
}
