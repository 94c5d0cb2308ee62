use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use super::builder::WriteInfos;
use super::{AllocatedSet, DescriptorKind, DescriptorResource, DescriptorSetLayout};
use crate::gpu::{GpuDevice, HasDevice};

struct Slot {
    binding: u32,
    kind: DescriptorKind,
    resource: Option<DescriptorResource>,
    dirty: bool,
}

/// Rewrites individual bindings of already allocated sets.
///
/// Meant to be kept around and reused every frame: pending values live inline, so updating
/// a layout of up to eight bindings does not touch the heap.
pub struct DescriptorUpdater<D: GpuDevice> {
    device: D,
    layout: Arc<DescriptorSetLayout<D>>,
    slots: SmallVec<[Slot; 8]>,
}

impl<D: GpuDevice> DescriptorUpdater<D> {
    pub fn new(device: D, layout: Arc<DescriptorSetLayout<D>>) -> Self {
        let slots = layout
            .bindings()
            .iter()
            .map(|b| Slot {
                binding: b.binding,
                kind: b.kind,
                resource: None,
                dirty: false,
            })
            .collect();
        Self {
            device,
            layout,
            slots,
        }
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout<D>> {
        &self.layout
    }

    /// Replaces the resource of `binding`. Takes effect on the next [`Self::apply`].
    pub fn set(&mut self, binding: u32, resource: DescriptorResource) -> &mut Self {
        // Slots follow the layout key, which is sorted by binding index.
        let index = self
            .slots
            .binary_search_by_key(&binding, |s| s.binding)
            .unwrap_or_else(|_| panic!("binding {binding} is not part of {:?}", self.layout));
        let slot = &mut self.slots[index];
        assert!(
            resource.matches(slot.kind),
            "resource {resource:?} cannot be bound as {:?}",
            slot.kind
        );
        slot.resource = Some(resource);
        slot.dirty = true;
        self
    }

    pub fn set_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> &mut Self {
        self.set(
            binding,
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            },
        )
    }

    pub fn set_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.set(
            binding,
            DescriptorResource::Image {
                view,
                sampler,
                layout,
            },
        )
    }

    pub fn has_pending(&self) -> bool {
        self.slots.iter().any(|s| s.dirty)
    }

    /// Writes every binding changed since the last call into `set` with one native update.
    /// Returns the number of descriptors written.
    pub fn apply(&mut self, set: &AllocatedSet) -> usize {
        let mut writes = WriteInfos::default();
        for slot in self.slots.iter_mut().filter(|s| s.dirty) {
            if let Some(resource) = &slot.resource {
                writes.push(set.raw(), slot.binding, slot.kind, resource);
            }
            slot.dirty = false;
        }
        writes.submit(&self.device)
    }
}

impl<D: GpuDevice> HasDevice for DescriptorUpdater<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}
