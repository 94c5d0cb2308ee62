use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use smallvec::SmallVec;

use super::{
    AllocatedSet, BindingDescriptor, DescriptorAllocator, DescriptorKind, DescriptorSetLayout,
    LayoutCache, LayoutKey,
};
use crate::gpu::{GpuDevice, HasDevice};
use crate::Result;

/// A resource bound to one descriptor binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl DescriptorResource {
    pub fn matches(&self, kind: DescriptorKind) -> bool {
        match self {
            DescriptorResource::Buffer { .. } => kind.is_buffer(),
            DescriptorResource::Image { .. } => !kind.is_buffer(),
        }
    }
}

/// Backing storage for the pointers inside a batch of `vk::WriteDescriptorSet`.
///
/// Infos are pushed first and the writes built afterwards, so no write refers into a vector
/// that may still reallocate.
#[derive(Default)]
pub(crate) struct WriteInfos {
    buffers: SmallVec<[vk::DescriptorBufferInfo; 8]>,
    images: SmallVec<[vk::DescriptorImageInfo; 8]>,
    targets: SmallVec<[(vk::DescriptorSet, u32, DescriptorKind, InfoIndex); 8]>,
}

#[derive(Clone, Copy)]
enum InfoIndex {
    Buffer(usize),
    Image(usize),
}

impl WriteInfos {
    pub fn push(
        &mut self,
        set: vk::DescriptorSet,
        binding: u32,
        kind: DescriptorKind,
        resource: &DescriptorResource,
    ) {
        let index = match *resource {
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            } => {
                self.buffers.push(vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                });
                InfoIndex::Buffer(self.buffers.len() - 1)
            }
            DescriptorResource::Image {
                view,
                sampler,
                layout,
            } => {
                self.images.push(vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                });
                InfoIndex::Image(self.images.len() - 1)
            }
        };
        self.targets.push((set, binding, kind, index));
    }

    /// Issues every pushed write in a single native call. Returns the number of writes.
    pub fn submit<D: GpuDevice>(&self, device: &D) -> usize {
        if self.targets.is_empty() {
            return 0;
        }
        let writes: SmallVec<[vk::WriteDescriptorSet; 8]> = self
            .targets
            .iter()
            .map(|&(set, binding, kind, index)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding)
                    .dst_array_element(0)
                    .descriptor_type(kind.as_raw());
                match index {
                    InfoIndex::Buffer(i) => {
                        write.buffer_info(std::slice::from_ref(&self.buffers[i]))
                    }
                    InfoIndex::Image(i) => write.image_info(std::slice::from_ref(&self.images[i])),
                }
            })
            .collect();
        unsafe {
            device.update_descriptor_sets(&writes);
        }
        writes.len()
    }
}

struct Entry {
    set: u32,
    binding: u32,
    kind: DescriptorKind,
    stages: vk::ShaderStageFlags,
    resource: DescriptorResource,
}

/// One descriptor set produced by [`DescriptorBuilder::build`].
#[derive(Debug)]
pub struct BuiltSet<D: GpuDevice> {
    /// The set index the bindings were declared under.
    pub set_index: u32,
    /// Position within a parallel array. Always 0 for ordinary sets.
    pub element: u32,
    pub layout: Arc<DescriptorSetLayout<D>>,
    pub set: AllocatedSet,
}

struct Plan<'e, D: GpuDevice> {
    set_index: u32,
    element: u32,
    layout: Arc<DescriptorSetLayout<D>>,
    entries: SmallVec<[&'e Entry; 4]>,
}

fn plan<'e, D: GpuDevice>(
    layouts: &mut LayoutCache<D>,
    entries: &'e [Entry],
) -> Result<Vec<Plan<'e, D>>> {
    let mut plans = Vec::new();
    let groups = entries.iter().sorted_by_key(|e| e.set).group_by(|e| e.set);
    for (set_index, group) in &groups {
        let group: SmallVec<[&Entry; 4]> = group.collect();
        let distinct = group.iter().map(|e| e.binding).unique().count();
        if group.len() > 1 && distinct == 1 {
            let first = group[0];
            assert!(
                group.iter().all(|e| e.kind == first.kind),
                "array elements of set {set_index} binding {} differ in kind",
                first.binding
            );
            let stages = group
                .iter()
                .fold(vk::ShaderStageFlags::empty(), |acc, e| acc | e.stages);
            let layout = layouts.get_or_create(&[BindingDescriptor::new(
                first.binding,
                first.kind,
                stages,
            )])?;
            for (element, entry) in group.iter().enumerate() {
                plans.push(Plan {
                    set_index,
                    element: element as u32,
                    layout: layout.clone(),
                    entries: SmallVec::from_slice(&[*entry]),
                });
            }
        } else {
            assert_eq!(
                distinct,
                group.len(),
                "set {set_index} mixes repeated and distinct binding indices"
            );
            let bindings: SmallVec<[BindingDescriptor; 4]> = group
                .iter()
                .map(|e| BindingDescriptor::new(e.binding, e.kind, e.stages))
                .collect();
            let layout = layouts.get_or_create_by_key(LayoutKey::new(&bindings))?;
            plans.push(Plan {
                set_index,
                element: 0,
                layout,
                entries: group,
            });
        }
    }
    Ok(plans)
}

/// Collects resource bindings and turns them into allocated, written descriptor sets.
///
/// Bindings are grouped by set index. A group in which every entry repeats the same binding
/// index is a parallel array: it produces one set per entry, all sharing a single-binding
/// layout.
pub struct DescriptorBuilder<'a, D: GpuDevice> {
    layouts: &'a mut LayoutCache<D>,
    allocator: &'a mut DescriptorAllocator<D>,
    entries: Vec<Entry>,
}

impl<'a, D: GpuDevice> DescriptorBuilder<'a, D> {
    pub fn new(layouts: &'a mut LayoutCache<D>, allocator: &'a mut DescriptorAllocator<D>) -> Self {
        Self {
            layouts,
            allocator,
            entries: Vec::new(),
        }
    }

    pub fn bind(
        &mut self,
        set: u32,
        binding: u32,
        kind: DescriptorKind,
        stages: vk::ShaderStageFlags,
        resource: DescriptorResource,
    ) -> &mut Self {
        assert!(
            resource.matches(kind),
            "resource {resource:?} cannot be bound as {kind:?}"
        );
        self.entries.push(Entry {
            set,
            binding,
            kind,
            stages,
            resource,
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn bind_buffer(
        &mut self,
        set: u32,
        binding: u32,
        kind: DescriptorKind,
        stages: vk::ShaderStageFlags,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> &mut Self {
        self.bind(
            set,
            binding,
            kind,
            stages,
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            },
        )
    }

    pub fn bind_image(
        &mut self,
        set: u32,
        binding: u32,
        stages: vk::ShaderStageFlags,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.bind(
            set,
            binding,
            DescriptorKind::CombinedImageSampler,
            stages,
            DescriptorResource::Image {
                view,
                sampler,
                layout,
            },
        )
    }

    /// Creates or reuses the layouts, allocates every set and then writes all descriptors in
    /// one batch. If any allocation fails, nothing is written.
    pub fn build(self) -> Result<Vec<BuiltSet<D>>> {
        let DescriptorBuilder {
            layouts,
            allocator,
            entries,
        } = self;
        assert!(!entries.is_empty(), "descriptor builder has no bindings");
        let plans = plan(layouts, &entries)?;

        // Each set may come from a different pool; nothing is written until all exist.
        let sets = plans
            .iter()
            .map(|plan| allocator.allocate(&plan.layout))
            .collect::<Result<Vec<_>>>()?;

        let mut writes = WriteInfos::default();
        for (plan, set) in plans.iter().zip(sets.iter()) {
            for entry in plan.entries.iter() {
                writes.push(set.raw(), entry.binding, entry.kind, &entry.resource);
            }
        }
        let count = writes.submit(allocator.device());
        tracing::trace!(sets = sets.len(), writes = count, "built descriptor sets");

        Ok(plans
            .into_iter()
            .zip(sets)
            .map(|(plan, set)| BuiltSet {
                set_index: plan.set_index,
                element: plan.element,
                layout: plan.layout,
                set,
            })
            .collect())
    }
}
