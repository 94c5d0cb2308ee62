use ash::vk;
use smallvec::SmallVec;

use crate::descriptor::DescriptorKind;

/// Capacity of every descriptor pool an allocator creates.
#[derive(Clone, Debug)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    /// Descriptors reserved per set, by kind. A pool holds `ceil(ratio * max_sets)`
    /// descriptors of each listed kind. Kinds not listed cannot be allocated.
    pub sizes: SmallVec<[(DescriptorKind, f32); 5]>,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets: 256,
            sizes: SmallVec::from_slice(&[
                (DescriptorKind::UniformBuffer, 2.0),
                (DescriptorKind::UniformBufferDynamic, 1.0),
                (DescriptorKind::StorageBuffer, 1.0),
                (DescriptorKind::StorageBufferDynamic, 0.5),
                (DescriptorKind::CombinedImageSampler, 4.0),
            ]),
        }
    }
}

impl DescriptorPoolConfig {
    pub(crate) fn pool_sizes(&self) -> SmallVec<[vk::DescriptorPoolSize; 5]> {
        self.sizes
            .iter()
            .map(|&(kind, ratio)| vk::DescriptorPoolSize {
                ty: kind.as_raw(),
                descriptor_count: (ratio * self.max_sets as f32).ceil() as u32,
            })
            .filter(|size| size.descriptor_count > 0)
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct FrameConfig {
    /// Number of frame slots the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Nanoseconds to wait for a slot's fence before the GPU is considered hung.
    pub fence_timeout: u64,
    /// Pool capacity of each slot's transient descriptor allocator.
    pub descriptor_pool: DescriptorPoolConfig,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            fence_timeout: u64::MAX,
            descriptor_pool: DescriptorPoolConfig {
                max_sets: 64,
                ..Default::default()
            },
        }
    }
}
