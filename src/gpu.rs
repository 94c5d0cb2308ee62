use std::ptr::NonNull;

use ash::{prelude::VkResult, vk};

/// Which descriptor family a buffer is bound as. Uniform and storage buffers have
/// independent minimum offset alignments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Uniform,
    Storage,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }
}

/// One queue submission. The fence is supplied by the frame ring.
#[derive(Clone, Copy, Default)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// A buffer created through [`GpuDevice::create_buffer`].
pub struct RawBuffer<A> {
    pub buffer: vk::Buffer,
    pub allocation: A,
    /// Persistent host mapping. Only present for host-visible buffers.
    pub mapped: Option<NonNull<u8>>,
}

/// The narrow slice of the graphics API the allocation subsystem consumes.
///
/// [`crate::Device`] implements this on top of `ash` and `vk-mem`. Every method mirrors a
/// single native call and carries the same external synchronization requirements.
pub trait GpuDevice: Clone + Send + Sync + 'static {
    type Allocation: Send + Sync;

    fn min_offset_alignment(&self, kind: BufferKind) -> vk::DeviceSize;

    unsafe fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VkResult<vk::DescriptorSetLayout>;
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    unsafe fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool>;
    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    unsafe fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);

    unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        host_visible: bool,
    ) -> VkResult<RawBuffer<Self::Allocation>>;
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut Self::Allocation);

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);

    unsafe fn queue_submit(&self, submission: &Submission, fence: vk::Fence) -> VkResult<()>;
}

pub trait HasDevice {
    type Device: GpuDevice;
    fn device(&self) -> &Self::Device;
}
