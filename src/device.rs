use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use ash::{prelude::VkResult, vk};
use vk_mem::Alloc;

use crate::gpu::{BufferKind, GpuDevice, RawBuffer, Submission};

/// A logical device together with the queue frames are submitted to and the memory
/// allocator backing multi-buffers.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

pub struct DeviceInner {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    device: ash::Device,
    queue_family_index: u32,
    /// vkQueueSubmit requires external synchronization on the queue.
    queue: Mutex<vk::Queue>,
}

impl Device {
    /// Takes ownership of `device`; it is destroyed when the last clone is dropped.
    /// `instance` must outlive the returned value.
    pub fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
    ) -> VkResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let allocator = match unsafe {
            vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
                &instance,
                &device,
                physical_device,
            ))
        } {
            Ok(allocator) => allocator,
            Err(err) => {
                tracing::error!(%err, "failed to create memory allocator");
                unsafe { device.destroy_device(None) };
                return Err(err);
            }
        };
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        tracing::info!(
            device = ?device.handle(),
            min_uniform_alignment = properties.limits.min_uniform_buffer_offset_alignment,
            min_storage_alignment = properties.limits.min_storage_buffer_offset_alignment,
            "created device"
        );
        Ok(Self(Arc::new(DeviceInner {
            instance,
            physical_device,
            properties,
            allocator: ManuallyDrop::new(allocator),
            device,
            queue_family_index,
            queue: Mutex::new(queue),
        })))
    }
    pub fn instance(&self) -> &ash::Instance {
        &self.0.instance
    }
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.0.physical_device
    }
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.0.properties
    }
    pub fn queue_family_index(&self) -> u32 {
        self.0.queue_family_index
    }
    pub fn allocator(&self) -> &vk_mem::Allocator {
        &self.0.allocator
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        tracing::info!(device = ?self.device.handle(), "drop device");
        // Safety: every buffer allocated from the allocator holds a clone of the device,
        // so nothing allocated from it can still be alive here.
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

impl GpuDevice for Device {
    type Allocation = vk_mem::Allocation;

    fn min_offset_alignment(&self, kind: BufferKind) -> vk::DeviceSize {
        let limits = &self.0.properties.limits;
        match kind {
            BufferKind::Uniform => limits.min_uniform_buffer_offset_alignment,
            BufferKind::Storage => limits.min_storage_buffer_offset_alignment,
        }
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        self.0.device.create_descriptor_set_layout(&info, None)
    }
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.0.device.destroy_descriptor_set_layout(layout, None);
    }

    unsafe fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        self.0.device.create_descriptor_pool(&info, None)
    }
    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        self.0
            .device
            .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
    }
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.0.device.destroy_descriptor_pool(pool, None);
    }
    unsafe fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        self.0.device.allocate_descriptor_sets(&info)
    }
    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        self.0.device.update_descriptor_sets(writes, &[]);
    }

    unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        host_visible: bool,
    ) -> VkResult<RawBuffer<Self::Allocation>> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let allocation_info = if host_visible {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                flags: vk_mem::AllocationCreateFlags::MAPPED
                    | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            }
        } else {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                flags: vk_mem::AllocationCreateFlags::empty(),
                ..Default::default()
            }
        };
        let (buffer, mut allocation) = self
            .0
            .allocator
            .create_buffer(&buffer_info, &allocation_info)?;
        let mapped = if host_visible {
            let info = self.0.allocator.get_allocation_info(&allocation);
            match NonNull::new(info.mapped_data as *mut u8) {
                Some(ptr) => Some(ptr),
                None => {
                    self.0.allocator.destroy_buffer(buffer, &mut allocation);
                    return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
                }
            }
        } else {
            None
        };
        Ok(RawBuffer {
            buffer,
            allocation,
            mapped,
        })
    }
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut Self::Allocation) {
        self.0.allocator.destroy_buffer(buffer, allocation);
    }

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        self.0
            .device
            .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
    }
    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        self.0.device.wait_for_fences(&[fence], true, timeout)
    }
    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.0.device.reset_fences(&[fence])
    }
    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.0.device.destroy_fence(fence, None);
    }

    unsafe fn queue_submit(&self, submission: &Submission, fence: vk::Fence) -> VkResult<()> {
        assert_eq!(
            submission.wait_semaphores.len(),
            submission.wait_stages.len(),
            "every wait semaphore needs a destination stage"
        );
        let info = vk::SubmitInfo::default()
            .command_buffers(submission.command_buffers)
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(submission.wait_stages)
            .signal_semaphores(submission.signal_semaphores);
        let queue = self.0.queue.lock().unwrap();
        self.0.device.queue_submit(*queue, &[info], fence)
    }
}
