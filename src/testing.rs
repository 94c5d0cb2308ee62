//! In-memory stand-in for the native API so the allocation logic can be tested without a GPU.
//!
//! Descriptor pools enforce `max_sets` and per-type capacities the same way drivers report
//! `ERROR_OUT_OF_POOL_MEMORY`. Submitted work completes as soon as its fence is waited on,
//! unless the GPU is marked stalled.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::{prelude::VkResult, vk, vk::Handle};

use crate::gpu::{BufferKind, GpuDevice, RawBuffer, Submission};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MockEvent {
    ResetFence(vk::Fence),
    WaitFence(vk::Fence),
    Submit(vk::Fence),
    ResetPool(vk::DescriptorPool),
    UpdateDescriptorSets(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MockDescriptor {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MockWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub ty: vk::DescriptorType,
    pub descriptor: MockDescriptor,
}

struct MockPool {
    max_sets: u32,
    capacity: HashMap<vk::DescriptorType, u32>,
    used: HashMap<vk::DescriptorType, u32>,
    sets: Vec<vk::DescriptorSet>,
}

struct MockFence {
    signaled: bool,
    pending: bool,
}

pub(crate) struct MockAllocation {
    memory: Vec<u128>,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    uniform_alignment: vk::DeviceSize,
    storage_alignment: vk::DeviceSize,
    layouts: HashMap<vk::DescriptorSetLayout, Vec<(vk::DescriptorType, u32)>>,
    layouts_created: usize,
    pools: HashMap<vk::DescriptorPool, MockPool>,
    pools_created: usize,
    sets: HashMap<vk::DescriptorSet, vk::DescriptorPool>,
    writes: Vec<MockWrite>,
    fences: HashMap<vk::Fence, MockFence>,
    buffers: HashMap<vk::Buffer, (vk::DeviceSize, vk::BufferUsageFlags, bool)>,
    gpu_stalled: bool,
    fail_pool_resets: bool,
    events: Vec<MockEvent>,
}

impl MockState {
    fn handle<T: Handle>(&mut self) -> T {
        self.next_handle += 1;
        T::from_raw(self.next_handle)
    }
}

#[derive(Clone)]
pub(crate) struct MockDevice(Arc<Mutex<MockState>>);

impl MockDevice {
    pub fn new() -> Self {
        Self::with_alignment(64, 64)
    }
    pub fn with_alignment(uniform: vk::DeviceSize, storage: vk::DeviceSize) -> Self {
        Self(Arc::new(Mutex::new(MockState {
            uniform_alignment: uniform,
            storage_alignment: storage,
            ..Default::default()
        })))
    }
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }
    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }
    pub fn clear_events(&self) {
        self.state().events.clear();
    }
    pub fn writes(&self) -> Vec<MockWrite> {
        self.state().writes.clone()
    }
    pub fn layouts_created(&self) -> usize {
        self.state().layouts_created
    }
    pub fn live_layouts(&self) -> usize {
        self.state().layouts.len()
    }
    pub fn pools_created(&self) -> usize {
        self.state().pools_created
    }
    pub fn live_pools(&self) -> usize {
        self.state().pools.len()
    }
    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }
    pub fn live_fences(&self) -> usize {
        self.state().fences.len()
    }
    pub fn is_set_live(&self, set: vk::DescriptorSet) -> bool {
        self.state().sets.contains_key(&set)
    }
    pub fn buffer_info(
        &self,
        buffer: vk::Buffer,
    ) -> Option<(vk::DeviceSize, vk::BufferUsageFlags, bool)> {
        self.state().buffers.get(&buffer).copied()
    }
    /// While stalled, waits on submitted fences time out.
    pub fn set_gpu_stalled(&self, stalled: bool) {
        self.state().gpu_stalled = stalled;
    }
    /// While set, pool resets fail and free nothing.
    pub fn set_pool_reset_failure(&self, fail: bool) {
        self.state().fail_pool_resets = fail;
    }
    pub fn is_fence_pending(&self, fence: vk::Fence) -> bool {
        self.state().fences.get(&fence).map_or(false, |f| f.pending)
    }
}

impl GpuDevice for MockDevice {
    type Allocation = MockAllocation;

    fn min_offset_alignment(&self, kind: BufferKind) -> vk::DeviceSize {
        let state = self.state();
        match kind {
            BufferKind::Uniform => state.uniform_alignment,
            BufferKind::Storage => state.storage_alignment,
        }
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let mut state = self.state();
        let layout = state.handle();
        let counts = bindings
            .iter()
            .map(|b| (b.descriptor_type, b.descriptor_count))
            .collect();
        state.layouts.insert(layout, counts);
        state.layouts_created += 1;
        Ok(layout)
    }
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let removed = self.state().layouts.remove(&layout);
        assert!(removed.is_some(), "double free of {layout:?}");
    }

    unsafe fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let mut state = self.state();
        let pool = state.handle();
        let mut capacity = HashMap::new();
        for size in pool_sizes {
            *capacity.entry(size.ty).or_insert(0) += size.descriptor_count;
        }
        state.pools.insert(
            pool,
            MockPool {
                max_sets,
                capacity,
                used: HashMap::new(),
                sets: Vec::new(),
            },
        );
        state.pools_created += 1;
        Ok(pool)
    }
    unsafe fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        let mut state = self.state();
        if state.fail_pool_resets {
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        let freed = {
            let mock_pool = state.pools.get_mut(&pool).expect("unknown descriptor pool");
            mock_pool.used.clear();
            std::mem::take(&mut mock_pool.sets)
        };
        for set in freed {
            state.sets.remove(&set);
        }
        state.events.push(MockEvent::ResetPool(pool));
        Ok(())
    }
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        let mock_pool = state.pools.remove(&pool).expect("double free of descriptor pool");
        for set in mock_pool.sets {
            state.sets.remove(&set);
        }
    }
    unsafe fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();
        let mut needed: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for layout in layouts {
            let counts = state.layouts.get(layout).expect("unknown set layout");
            for (ty, count) in counts {
                *needed.entry(*ty).or_insert(0) += count;
            }
        }
        {
            let mock_pool = state.pools.get(&pool).expect("unknown descriptor pool");
            if mock_pool.sets.len() + layouts.len() > mock_pool.max_sets as usize {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            for (ty, count) in needed.iter() {
                let used = mock_pool.used.get(ty).copied().unwrap_or(0);
                let capacity = mock_pool.capacity.get(ty).copied().unwrap_or(0);
                if used + count > capacity {
                    return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
                }
            }
        }
        let sets: Vec<vk::DescriptorSet> = layouts.iter().map(|_| state.handle()).collect();
        for set in sets.iter() {
            state.sets.insert(*set, pool);
        }
        let mock_pool = state.pools.get_mut(&pool).unwrap();
        mock_pool.sets.extend_from_slice(&sets);
        for (ty, count) in needed {
            *mock_pool.used.entry(ty).or_insert(0) += count;
        }
        Ok(sets)
    }
    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        let mut state = self.state();
        for write in writes {
            assert!(
                state.sets.contains_key(&write.dst_set),
                "write into a freed descriptor set"
            );
            for i in 0..write.descriptor_count as usize {
                let descriptor = if !write.p_buffer_info.is_null() {
                    let info = &*write.p_buffer_info.add(i);
                    MockDescriptor::Buffer {
                        buffer: info.buffer,
                        offset: info.offset,
                        range: info.range,
                    }
                } else {
                    let info = &*write.p_image_info.add(i);
                    MockDescriptor::Image {
                        view: info.image_view,
                        sampler: info.sampler,
                    }
                };
                state.writes.push(MockWrite {
                    set: write.dst_set,
                    binding: write.dst_binding,
                    array_element: write.dst_array_element + i as u32,
                    ty: write.descriptor_type,
                    descriptor,
                });
            }
        }
        state.events.push(MockEvent::UpdateDescriptorSets(writes.len()));
    }

    unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        host_visible: bool,
    ) -> VkResult<RawBuffer<Self::Allocation>> {
        assert!(size > 0, "VkBufferCreateInfo::size must be greater than 0");
        let mut state = self.state();
        let buffer = state.handle();
        state.buffers.insert(buffer, (size, usage, host_visible));
        let mut allocation = MockAllocation {
            memory: vec![0u128; (size as usize + 15) / 16],
        };
        let mapped = if host_visible {
            NonNull::new(allocation.memory.as_mut_ptr() as *mut u8)
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
        let removed = self.state().buffers.remove(&buffer);
        assert!(removed.is_some(), "double free of {buffer:?}");
        allocation.memory.clear();
    }

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state();
        let fence = state.handle();
        state.fences.insert(
            fence,
            MockFence {
                signaled,
                pending: false,
            },
        );
        Ok(fence)
    }
    unsafe fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut state = self.state();
        state.events.push(MockEvent::WaitFence(fence));
        let stalled = state.gpu_stalled;
        let mock_fence = state.fences.get_mut(&fence).expect("unknown fence");
        if mock_fence.signaled {
            return Ok(());
        }
        if mock_fence.pending && !stalled {
            mock_fence.pending = false;
            mock_fence.signaled = true;
            return Ok(());
        }
        Err(vk::Result::TIMEOUT)
    }
    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        state.events.push(MockEvent::ResetFence(fence));
        let mock_fence = state.fences.get_mut(&fence).expect("unknown fence");
        assert!(!mock_fence.pending, "reset of a fence still in use by a queue");
        mock_fence.signaled = false;
        Ok(())
    }
    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let removed = self.state().fences.remove(&fence);
        assert!(removed.is_some(), "double free of {fence:?}");
    }

    unsafe fn queue_submit(&self, _submission: &Submission, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        state.events.push(MockEvent::Submit(fence));
        let mock_fence = state.fences.get_mut(&fence).expect("unknown fence");
        assert!(
            !mock_fence.signaled && !mock_fence.pending,
            "submitted with a fence that is not unsignaled"
        );
        mock_fence.pending = true;
        Ok(())
    }
}
