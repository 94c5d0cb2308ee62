use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;

use super::{ArrayDesc, BufferLayout, BufferRegion};
use crate::descriptor::DescriptorResource;
use crate::gpu::{BufferKind, GpuDevice, HasDevice, RawBuffer};
use crate::Result;

#[derive(Clone, Copy, Debug)]
pub struct MultiBufferInfo {
    pub kind: BufferKind,
    /// Host-visible buffers are mapped once at creation and stay mapped.
    pub host_visible: bool,
    pub extra_usage: vk::BufferUsageFlags,
}

impl Default for MultiBufferInfo {
    fn default() -> Self {
        Self {
            kind: BufferKind::Uniform,
            host_visible: true,
            extra_usage: vk::BufferUsageFlags::empty(),
        }
    }
}

/// One physical buffer holding several logical arrays, each repeated once per frame slot.
pub struct MultiBuffer<D: GpuDevice> {
    device: D,
    raw: RawBuffer<D::Allocation>,
    kind: BufferKind,
    layout: BufferLayout,
    /// Whether a typed view of each region is currently alive.
    claimed: Box<[AtomicBool]>,
}

// The mapped pointer is only dereferenced through region views, which never overlap.
unsafe impl<D: GpuDevice> Send for MultiBuffer<D> {}
unsafe impl<D: GpuDevice> Sync for MultiBuffer<D> {}

impl<D: GpuDevice> MultiBuffer<D> {
    pub fn new(device: D, arrays: &[ArrayDesc], info: &MultiBufferInfo) -> Result<Self> {
        let alignment = device.min_offset_alignment(info.kind);
        let layout = BufferLayout::compute(arrays, alignment);
        // Zero-sized buffers are invalid.
        let size = layout.size.max(alignment.max(1));
        let raw = unsafe {
            device.create_buffer(size, info.kind.usage() | info.extra_usage, info.host_visible)
        }?;
        tracing::debug!(
            buffer = ?raw.buffer,
            size,
            regions = layout.regions.len(),
            alignment,
            host_visible = info.host_visible,
            "created multi-buffer"
        );
        let claimed = layout.regions.iter().map(|_| AtomicBool::new(false)).collect();
        Ok(Self {
            device,
            raw,
            kind: info.kind,
            layout,
            claimed,
        })
    }
    pub fn raw(&self) -> vk::Buffer {
        self.raw.buffer
    }
    pub fn kind(&self) -> BufferKind {
        self.kind
    }
    /// Size of the native buffer. At least one alignment unit even when every region is empty.
    pub fn size(&self) -> vk::DeviceSize {
        self.layout.size.max(self.device.min_offset_alignment(self.kind).max(1))
    }
    pub fn regions(&self) -> &[BufferRegion] {
        &self.layout.regions
    }
    pub fn is_host_visible(&self) -> bool {
        self.raw.mapped.is_some()
    }
    /// Host address of the first byte of `region`, if the buffer is mapped.
    pub fn mapped_ptr(&self, region: usize) -> Option<NonNull<u8>> {
        let offset = self.layout.regions[region].offset as usize;
        self.raw
            .mapped
            .map(|base| unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) })
    }

    /// Typed view of `region`. Only one view of a region may exist at a time.
    pub fn region<T: bytemuck::Pod>(self: &Arc<Self>, region: usize) -> Region<D, T> {
        let layout = self.layout.regions[region];
        assert!(
            std::mem::size_of::<T>() as vk::DeviceSize <= layout.stride || layout.element_count == 0,
            "{} does not fit a stride of {} bytes",
            std::any::type_name::<T>(),
            layout.stride
        );
        let align = std::mem::align_of::<T>() as vk::DeviceSize;
        assert!(
            layout.stride % align == 0 && layout.offset % align == 0,
            "region {region} is not aligned for {}",
            std::any::type_name::<T>()
        );
        let already = self.claimed[region].swap(true, Ordering::Acquire);
        assert!(!already, "region {region} already has a live view");
        Region {
            claim: Arc::new(Claim {
                buffer: self.clone(),
                region,
            }),
            layout,
            _marker: PhantomData,
        }
    }
}

impl<D: GpuDevice> HasDevice for MultiBuffer<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}

impl<D: GpuDevice> Drop for MultiBuffer<D> {
    fn drop(&mut self) {
        tracing::debug!(buffer = ?self.raw.buffer, "drop multi-buffer");
        unsafe {
            self.device
                .destroy_buffer(self.raw.buffer, &mut self.raw.allocation);
        }
    }
}

/// Marks a region as viewed until every view derived from it is dropped.
struct Claim<D: GpuDevice> {
    buffer: Arc<MultiBuffer<D>>,
    region: usize,
}

impl<D: GpuDevice> Drop for Claim<D> {
    fn drop(&mut self) {
        self.buffer.claimed[self.region].store(false, Ordering::Release);
    }
}

impl<D: GpuDevice> Claim<D> {
    fn element<T>(&self, layout: &BufferRegion, index: u32, repeat: u32) -> *mut T {
        let offset = layout.element_offset(index, repeat);
        let Some(base) = self.buffer.raw.mapped else {
            panic!("region {} lives in a buffer that is not host visible", self.region)
        };
        unsafe { base.as_ptr().add(offset as usize) as *mut T }
    }
}

/// Typed access to every copy of one logical array.
pub struct Region<D: GpuDevice, T> {
    claim: Arc<Claim<D>>,
    layout: BufferRegion,
    _marker: PhantomData<fn(T) -> T>,
}

impl<D: GpuDevice, T: bytemuck::Pod> Region<D, T> {
    pub fn layout(&self) -> &BufferRegion {
        &self.layout
    }
    pub fn len(&self) -> u32 {
        self.layout.element_count
    }
    pub fn is_empty(&self) -> bool {
        self.layout.element_count == 0
    }
    pub fn repeat_count(&self) -> u32 {
        self.layout.repeat_count
    }
    pub fn buffer(&self) -> &Arc<MultiBuffer<D>> {
        &self.claim.buffer
    }
    pub fn at_mut(&mut self, index: u32, frame: u32) -> &mut T {
        unsafe { &mut *self.claim.element::<T>(&self.layout, index, frame) }
    }
    pub fn write(&mut self, index: u32, frame: u32, value: &T) {
        *self.at_mut(index, frame) = *value;
    }
    /// Offset to pass at bind time for a dynamic descriptor created from
    /// [`Self::descriptor_info`].
    pub fn dynamic_offset(&self, index: u32, frame: u32) -> u32 {
        (self.layout.element_offset(index, frame) - self.layout.offset) as u32
    }
    /// One element at the region base, for dynamic uniform or storage descriptors.
    pub fn descriptor_info(&self) -> DescriptorResource {
        DescriptorResource::Buffer {
            buffer: self.claim.buffer.raw(),
            offset: self.layout.offset,
            range: self.layout.stride,
        }
    }
    /// Splits the view into one owned view per repeat.
    pub fn into_frames(self) -> Vec<FrameRegion<D, T>> {
        (0..self.layout.repeat_count)
            .map(|frame| FrameRegion {
                claim: self.claim.clone(),
                layout: self.layout,
                frame,
                _marker: PhantomData,
            })
            .collect()
    }
}

/// Typed access to the copy of a logical array belonging to one frame slot.
pub struct FrameRegion<D: GpuDevice, T> {
    claim: Arc<Claim<D>>,
    layout: BufferRegion,
    frame: u32,
    _marker: PhantomData<fn(T) -> T>,
}

impl<D: GpuDevice, T: bytemuck::Pod> FrameRegion<D, T> {
    pub fn frame(&self) -> u32 {
        self.frame
    }
    pub fn len(&self) -> u32 {
        self.layout.element_count
    }
    pub fn is_empty(&self) -> bool {
        self.layout.element_count == 0
    }
    pub fn at_mut(&mut self, index: u32) -> &mut T {
        unsafe { &mut *self.claim.element::<T>(&self.layout, index, self.frame) }
    }
    pub fn write(&mut self, index: u32, value: &T) {
        *self.at_mut(index) = *value;
    }
    /// Copies `values` into consecutive elements starting at 0.
    pub fn write_all(&mut self, values: &[T]) {
        assert!(values.len() <= self.layout.element_count as usize);
        for (i, value) in values.iter().enumerate() {
            self.write(i as u32, value);
        }
    }
    pub fn dynamic_offset(&self, index: u32) -> u32 {
        (self.layout.element_offset(index, self.frame) - self.layout.offset) as u32
    }
    /// This frame's whole copy of the array.
    pub fn descriptor_info(&self) -> DescriptorResource {
        DescriptorResource::Buffer {
            buffer: self.claim.buffer.raw(),
            offset: self.layout.offset + self.frame as vk::DeviceSize * self.layout.bytes_per_repeat(),
            range: self.layout.bytes_per_repeat(),
        }
    }
}
