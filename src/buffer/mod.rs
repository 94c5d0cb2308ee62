mod multi;

use ash::vk;

use crate::align::aligned_stride;

pub use multi::{FrameRegion, MultiBuffer, MultiBufferInfo, Region};

/// One logical array to be packed into a [`MultiBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrayDesc {
    /// Unaligned size of one element in bytes.
    pub element_size: vk::DeviceSize,
    pub element_count: u32,
    /// Number of full copies of the array, usually one per frame in flight.
    pub repeat_count: u32,
}

impl ArrayDesc {
    pub fn new(element_size: vk::DeviceSize, element_count: u32, repeat_count: u32) -> Self {
        Self {
            element_size,
            element_count,
            repeat_count,
        }
    }
    /// An array of `T` records.
    pub fn of<T>(element_count: u32, repeat_count: u32) -> Self {
        Self::new(
            std::mem::size_of::<T>() as vk::DeviceSize,
            element_count,
            repeat_count,
        )
    }
}

/// Placement of one logical array inside the physical buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRegion {
    /// Element size rounded up to the device's minimum offset alignment.
    pub stride: vk::DeviceSize,
    pub element_count: u32,
    pub repeat_count: u32,
    /// Byte offset of the first element of the first repeat.
    pub offset: vk::DeviceSize,
}

impl BufferRegion {
    pub fn bytes_per_repeat(&self) -> vk::DeviceSize {
        self.stride * self.element_count as vk::DeviceSize
    }
    pub fn size(&self) -> vk::DeviceSize {
        self.bytes_per_repeat() * self.repeat_count as vk::DeviceSize
    }
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
    /// Offset from the buffer start of element `index` in copy `repeat`.
    pub fn element_offset(&self, index: u32, repeat: u32) -> vk::DeviceSize {
        assert!(
            index < self.element_count,
            "element {index} out of bounds for a region of {} elements",
            self.element_count
        );
        assert!(
            repeat < self.repeat_count,
            "repeat {repeat} out of bounds for a region repeated {} times",
            self.repeat_count
        );
        self.offset
            + repeat as vk::DeviceSize * self.bytes_per_repeat()
            + index as vk::DeviceSize * self.stride
    }
}

/// Regions and total size of a packed buffer, computed without touching the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    pub regions: Vec<BufferRegion>,
    pub size: vk::DeviceSize,
}

impl BufferLayout {
    /// Packs `arrays` back to back in the order given.
    pub fn compute(arrays: &[ArrayDesc], min_alignment: vk::DeviceSize) -> Self {
        let mut offset = 0;
        let regions = arrays
            .iter()
            .map(|array| {
                let region = BufferRegion {
                    stride: aligned_stride(array.element_size, min_alignment),
                    element_count: array.element_count,
                    repeat_count: array.repeat_count,
                    offset,
                };
                offset += region.size();
                region
            })
            .collect();
        Self {
            regions,
            size: offset,
        }
    }
}
