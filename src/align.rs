use ash::vk;

/// Rounds `raw` up to the next multiple of `min_alignment`.
///
/// Vulkan guarantees buffer offset alignments are powers of two. An alignment of 0 or 1
/// leaves the size untouched.
#[inline]
pub const fn aligned_stride(raw: vk::DeviceSize, min_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_alignment <= 1 {
        return raw;
    }
    debug_assert!(min_alignment.is_power_of_two());
    (raw + min_alignment - 1) & !(min_alignment - 1)
}
