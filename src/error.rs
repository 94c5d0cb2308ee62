use ash::vk;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Allocation failed twice in a row, the second time from a freshly obtained pool.
    #[error("descriptor pool exhausted: allocation failed on a fresh pool")]
    PoolExhausted,
    /// The GPU did not finish the work guarding a frame slot in time. Treated as a hung device.
    #[error("timed out waiting for the fence of frame slot {slot}")]
    FenceTimeout { slot: usize },
    #[error(transparent)]
    Vulkan(#[from] vk::Result),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Native results that mean the current descriptor pool cannot serve the request.
    pub(crate) fn is_pool_full(result: vk::Result) -> bool {
        matches!(
            result,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
        )
    }
}
