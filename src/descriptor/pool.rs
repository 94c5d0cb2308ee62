use ash::vk;
use smallvec::SmallVec;

use super::DescriptorSetLayout;
use crate::config::DescriptorPoolConfig;
use crate::gpu::{GpuDevice, HasDevice};
use crate::{Error, Result};

struct DescriptorPool<D: GpuDevice> {
    device: D,
    raw: vk::DescriptorPool,
}

impl<D: GpuDevice> Drop for DescriptorPool<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.raw);
        }
    }
}

/// A descriptor set handed out by a [`DescriptorAllocator`]. It is owned by the pool it came
/// from and becomes invalid when the allocator is reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocatedSet {
    raw: vk::DescriptorSet,
    epoch: u64,
}

impl AllocatedSet {
    pub fn raw(&self) -> vk::DescriptorSet {
        self.raw
    }
}

/// Hands out descriptor sets from a chain of fixed-capacity pools, growing the chain when the
/// current pool runs out.
///
/// Pools are never freed individually. [`DescriptorAllocator::reset_all`] returns every pool to
/// the free list at once.
pub struct DescriptorAllocator<D: GpuDevice> {
    device: D,
    config: DescriptorPoolConfig,
    current: Option<DescriptorPool<D>>,
    /// Retired pools that still own live sets.
    used: Vec<DescriptorPool<D>>,
    /// Reset pools ready for reuse.
    free: Vec<DescriptorPool<D>>,
    epoch: u64,
}

impl<D: GpuDevice> DescriptorAllocator<D> {
    pub fn new(device: D, config: DescriptorPoolConfig) -> Self {
        assert!(config.max_sets > 0, "descriptor pools need room for at least one set");
        Self {
            device,
            config,
            current: None,
            used: Vec::new(),
            free: Vec::new(),
            epoch: 0,
        }
    }

    fn grab_pool(&mut self) -> Result<DescriptorPool<D>> {
        if let Some(pool) = self.free.pop() {
            return Ok(pool);
        }
        let sizes = self.config.pool_sizes();
        let raw = unsafe {
            self.device
                .create_descriptor_pool(self.config.max_sets, &sizes)
        }?;
        tracing::debug!(pool = ?raw, max_sets = self.config.max_sets, "created descriptor pool");
        Ok(DescriptorPool {
            device: self.device.clone(),
            raw,
        })
    }

    fn current_pool(&mut self) -> Result<vk::DescriptorPool> {
        if let Some(pool) = &self.current {
            return Ok(pool.raw);
        }
        let pool = self.grab_pool()?;
        let raw = pool.raw;
        self.current = Some(pool);
        Ok(raw)
    }

    /// Moves the current pool to the used list and installs a replacement.
    fn retire_current(&mut self) -> Result<vk::DescriptorPool> {
        let replacement = self.grab_pool()?;
        let raw = replacement.raw;
        if let Some(retired) = self.current.replace(replacement) {
            tracing::info!(
                pool = ?retired.raw,
                pools = self.used.len() + 2,
                "descriptor pool full, switching to a new pool"
            );
            self.used.push(retired);
        }
        Ok(raw)
    }

    fn allocate_raw(
        &mut self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let pool = self.current_pool()?;
        match unsafe { self.device.allocate_descriptor_sets(pool, layouts) } {
            Ok(sets) => return Ok(sets),
            Err(result) if Error::is_pool_full(result) => {}
            Err(result) => return Err(result.into()),
        }
        let pool = self.retire_current()?;
        match unsafe { self.device.allocate_descriptor_sets(pool, layouts) } {
            Ok(sets) => Ok(sets),
            Err(result) if Error::is_pool_full(result) => {
                tracing::warn!(
                    sets = layouts.len(),
                    "descriptor allocation does not fit in an empty pool"
                );
                Err(Error::PoolExhausted)
            }
            Err(result) => Err(result.into()),
        }
    }

    fn wrap(&self, raw: vk::DescriptorSet) -> AllocatedSet {
        AllocatedSet {
            raw,
            epoch: self.epoch,
        }
    }

    pub fn allocate(&mut self, layout: &DescriptorSetLayout<D>) -> Result<AllocatedSet> {
        let sets = self.allocate_raw(&[layout.raw()])?;
        Ok(self.wrap(sets[0]))
    }

    /// Allocates `count` sets of the same layout from a single pool.
    pub fn allocate_many(
        &mut self,
        layout: &DescriptorSetLayout<D>,
        count: usize,
    ) -> Result<Vec<AllocatedSet>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let layouts: SmallVec<[vk::DescriptorSetLayout; 8]> =
            std::iter::repeat(layout.raw()).take(count).collect();
        let sets = self.allocate_raw(&layouts)?;
        Ok(sets.into_iter().map(|raw| self.wrap(raw)).collect())
    }

    /// Allocates one set per layout from a single pool.
    pub fn allocate_layouts(
        &mut self,
        layouts: &[&DescriptorSetLayout<D>],
    ) -> Result<Vec<AllocatedSet>> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }
        let raw_layouts: SmallVec<[vk::DescriptorSetLayout; 8]> =
            layouts.iter().map(|layout| layout.raw()).collect();
        let sets = self.allocate_raw(&raw_layouts)?;
        Ok(sets.into_iter().map(|raw| self.wrap(raw)).collect())
    }

    /// Resets every pool and returns it to the free list. All sets allocated so far become
    /// invalid at once.
    ///
    /// A pool that fails to reset stays on the used list and is retried by the next call.
    pub fn reset_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        let pools: Vec<_> = self.used.drain(..).chain(self.current.take()).collect();
        for pool in pools {
            match unsafe { self.device.reset_descriptor_pool(pool.raw) } {
                Ok(()) => self.free.push(pool),
                Err(err) => {
                    tracing::error!(pool = ?pool.raw, %err, "failed to reset descriptor pool");
                    result = Err(err.into());
                    self.used.push(pool);
                }
            }
        }
        self.epoch += 1;
        result
    }

    /// Whether `set` was allocated after the most recent reset.
    pub fn is_live(&self, set: &AllocatedSet) -> bool {
        set.epoch == self.epoch
    }
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
    /// Pools currently holding sets.
    pub fn pool_count(&self) -> usize {
        self.used.len() + self.current.is_some() as usize
    }
    pub fn free_pool_count(&self) -> usize {
        self.free.len()
    }
    pub fn config(&self) -> &DescriptorPoolConfig {
        &self.config
    }
}

impl<D: GpuDevice> HasDevice for DescriptorAllocator<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}
