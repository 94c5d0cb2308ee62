//! Descriptor caches that may be used from several recording threads at once.

use std::cell::RefCell;
use std::sync::{Arc, RwLock};

use thread_local::ThreadLocal;

use super::{BindingDescriptor, DescriptorAllocator, DescriptorSetLayout, LayoutCache, LayoutKey};
use crate::config::DescriptorPoolConfig;
use crate::gpu::{GpuDevice, HasDevice};
use crate::Result;

/// A [`LayoutCache`] behind a read-write lock. Lookups of existing layouts only take the
/// read lock.
pub struct SharedLayoutCache<D: GpuDevice> {
    device: D,
    inner: RwLock<LayoutCache<D>>,
}

impl<D: GpuDevice> SharedLayoutCache<D> {
    pub fn new(device: D) -> Self {
        Self {
            inner: RwLock::new(LayoutCache::new(device.clone())),
            device,
        }
    }
    pub fn get_or_create(
        &self,
        bindings: &[BindingDescriptor],
    ) -> Result<Arc<DescriptorSetLayout<D>>> {
        assert!(
            !bindings.is_empty(),
            "a descriptor set layout needs at least one binding"
        );
        let key = LayoutKey::new(bindings);
        {
            let cache = self.inner.read().unwrap();
            if let Some(layout) = cache.get(&key) {
                return Ok(layout.clone());
            }
        }
        // Another thread may have inserted the key in between; the cache checks again.
        self.inner.write().unwrap().get_or_create_by_key(key)
    }
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: GpuDevice> HasDevice for SharedLayoutCache<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}

/// One [`DescriptorAllocator`] pool chain per thread, created on first use.
pub struct ThreadLocalAllocator<D: GpuDevice> {
    device: D,
    config: DescriptorPoolConfig,
    allocators: ThreadLocal<RefCell<DescriptorAllocator<D>>>,
}

impl<D: GpuDevice> ThreadLocalAllocator<D> {
    pub fn new(device: D, config: DescriptorPoolConfig) -> Self {
        Self {
            device,
            config,
            allocators: ThreadLocal::new(),
        }
    }

    /// Runs `f` with the calling thread's allocator. Must not be nested.
    pub fn with<R>(&self, f: impl FnOnce(&mut DescriptorAllocator<D>) -> R) -> R {
        let allocator = self.allocators.get_or(|| {
            tracing::debug!(thread = ?std::thread::current().id(), "new descriptor pool chain");
            RefCell::new(DescriptorAllocator::new(
                self.device.clone(),
                self.config.clone(),
            ))
        });
        f(&mut allocator.borrow_mut())
    }

    /// Resets the pool chain of every thread. Needs exclusive access, so no thread can be
    /// allocating at the same time.
    pub fn reset_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        for allocator in self.allocators.iter_mut() {
            if let Err(err) = allocator.get_mut().reset_all() {
                result = Err(err);
            }
        }
        result
    }

    /// Number of threads that own a pool chain.
    pub fn thread_count(&mut self) -> usize {
        self.allocators.iter_mut().count()
    }
}

impl<D: GpuDevice> HasDevice for ThreadLocalAllocator<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}
