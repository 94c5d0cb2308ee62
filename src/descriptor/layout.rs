use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use crate::gpu::{GpuDevice, HasDevice};
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    UniformBufferDynamic,
    StorageBuffer,
    StorageBufferDynamic,
    CombinedImageSampler,
}

impl DescriptorKind {
    pub fn as_raw(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
    pub fn is_buffer(self) -> bool {
        !matches!(self, DescriptorKind::CombinedImageSampler)
    }
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBufferDynamic | DescriptorKind::StorageBufferDynamic
        )
    }
}

/// The shape of one binding slot in a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingDescriptor {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl BindingDescriptor {
    pub fn new(binding: u32, kind: DescriptorKind, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            kind,
            count: 1,
            stages,
        }
    }
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
    fn packed(&self) -> u64 {
        self.binding as u64
            | ((self.kind.as_raw().as_raw() as u64) << 8)
            | ((self.count as u64) << 16)
            | ((self.stages.as_raw() as u64) << 24)
    }
}

/// Canonical form of a binding list: sorted by binding index. Two keys compare equal when
/// they describe the same bindings, regardless of the order the caller listed them in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutKey {
    bindings: SmallVec<[BindingDescriptor; 4]>,
}

impl LayoutKey {
    pub fn new(bindings: &[BindingDescriptor]) -> Self {
        let mut bindings: SmallVec<[BindingDescriptor; 4]> = SmallVec::from_slice(bindings);
        if !bindings.windows(2).all(|w| w[0].binding <= w[1].binding) {
            bindings.sort_by_key(|b| b.binding);
        }
        Self { bindings }
    }
    pub fn bindings(&self) -> &[BindingDescriptor] {
        &self.bindings
    }
    pub fn binding(&self, index: u32) -> Option<&BindingDescriptor> {
        self.bindings
            .binary_search_by_key(&index, |b| b.binding)
            .ok()
            .map(|i| &self.bindings[i])
    }
    /// Order-independent digest: every binding packed as
    /// `index | type << 8 | count << 16 | stages << 24`, xor-folded over a seed of the
    /// binding count. Distinct keys may collide; equality is checked structurally.
    pub(crate) fn folded_hash(&self) -> u64 {
        self.bindings
            .iter()
            .fold(self.bindings.len() as u64, |acc, b| acc ^ b.packed())
    }
}

impl Hash for LayoutKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.folded_hash());
    }
}

pub struct DescriptorSetLayout<D: GpuDevice> {
    device: D,
    raw: vk::DescriptorSetLayout,
    key: LayoutKey,
}

impl<D: GpuDevice> Debug for DescriptorSetLayout<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("raw", &self.raw)
            .field("bindings", &self.key.bindings())
            .finish()
    }
}

impl<D: GpuDevice> DescriptorSetLayout<D> {
    /// Users should obtain the layout from a [`LayoutCache`].
    fn new(device: D, key: LayoutKey) -> Result<Self> {
        let bindings: SmallVec<[vk::DescriptorSetLayoutBinding; 4]> = key
            .bindings()
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.kind.as_raw())
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();
        let raw = unsafe { device.create_descriptor_set_layout(&bindings) }?;
        tracing::debug!(layout = ?raw, bindings = ?key.bindings(), "created descriptor set layout");
        Ok(Self { device, raw, key })
    }
    pub fn raw(&self) -> vk::DescriptorSetLayout {
        self.raw
    }
    pub fn key(&self) -> &LayoutKey {
        &self.key
    }
    pub fn bindings(&self) -> &[BindingDescriptor] {
        self.key.bindings()
    }
}

impl<D: GpuDevice> HasDevice for DescriptorSetLayout<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}

impl<D: GpuDevice> Drop for DescriptorSetLayout<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.raw);
        }
    }
}

/// Deduplicates descriptor set layouts by structure. The cache only grows; layouts are
/// destroyed when the cache and every outstanding `Arc` are gone.
pub struct LayoutCache<D: GpuDevice> {
    device: D,
    layouts: HashMap<LayoutKey, Arc<DescriptorSetLayout<D>>>,
}

impl<D: GpuDevice> LayoutCache<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            layouts: HashMap::new(),
        }
    }
    pub fn get_or_create(
        &mut self,
        bindings: &[BindingDescriptor],
    ) -> Result<Arc<DescriptorSetLayout<D>>> {
        assert!(
            !bindings.is_empty(),
            "a descriptor set layout needs at least one binding"
        );
        let key = LayoutKey::new(bindings);
        self.get_or_create_by_key(key)
    }
    pub(crate) fn get_or_create_by_key(
        &mut self,
        key: LayoutKey,
    ) -> Result<Arc<DescriptorSetLayout<D>>> {
        if let Some(layout) = self.layouts.get(&key) {
            return Ok(layout.clone());
        }
        let layout = Arc::new(DescriptorSetLayout::new(self.device.clone(), key.clone())?);
        self.layouts.insert(key, layout.clone());
        Ok(layout)
    }
    pub(crate) fn get(&self, key: &LayoutKey) -> Option<&Arc<DescriptorSetLayout<D>>> {
        self.layouts.get(key)
    }
    pub fn len(&self) -> usize {
        self.layouts.len()
    }
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

impl<D: GpuDevice> HasDevice for LayoutCache<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}
