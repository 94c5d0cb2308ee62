mod builder;
mod layout;
mod pool;
mod shared;
mod updater;

pub use builder::{BuiltSet, DescriptorBuilder, DescriptorResource};
pub use layout::{BindingDescriptor, DescriptorKind, DescriptorSetLayout, LayoutCache, LayoutKey};
pub use pool::{AllocatedSet, DescriptorAllocator};
pub use shared::{SharedLayoutCache, ThreadLocalAllocator};
pub use updater::DescriptorUpdater;
