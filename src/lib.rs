//! Descriptor allocation and frames-in-flight resource management on top of `ash`.

mod align;
pub mod buffer;
mod config;
pub mod descriptor;
mod device;
mod error;
mod fence;
mod frame;
mod gpu;
#[cfg(test)]
mod testing;

pub use align::aligned_stride;
pub use config::{DescriptorPoolConfig, FrameConfig};
pub use device::Device;
pub use error::{Error, Result};
pub use fence::Fence;
pub use frame::{FrameResource, FrameRing};
pub use gpu::{BufferKind, GpuDevice, HasDevice, RawBuffer, Submission};
