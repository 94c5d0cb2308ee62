use smallvec::SmallVec;

use crate::config::FrameConfig;
use crate::descriptor::DescriptorAllocator;
use crate::fence::Fence;
use crate::gpu::{GpuDevice, HasDevice, Submission};
use crate::Result;

/// Everything one frame slot owns: the fence guarding its last submission, a transient
/// descriptor allocator and the caller's per-frame data, typically views into this slot's
/// copy of a multi-buffer.
pub struct FrameResource<D: GpuDevice, T> {
    slot: usize,
    fence: Fence<D>,
    descriptors: DescriptorAllocator<D>,
    pub data: T,
}

impl<D: GpuDevice, T> FrameResource<D, T> {
    pub fn slot(&self) -> usize {
        self.slot
    }
    pub fn fence(&self) -> &Fence<D> {
        &self.fence
    }
    /// Descriptor sets allocated here stay valid until this slot is reused.
    pub fn descriptors(&mut self) -> &mut DescriptorAllocator<D> {
        &mut self.descriptors
    }
}

/// A ring of `N` frame slots that lets the CPU record frame `k + 1` while the GPU is still
/// executing frame `k`.
///
/// A slot is only handed out for writing after the GPU has finished the work last submitted
/// from it. [`FrameRing::advance`] waits on and resets the slot's fence before returning it;
/// [`FrameRing::submit`] is the only operation that arms the fence again.
pub struct FrameRing<D: GpuDevice, T> {
    device: D,
    frames: SmallVec<[FrameResource<D, T>; 3]>,
    current: usize,
    fence_timeout: u64,
    frame_number: u64,
}

impl<D: GpuDevice, T> FrameRing<D, T> {
    /// Creates `config.frames_in_flight` slots, calling `init` once per slot index.
    /// Slot 0 is current and ready to be written.
    pub fn new(
        device: D,
        config: &FrameConfig,
        mut init: impl FnMut(usize) -> Result<T>,
    ) -> Result<Self> {
        assert!(
            config.frames_in_flight > 0,
            "a frame ring needs at least one slot"
        );
        let frames = (0..config.frames_in_flight)
            .map(|slot| -> Result<FrameResource<D, T>> {
                Ok(FrameResource {
                    slot,
                    fence: Fence::new(device.clone())?,
                    descriptors: DescriptorAllocator::new(
                        device.clone(),
                        config.descriptor_pool.clone(),
                    ),
                    data: init(slot)?,
                })
            })
            .collect::<Result<SmallVec<_>>>()?;
        let mut ring = Self {
            device,
            frames,
            current: 0,
            fence_timeout: config.fence_timeout,
            frame_number: 0,
        };
        ring.frames[0].fence.reset()?;
        tracing::info!(
            frames_in_flight = config.frames_in_flight,
            "created frame ring"
        );
        Ok(ring)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }
    pub fn current_index(&self) -> usize {
        self.current
    }
    /// Number of completed [`Self::advance`] calls.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
    pub fn current(&self) -> &FrameResource<D, T> {
        &self.frames[self.current]
    }
    pub fn current_mut(&mut self) -> &mut FrameResource<D, T> {
        &mut self.frames[self.current]
    }

    /// Moves to the next slot, blocking until the GPU has released it.
    ///
    /// On [`crate::Error::FenceTimeout`] the ring stays on the previous slot. The GPU should
    /// be treated as lost.
    pub fn advance(&mut self) -> Result<&mut FrameResource<D, T>> {
        let next = (self.current + 1) % self.frames.len();
        let frame = &mut self.frames[next];
        frame.fence.wait(self.fence_timeout, next)?;
        frame.fence.reset()?;
        frame.descriptors.reset_all()?;
        self.current = next;
        self.frame_number += 1;
        tracing::trace!(slot = next, frame = self.frame_number, "advanced frame ring");
        Ok(&mut self.frames[next])
    }

    /// Submits the current frame's work. Its completion releases the current slot.
    /// Only one submission per frame may carry the slot's fence.
    pub fn submit(&mut self, submission: &Submission) -> Result<()> {
        let slot = self.current;
        self.frames[slot].fence.submit(submission)?;
        tracing::trace!(slot, "submitted frame");
        Ok(())
    }

    fn wait_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        for frame in self.frames.iter_mut() {
            if let Err(err) = frame.fence.wait(self.fence_timeout, frame.slot) {
                tracing::error!(slot = frame.slot, %err, "frame did not complete");
                result = Err(err);
            }
        }
        result
    }

    /// Blocks until every submitted frame has completed. The current slot stays writable.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.wait_all()?;
        let slot = self.current;
        self.frames[slot].fence.reset()
    }
}

impl<D: GpuDevice, T> HasDevice for FrameRing<D, T> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}

impl<D: GpuDevice, T> Drop for FrameRing<D, T> {
    fn drop(&mut self) {
        // Fences and per-frame data must not be destroyed while the GPU still uses them.
        let _ = self.wait_all();
    }
}
