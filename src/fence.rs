use std::fmt::Debug;

use ash::vk;

use crate::gpu::{GpuDevice, HasDevice, Submission};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    /// Signaled, either at creation or by completed work that has been waited on.
    Idle,
    /// Reset and not yet handed to a submission. Waiting on it would never return.
    Armed,
    /// Handed to a queue submission; signaled by the GPU once that work completes.
    InFlight,
}

/// CPU-side completion signal for one frame slot.
///
/// The fence is created signaled so the first wait on a fresh slot returns immediately.
pub struct Fence<D: GpuDevice> {
    device: D,
    raw: vk::Fence,
    state: FenceState,
}

impl<D: GpuDevice> Debug for Fence<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence")
            .field(&self.raw)
            .field(&self.state)
            .finish()
    }
}

impl<D: GpuDevice> Fence<D> {
    pub fn new(device: D) -> Result<Self> {
        let raw = unsafe { device.create_fence(true) }?;
        Ok(Self {
            device,
            raw,
            state: FenceState::Idle,
        })
    }
    pub fn raw(&self) -> vk::Fence {
        self.raw
    }
    pub fn is_in_flight(&self) -> bool {
        self.state == FenceState::InFlight
    }
    /// Blocks until the work guarded by this fence has completed.
    ///
    /// Returns immediately if the fence was never handed to a submission since the last reset.
    /// `slot` only labels the timeout error.
    pub fn wait(&mut self, timeout: u64, slot: usize) -> Result<()> {
        if self.state != FenceState::InFlight {
            return Ok(());
        }
        tracing::trace!(fence = ?self.raw, slot, "waiting for frame fence");
        match unsafe { self.device.wait_for_fence(self.raw, timeout) } {
            Ok(()) => {
                self.state = FenceState::Idle;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => Err(Error::FenceTimeout { slot }),
            Err(err) => Err(err.into()),
        }
    }
    /// Returns the fence to the unsignaled state so it may guard a new submission.
    /// Must not be called while the fence is in flight.
    pub fn reset(&mut self) -> Result<()> {
        assert!(
            self.state != FenceState::InFlight,
            "resetting a fence that is still guarding GPU work"
        );
        if self.state == FenceState::Idle {
            unsafe { self.device.reset_fence(self.raw) }?;
            self.state = FenceState::Armed;
        }
        Ok(())
    }
    /// Submits work that signals this fence on completion.
    pub fn submit(&mut self, submission: &Submission) -> Result<()> {
        assert_eq!(
            self.state,
            FenceState::Armed,
            "a fence must be waited on and reset before it guards a new submission"
        );
        unsafe { self.device.queue_submit(submission, self.raw) }?;
        self.state = FenceState::InFlight;
        Ok(())
    }
}

impl<D: GpuDevice> HasDevice for Fence<D> {
    type Device = D;
    fn device(&self) -> &D {
        &self.device
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.raw);
        }
    }
}
