// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::{GfxError, GfxResult, GpuBackend};

/// Lifecycle of one swapchain image slot within a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, nothing pending on the CPU side.
    #[default]
    Idle,
    Acquired,
    Recording,
    Submitted,
    Presented,
}

impl SlotState {
    /// Whether the cycle allows moving from `self` to `next`.
    pub fn can_advance_to(self, next: SlotState) -> bool {
        use SlotState::*;
        matches!(
            (self, next),
            (Idle, Acquired)
                | (Acquired, Recording)
                | (Recording, Submitted)
                | (Submitted, Presented)
                | (Presented, Idle)
        )
    }
}

/// Two semaphores shared by every frame plus one fence per swapchain image.
///
/// Fence `i` is waited on and reset only right before command buffer `i` is
/// re-recorded, so a buffer is never rewritten while its GPU work is pending.
#[derive(Clone, Debug, Default)]
pub struct FrameSyncSet {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub fences: Vec<vk::Fence>,
    pub slots: Vec<SlotState>,
}

impl FrameSyncSet {
    /// Creates the image-available and render-finished semaphores.
    pub fn create_semaphores<B: GpuBackend>(gpu: &mut B) -> GfxResult<[vk::Semaphore; 2]> {
        let image_available = gpu
            .create_semaphore()
            .map_err(GfxError::creation("image-available semaphore"))?;
        let render_finished = match gpu.create_semaphore() {
            Ok(s) => s,
            Err(result) => {
                gpu.destroy_semaphore(image_available);
                return Err(GfxError::ResourceCreation {
                    object: "render-finished semaphore",
                    result,
                });
            }
        };
        Ok([image_available, render_finished])
    }

    /// One fence per image, created signaled so the first wait never blocks.
    pub fn create_fences<B: GpuBackend>(gpu: &mut B, count: usize) -> GfxResult<Vec<vk::Fence>> {
        let mut fences = Vec::with_capacity(count);
        for _ in 0..count {
            match gpu.create_fence(true) {
                Ok(f) => fences.push(f),
                Err(result) => {
                    for &f in fences.iter().rev() {
                        gpu.destroy_fence(f);
                    }
                    return Err(GfxError::ResourceCreation {
                        object: "in-flight fence",
                        result,
                    });
                }
            }
        }
        debug!("vk: {} in-flight fences", fences.len());
        Ok(fences)
    }

    pub fn new(semaphores: [vk::Semaphore; 2], fences: Vec<vk::Fence>) -> Self {
        let slots = vec![SlotState::Idle; fences.len()];
        Self {
            image_available: semaphores[0],
            render_finished: semaphores[1],
            fences,
            slots,
        }
    }

    /// Destroys the fences and creates `count` new signaled ones.
    pub fn recreate_fences<B: GpuBackend>(&mut self, gpu: &mut B, count: usize) -> GfxResult<()> {
        for &f in self.fences.iter().rev() {
            gpu.destroy_fence(f);
        }
        self.fences.clear();
        self.slots.clear();
        self.fences = Self::create_fences(gpu, count)?;
        self.slots = vec![SlotState::Idle; count];
        Ok(())
    }

    pub fn reset_slots(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = SlotState::Idle);
    }

    /// Moves slot `index` to `next`, rejecting transitions the cycle does not allow.
    pub fn advance(&mut self, index: usize, next: SlotState) -> GfxResult<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or_else(|| GfxError::FrameOrder(format!("image index {index} out of range")))?;
        if !slot.can_advance_to(next) {
            return Err(GfxError::FrameOrder(format!(
                "image {index}: {slot:?} -> {next:?}"
            )));
        }
        *slot = next;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cycle_is_linear() {
        use SlotState::*;
        let cycle = [Idle, Acquired, Recording, Submitted, Presented, Idle];
        for w in cycle.windows(2) {
            assert!(w[0].can_advance_to(w[1]), "{:?} -> {:?}", w[0], w[1]);
        }
        assert!(!Idle.can_advance_to(Submitted));
        assert!(!Acquired.can_advance_to(Presented));
        assert!(!Submitted.can_advance_to(Recording));
        assert!(!Idle.can_advance_to(Idle));
    }

    #[test]
    fn advance_rejects_skipped_steps() {
        let mut set = FrameSyncSet::new(
            [vk::Semaphore::null(), vk::Semaphore::null()],
            vec![vk::Fence::null(); 2],
        );
        set.advance(1, SlotState::Acquired).unwrap();
        assert!(matches!(
            set.advance(1, SlotState::Submitted),
            Err(GfxError::FrameOrder(_))
        ));
        assert!(matches!(
            set.advance(5, SlotState::Acquired),
            Err(GfxError::FrameOrder(_))
        ));
        set.reset_slots();
        assert_eq!(set.slots, vec![SlotState::Idle; 2]);
    }
}
