//! # UMEM Region
//!
//! The frame pool together with the two rings that move bare frame addresses:
//! the fill ring (frames offered to the kernel for reception) and the
//! completion ring (frames the kernel finished transmitting).

use crate::error::RingError;
use crate::frame::FramePool;
use crate::ring::Ring;

pub struct Umem {
    // Field order is drop order: rings are unmapped before the pool is freed.
    pub(crate) fill: Ring<u64>,
    pub(crate) completion: Ring<u64>,
    pub(crate) frames: FramePool,
}

impl Umem {
    pub fn new(frames: FramePool, fill: Ring<u64>, completion: Ring<u64>) -> Self {
        Umem {
            fill,
            completion,
            frames,
        }
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut FramePool {
        &mut self.frames
    }

    pub fn fill(&self) -> &Ring<u64> {
        &self.fill
    }

    pub fn fill_mut(&mut self) -> &mut Ring<u64> {
        &mut self.fill
    }

    pub fn completion(&self) -> &Ring<u64> {
        &self.completion
    }

    pub fn completion_mut(&mut self) -> &mut Ring<u64> {
        &mut self.completion
    }

    /// Offers up to `max` free frames on the fill ring.
    ///
    /// Returns how many frames were published; zero when the pool has no free
    /// frame or the ring has no free slot.
    pub fn refill(&mut self, max: u32) -> Result<u32, RingError> {
        let want = max.min(self.frames.free_count() as u32);
        if want == 0 {
            return Ok(0);
        }
        let n = self.fill.reserve_producer_slots(want);
        for i in 0..n {
            let addr = self.frames.take().ok_or(RingError::NoFreeFrame)?;
            self.frames.offer_for_fill(addr)?;
            *self.fill.producer_slot_mut(i)? = addr;
        }
        self.fill.commit_produced(n)?;
        Ok(n)
    }

    /// Drains up to `max` entries of the completion ring back into the pool.
    ///
    /// Returns the number of frames that were actually in flight. Entries for
    /// frames the ledger does not record as queued for transmission are
    /// skipped and logged, never counted.
    pub fn reclaim(&mut self, max: u32) -> Result<u32, RingError> {
        let n = self.completion.reserve_consumer_slots(max);
        let mut reclaimed = 0;
        for i in 0..n {
            let addr = self.completion.consumer_slot(i)?;
            match self
                .frames
                .completed(addr)
                .and_then(|()| self.frames.release(addr))
            {
                Ok(()) => reclaimed += 1,
                Err(e) => log::warn!("ignoring completion entry: {e}"),
            }
        }
        self.completion.commit_consumed(n)?;
        Ok(reclaimed)
    }
}
