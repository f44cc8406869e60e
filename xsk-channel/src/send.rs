//! # Transmit Path
//!
//! The transmit side of the ownership handoff. `send` copies a payload into a
//! free frame and queues its descriptor on the tx ring; the frame stays with
//! the kernel until its address shows up on the completion ring, which
//! `complete` drains back into the pool.

use crate::channel::Channel;
use crate::error::RingError;
use crate::ring::XdpDesc;
use crate::session::Session;

impl<C: Channel> Session<C> {
    /// Queues one packet for transmission.
    ///
    /// If the pool has no free frame, pending completions are reclaimed first.
    /// The kernel is not woken up; call `kick` (or `poll_wait`) after a batch.
    ///
    /// # Errors
    ///
    /// `InvalidLength` if `data` does not fit in a frame, `RingFull` if the tx
    /// ring has no free slot, `NoFreeFrame` if every frame is in use.
    pub fn send(&mut self, data: &[u8]) -> Result<(), RingError> {
        self.send_batch(&[data]).and_then(|sent| match sent {
            0 => Err(RingError::NoFreeFrame),
            _ => Ok(()),
        })
    }

    /// Queues as many of `packets` as ring slots and free frames allow, in
    /// order, and returns how many were queued.
    pub fn send_batch(&mut self, packets: &[&[u8]]) -> Result<u32, RingError> {
        let frame_size = self.umem.frames.frame_size() as usize;
        if let Some(p) = packets.iter().find(|p| p.len() > frame_size) {
            return Err(RingError::InvalidLength(p.len()));
        }
        let want = packets.len() as u32;
        if want == 0 {
            return Ok(0);
        }
        let slots = self.tx.reserve_producer_slots(want);
        if slots == 0 {
            return Err(RingError::RingFull);
        }
        if (self.umem.frames.free_count() as u32) < slots {
            self.complete(self.umem.completion.depth())?;
        }
        let n = slots.min(self.umem.frames.free_count() as u32);
        let frames = &mut self.umem.frames;
        for (i, data) in packets.iter().take(n as usize).enumerate() {
            let addr = frames.take().ok_or(RingError::NoFreeFrame)?;
            frames.frame_mut(addr, data.len())?.copy_from_slice(data);
            frames.submit_for_tx(addr)?;
            *self.tx.producer_slot_mut(i as u32)? = XdpDesc::new(addr, data.len() as u32, 0);
        }
        self.tx.commit_produced(n)?;
        self.stats.tx_packets += n as u64;
        self.stats.outstanding_tx += n;
        Ok(n)
    }

    /// Drains up to `max` completion entries, returning their frames to the
    /// pool. Returns the number of transmissions that completed.
    pub fn complete(&mut self, max: u32) -> Result<u32, RingError> {
        let done = self.umem.reclaim(max)?;
        debug_assert!(done <= self.stats.outstanding_tx);
        self.stats.outstanding_tx = self.stats.outstanding_tx.saturating_sub(done);
        Ok(done)
    }
}
