//! # Receive Path
//!
//! The receive side of the ownership handoff: free frames are offered to the
//! kernel on the fill ring, the kernel writes packets into them and reports
//! each one on the rx ring, and the caller reads the data and returns the
//! frame to the pool.

use crate::channel::Channel;
use crate::error::RingError;
use crate::session::Session;

impl<C: Channel> Session<C> {
    /// Offers up to `max` free frames to the kernel for incoming packets.
    pub fn refill(&mut self, max: u32) -> Result<u32, RingError> {
        self.umem.refill(max)
    }

    /// Consumes up to `max` received packets, passing each payload to `f`.
    ///
    /// Frames go back to the pool once `f` returns; call `refill` to offer them
    /// to the kernel again. Descriptors naming a frame that was not on the fill
    /// ring are dropped and logged. Returns the number of packets delivered.
    pub fn receive<F>(&mut self, max: u32, mut f: F) -> Result<u32, RingError>
    where
        F: FnMut(&[u8]),
    {
        let n = self.rx.reserve_consumer_slots(max);
        if n == 0 {
            return Ok(0);
        }
        let frames = &mut self.umem.frames;
        let mut delivered = 0;
        for i in 0..n {
            let desc = self.rx.consumer_slot(i)?;
            if let Err(e) = frames.received(desc.addr) {
                log::warn!("dropping rx descriptor {desc:?}: {e}");
                continue;
            }
            match frames.frame(desc.addr, desc.len as usize) {
                Ok(data) => {
                    f(data);
                    delivered += 1;
                }
                Err(e) => log::warn!("dropping rx descriptor {desc:?}: {e}"),
            }
            frames.release(desc.addr)?;
        }
        self.rx.commit_consumed(n)?;
        self.stats.rx_packets += delivered as u64;
        Ok(delivered)
    }
}
