//! Packet counters kept by a session.

use crate::channel::Channel;
use crate::session::Session;

/// Running counters of one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    /// `rx_packets` at the end of the previous interval.
    pub prev_rx_packets: u64,
    /// `tx_packets` at the end of the previous interval.
    pub prev_tx_packets: u64,
    /// Tx descriptors handed to the kernel and not yet seen on the completion ring.
    pub outstanding_tx: u32,
}

/// Packets moved during one interval.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub rx_packets: u64,
    pub tx_packets: u64,
}

impl Stats {
    /// Closes the current interval and returns what happened in it.
    pub fn roll_interval(&mut self) -> Interval {
        let interval = Interval {
            rx_packets: self.rx_packets - self.prev_rx_packets,
            tx_packets: self.tx_packets - self.prev_tx_packets,
        };
        self.prev_rx_packets = self.rx_packets;
        self.prev_tx_packets = self.tx_packets;
        interval
    }
}

impl<C: Channel> Session<C> {
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Closes the current counting interval, see `Stats::roll_interval`.
    pub fn roll_interval(&mut self) -> Interval {
        self.stats.roll_interval()
    }
}
