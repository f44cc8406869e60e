//! Session configuration.

use crate::ring::DEFAULT_RING_DEPTH;

/// Default number of frames in the pool.
pub const DEFAULT_FRAME_COUNT: u32 = 256;
/// Default frame size; two frames per 4 KiB page.
pub const DEFAULT_FRAME_SIZE: u32 = 2048;

/// Configuration options for opening a session.
///
/// Ring depths must be non-zero powers of two. They are independent of each
/// other and of `frame_count`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct XdpConfig {
    /// Number of frames in the pool.
    pub frame_count: u32,
    /// Size of one frame (the UMEM chunk size).
    pub frame_size: u32,
    /// Bytes reserved by the kernel at the start of each received frame.
    pub headroom: u32,
    pub fill_depth: u32,
    pub completion_depth: u32,
    pub rx_depth: u32,
    pub tx_depth: u32,
    /// Frames offered on the fill ring before the session is handed out.
    ///
    /// `None` offers half of the pool, keeping the other half for transmission.
    pub prefill: Option<u32>,
    /// Backs the frame pool with huge pages.
    ///
    /// - `Some(true)`: use 2 MiB huge pages.
    /// - `Some(false)`: use standard pages.
    /// - `None`: use huge pages if the system has free ones.
    pub huge_page: Option<bool>,
    /// Selects the bind mode.
    ///
    /// - `Some(true)`: `XDP_ZEROCOPY`.
    /// - `Some(false)`: `XDP_COPY`.
    /// - `None`: let the kernel choose.
    pub zero_copy: Option<bool>,
    /// Sets `XDP_USE_NEED_WAKEUP` on bind. `None` means `true`.
    pub need_wakeup: Option<bool>,
}

impl Default for XdpConfig {
    fn default() -> Self {
        XdpConfig {
            frame_count: DEFAULT_FRAME_COUNT,
            frame_size: DEFAULT_FRAME_SIZE,
            headroom: 0,
            fill_depth: DEFAULT_RING_DEPTH,
            completion_depth: DEFAULT_RING_DEPTH,
            rx_depth: DEFAULT_RING_DEPTH,
            tx_depth: DEFAULT_RING_DEPTH,
            prefill: None,
            huge_page: None,
            zero_copy: None,
            need_wakeup: None,
        }
    }
}

impl XdpConfig {
    /// Sets the same depth on all four rings.
    pub fn with_ring_depth(mut self, depth: u32) -> Self {
        self.fill_depth = depth;
        self.completion_depth = depth;
        self.rx_depth = depth;
        self.tx_depth = depth;
        self
    }

    /// Number of frames to offer on the fill ring during setup.
    pub fn prefill_frames(&self) -> u32 {
        self.prefill
            .unwrap_or(self.frame_count / 2)
            .min(self.frame_count)
            .min(self.fill_depth)
    }

    /// `sxdp_flags` for binding.
    pub fn bind_flags(&self) -> u16 {
        let zero_copy = match self.zero_copy {
            Some(true) => libc::XDP_ZEROCOPY,
            Some(false) => libc::XDP_COPY,
            None => 0,
        };
        let need_wakeup = if self.need_wakeup.unwrap_or(true) {
            libc::XDP_USE_NEED_WAKEUP
        } else {
            0
        };
        zero_copy | need_wakeup
    }
}
