//! Userspace side of an AF_XDP zero-copy packet channel.
//!
//! A [`Session`] owns a frame pool registered as UMEM and the four rings shared
//! with the kernel (fill, completion, rx, tx). Frames change owner by crossing
//! a ring: the fill and tx rings hand them to the kernel, the rx and completion
//! rings hand them back.

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod mmap;
pub mod ring;
pub mod session;
pub mod stats;
pub mod umem;

// Data path, implemented on `Session`.
mod kick;
pub mod poll;
mod recv;
mod send;

#[cfg(test)]
mod tests;

pub use channel::{Channel, XdpChannel};
pub use config::XdpConfig;
pub use error::{RingError, SetupError};
pub use frame::{FramePool, FrameState};
pub use poll::Readiness;
pub use ring::{Ring, RingKind, Slot, XdpDesc};
pub use session::{Session, SessionSetup, SessionState, open_session, open_session_with};
pub use stats::{Interval, Stats};
pub use umem::Umem;
