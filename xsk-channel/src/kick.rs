//! # Kernel Wakeup
//!
//! ## Purpose
//!
//! With `XDP_USE_NEED_WAKEUP` the kernel stops polling the tx ring when it runs
//! dry and sets `XDP_RING_NEED_WAKEUP` in the ring's flags. Newly queued
//! descriptors are then only picked up after an explicit wakeup.
//!
//! ## How it works
//!
//! `kick` checks the flag and, if set, issues a zero-length `sendto` through
//! the channel. Without `XDP_USE_NEED_WAKEUP` the flag is never raised, so
//! every kick issues the `sendto`. `EBUSY`, `ENOBUFS` and `EAGAIN` only mean
//! the kernel is already busy and are ignored; `ENETDOWN` is logged.

use crate::channel::Channel;
use crate::error::RingError;
use crate::session::Session;

impl<C: Channel> Session<C> {
    /// Wakes the kernel up if the tx ring asks for it, or unconditionally
    /// when the session was configured without `need_wakeup`.
    pub fn kick(&self) -> Result<(), RingError> {
        let flag_in_use = self.config.need_wakeup.unwrap_or(true);
        if flag_in_use && !self.tx.needs_wakeup() {
            return Ok(());
        }
        match self.channel.wakeup() {
            Ok(()) => Ok(()),
            Err(e) => match e.raw_os_error() {
                None | Some(libc::EBUSY | libc::ENOBUFS | libc::EAGAIN) => Ok(()),
                Some(libc::ENETDOWN) => {
                    log::warn!("network interface is down, cannot wake up");
                    Ok(())
                }
                Some(_) => Err(RingError::Io(e)),
            },
        }
    }

    /// Sends one packet and wakes the kernel up.
    pub fn send_and_kick(&mut self, data: &[u8]) -> Result<(), RingError> {
        self.send(data)?;
        self.kick()
    }
}
