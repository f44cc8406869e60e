//! # Waiting for Ring Activity
//!
//! Ring operations never block. `poll_wait` is the blocking companion for a
//! poll loop: it kicks the kernel, then waits on the endpoint with `poll(2)`
//! until it is readable (`POLLIN`, rx ring has entries) or writable
//! (`POLLOUT`, tx ring has room), or the timeout expires.

use std::time::Duration;

use crate::channel::Channel;
use crate::error::RingError;
use crate::session::Session;

/// What to wait for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
    Either,
}

impl Readiness {
    fn events(self) -> libc::c_short {
        match self {
            Readiness::Readable => libc::POLLIN,
            Readiness::Writable => libc::POLLOUT,
            Readiness::Either => libc::POLLIN | libc::POLLOUT,
        }
    }
}

impl<C: Channel> Session<C> {
    /// Blocks until the endpoint is ready or `timeout` expires.
    ///
    /// `None` waits indefinitely. Returns `false` on timeout.
    pub fn poll_wait(&self, readiness: Readiness, timeout: Option<Duration>) -> Result<bool, RingError> {
        self.kick()?;
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        let events = readiness.events();
        let revents = self.channel.poll(events, timeout_ms)?;
        Ok(revents & events != 0)
    }
}
