//! # Session Setup and Ownership
//!
//! ## Purpose
//!
//! A session owns everything one AF_XDP endpoint needs: the channel, the UMEM
//! (frame pool, fill and completion rings) and the rx and tx rings. This module
//! brings those resources up in the order the kernel requires and guarantees
//! they are all released again, whether setup fails halfway or a ready session
//! is dropped.
//!
//! ## How it works
//!
//! `SessionSetup` is an explicit state machine:
//!
//! ```text
//! Created -> ChannelOpen -> UmemRegistered -> RingsConfigured -> RingsMapped -> Ready
//!    \____________\______________\________________\_______________\____ Failed
//! ```
//!
//! - `open_channel`: create the socket.
//! - `register_umem`: allocate and register the frame pool, size the fill and
//!   completion rings.
//! - `configure_rings`: size the rx and tx rings.
//! - `map_rings`: query ring offsets once, after the last size change, and map
//!   all four rings.
//! - `into_session`: publish the initial fill entries and hand out a `Session`.
//!
//! Each stage checks that the previous one completed. Any error, including a
//! stage called out of order, releases every resource acquired so far (rings
//! unmapped, endpoint closed, frame pool freed) and leaves the setup `Failed`.
//!
//! ## Main components
//!
//! - `SessionState`: the stages.
//! - `SessionSetup<C>`: the state machine.
//! - `Session<C>`: a ready session.
//! - `open_session()` / `open_session_with()`: run every stage.

use std::io;
use std::os::fd::RawFd;

use crate::channel::{Channel, XdpChannel};
use crate::config::XdpConfig;
use crate::error::SetupError;
use crate::frame::FramePool;
use crate::ring::{Ring, RingKind, XdpDesc};
use crate::stats::Stats;
use crate::umem::Umem;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    ChannelOpen,
    UmemRegistered,
    RingsConfigured,
    RingsMapped,
    Ready,
    /// Ready and bound to an interface queue.
    Bound,
    Failed,
}

/// Resources acquired so far. Field order is teardown order.
struct Resources<C> {
    rx: Option<Ring<XdpDesc>>,
    tx: Option<Ring<XdpDesc>>,
    fill: Option<Ring<u64>>,
    completion: Option<Ring<u64>>,
    channel: Option<C>,
    frames: Option<FramePool>,
}

impl<C> Resources<C> {
    fn release(&mut self) {
        let rings = [
            self.rx.take().is_some(),
            self.tx.take().is_some(),
            self.fill.take().is_some(),
            self.completion.take().is_some(),
        ];
        let unmapped = rings.iter().filter(|mapped| **mapped).count();
        let closed = self.channel.take().is_some();
        let freed = self.frames.take().is_some();
        log::debug!("rollback: {unmapped} rings unmapped, channel closed: {closed}, frame pool freed: {freed}");
    }
}

/// Brings a session up stage by stage.
pub struct SessionSetup<C: Channel> {
    config: XdpConfig,
    state: SessionState,
    res: Resources<C>,
}

impl<C: Channel> SessionSetup<C> {
    pub fn new(config: XdpConfig) -> Self {
        SessionSetup {
            config,
            state: SessionState::Created,
            res: Resources {
                rx: None,
                tx: None,
                fill: None,
                completion: None,
                channel: None,
                frames: None,
            },
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &XdpConfig {
        &self.config
    }

    /// The channel, once opened.
    pub fn channel(&self) -> Option<&C> {
        self.res.channel.as_ref()
    }

    fn fail<T>(&mut self, err: SetupError) -> Result<T, SetupError> {
        log::debug!("session setup failed in {:?}: {err}", self.state);
        self.res.release();
        self.state = SessionState::Failed;
        Err(err)
    }

    /// Runs one transition: `required -> attempted`.
    fn stage<F>(&mut self, required: SessionState, attempted: SessionState, f: F) -> Result<(), SetupError>
    where
        F: FnOnce(&XdpConfig, &mut Resources<C>) -> Result<(), SetupError>,
    {
        if self.state != required {
            let current = self.state;
            return self.fail(SetupError::Ordering { attempted, current });
        }
        match f(&self.config, &mut self.res) {
            Ok(()) => {
                log::debug!("session {:?} -> {attempted:?}", self.state);
                self.state = attempted;
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// `Created -> ChannelOpen` using `open` to create the endpoint.
    pub fn open_channel_with<F>(&mut self, open: F) -> Result<(), SetupError>
    where
        F: FnOnce() -> io::Result<C>,
    {
        self.stage(SessionState::Created, SessionState::ChannelOpen, |_, res| {
            res.channel = Some(open().map_err(SetupError::Channel)?);
            Ok(())
        })
    }

    /// `ChannelOpen -> UmemRegistered`: allocate and register the frame pool,
    /// then size the fill and completion rings.
    pub fn register_umem(&mut self) -> Result<(), SetupError> {
        self.stage(SessionState::ChannelOpen, SessionState::UmemRegistered, |cfg, res| {
            let channel = require_channel(&res.channel)?;
            let frames =
                FramePool::allocate(cfg.frame_count, cfg.frame_size, cfg.headroom, cfg.huge_page)?;
            // Stored before registering so a rejected pool is freed by the rollback.
            let frames = res.frames.insert(frames);
            frames.register(channel)?;
            RingKind::Fill.configure_depth(channel, cfg.fill_depth)?;
            RingKind::Completion.configure_depth(channel, cfg.completion_depth)
        })
    }

    /// `UmemRegistered -> RingsConfigured`: size the rx and tx rings.
    pub fn configure_rings(&mut self) -> Result<(), SetupError> {
        self.stage(SessionState::UmemRegistered, SessionState::RingsConfigured, |cfg, res| {
            let channel = require_channel(&res.channel)?;
            RingKind::Rx.configure_depth(channel, cfg.rx_depth)?;
            RingKind::Tx.configure_depth(channel, cfg.tx_depth)
        })
    }

    /// `RingsConfigured -> RingsMapped`: map all four rings.
    pub fn map_rings(&mut self) -> Result<(), SetupError> {
        self.stage(SessionState::RingsConfigured, SessionState::RingsMapped, |cfg, res| {
            let channel = require_channel(&res.channel)?;
            let offsets = channel.mmap_offsets().map_err(|source| SetupError::Mapping {
                ring: RingKind::Fill,
                source,
            })?;
            res.fill = Some(RingKind::Fill.mmap(channel, &offsets, cfg.fill_depth)?);
            res.completion = Some(RingKind::Completion.mmap(channel, &offsets, cfg.completion_depth)?);
            res.rx = Some(RingKind::Rx.mmap(channel, &offsets, cfg.rx_depth)?);
            res.tx = Some(RingKind::Tx.mmap(channel, &offsets, cfg.tx_depth)?);
            Ok(())
        })
    }

    /// `RingsMapped -> Ready`: offer the initial frames on the fill ring and
    /// return the session.
    pub fn into_session(mut self) -> Result<Session<C>, SetupError> {
        if self.state != SessionState::RingsMapped {
            let current = self.state;
            return self.fail(SetupError::Ordering {
                attempted: SessionState::Ready,
                current,
            });
        }
        let res = &mut self.res;
        let (Some(rx), Some(tx), Some(fill), Some(completion), Some(channel), Some(frames)) = (
            res.rx.take(),
            res.tx.take(),
            res.fill.take(),
            res.completion.take(),
            res.channel.take(),
            res.frames.take(),
        ) else {
            return self.fail(SetupError::Channel(closed_channel()));
        };
        let mut session = Session {
            rx,
            tx,
            channel,
            umem: Umem::new(frames, fill, completion),
            config: self.config,
            state: SessionState::Ready,
            stats: Stats::default(),
        };
        let prefill = self.config.prefill_frames();
        // A failure here drops `session`, which tears everything down.
        let offered = session.refill(prefill).map_err(SetupError::Prefill)?;
        log::debug!(
            "session ready on fd {}: {offered} frames offered on the fill ring",
            session.raw_fd()
        );
        Ok(session)
    }
}

impl SessionSetup<XdpChannel> {
    /// `Created -> ChannelOpen` with a real `AF_XDP` socket.
    pub fn open_channel(&mut self) -> Result<(), SetupError> {
        self.open_channel_with(XdpChannel::open)
    }
}

fn closed_channel() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel is not open")
}

fn require_channel<C>(channel: &Option<C>) -> Result<&C, SetupError> {
    channel
        .as_ref()
        .ok_or_else(|| SetupError::Channel(closed_channel()))
}

/// Opens an `AF_XDP` session: socket, UMEM, four mapped rings and an initially
/// populated fill ring.
pub fn open_session(config: XdpConfig) -> Result<Session<XdpChannel>, SetupError> {
    open_session_with(config, XdpChannel::open)
}

/// Same as `open_session`, with a caller-provided endpoint.
pub fn open_session_with<C, F>(config: XdpConfig, open: F) -> Result<Session<C>, SetupError>
where
    C: Channel,
    F: FnOnce() -> io::Result<C>,
{
    let mut setup = SessionSetup::new(config);
    setup.open_channel_with(open)?;
    setup.register_umem()?;
    setup.configure_rings()?;
    setup.map_rings()?;
    setup.into_session()
}

/// A ready AF_XDP session.
///
/// Dropping it unmaps the rx and tx rings, closes the endpoint, then unmaps
/// the fill and completion rings and frees the frame pool. Transmissions still
/// in flight are abandoned.
pub struct Session<C: Channel> {
    // Field order is teardown order.
    pub(crate) rx: Ring<XdpDesc>,
    pub(crate) tx: Ring<XdpDesc>,
    pub(crate) channel: C,
    pub(crate) umem: Umem,
    pub(crate) config: XdpConfig,
    pub(crate) state: SessionState,
    pub(crate) stats: Stats,
}

impl<C: Channel> Session<C> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &XdpConfig {
        &self.config
    }

    /// The endpoint's file descriptor, e.g. for an external event loop.
    pub fn raw_fd(&self) -> RawFd {
        self.channel.raw_fd()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn umem(&self) -> &Umem {
        &self.umem
    }

    pub fn umem_mut(&mut self) -> &mut Umem {
        &mut self.umem
    }

    pub fn frames(&self) -> &FramePool {
        self.umem.frames()
    }

    pub fn fill(&self) -> &Ring<u64> {
        self.umem.fill()
    }

    pub fn completion(&self) -> &Ring<u64> {
        self.umem.completion()
    }

    pub fn rx(&self) -> &Ring<XdpDesc> {
        &self.rx
    }

    pub fn rx_mut(&mut self) -> &mut Ring<XdpDesc> {
        &mut self.rx
    }

    pub fn tx(&self) -> &Ring<XdpDesc> {
        &self.tx
    }

    pub fn tx_mut(&mut self) -> &mut Ring<XdpDesc> {
        &mut self.tx
    }

    /// `Ready -> Bound`: bind to queue `queue_id` of interface `if_index`.
    ///
    /// A failed bind leaves the session `Ready`; it can be retried or dropped.
    pub fn bind(&mut self, if_index: u32, queue_id: u32) -> Result<(), SetupError> {
        if self.state != SessionState::Ready {
            return Err(SetupError::Ordering {
                attempted: SessionState::Bound,
                current: self.state,
            });
        }
        let sxdp = libc::sockaddr_xdp {
            sxdp_family: libc::AF_XDP as libc::sa_family_t,
            sxdp_flags: self.config.bind_flags(),
            sxdp_ifindex: if_index,
            sxdp_queue_id: queue_id,
            sxdp_shared_umem_fd: 0,
        };
        self.channel
            .bind(&sxdp)
            .map_err(|source| SetupError::Bind {
                if_index,
                queue_id,
                source,
            })?;
        log::debug!("fd {} bound to interface {if_index} queue {queue_id}", self.raw_fd());
        self.state = SessionState::Bound;
        Ok(())
    }
}

impl<C: Channel> Drop for Session<C> {
    fn drop(&mut self) {
        if self.stats.outstanding_tx > 0 {
            log::debug!(
                "closing fd {} with {} transmissions in flight",
                self.raw_fd(),
                self.stats.outstanding_tx
            );
        }
    }
}
