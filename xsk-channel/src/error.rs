//! Error types.
//!
//! `SetupError` covers the one-time resource acquisition performed while a
//! session is opened; every variant maps to the stage that produced it.
//! `RingError` covers the non-blocking ring operations of the data path.

use std::io;

use crate::frame::FrameState;
use crate::ring::RingKind;
use crate::session::SessionState;

/// A failure while bringing a session to the `Ready` (or `Bound`) state.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The AF_XDP socket could not be created.
    #[error("cannot create AF_XDP socket: {0}")]
    Channel(#[source] io::Error),

    /// The frame pool geometry is invalid or the memory could not be mapped.
    #[error("cannot allocate frame pool of {size} bytes: {source}")]
    Allocation {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// The kernel rejected the UMEM description.
    #[error("UMEM registration rejected: {0}")]
    Registration(#[source] io::Error),

    /// The ring depth is not a non-zero power of two, or the kernel refused it.
    #[error("cannot configure {ring:?} ring with depth {depth}: {source}")]
    Configuration {
        ring: RingKind,
        depth: u32,
        #[source]
        source: io::Error,
    },

    /// Querying ring offsets or mapping ring memory failed.
    #[error("cannot map {ring:?} ring: {source}")]
    Mapping {
        ring: RingKind,
        #[source]
        source: io::Error,
    },

    /// A setup stage was invoked while the session was in the wrong state.
    #[error("stage {attempted:?} cannot run while the session is {current:?}")]
    Ordering {
        attempted: SessionState,
        current: SessionState,
    },

    /// The initial fill ring entries could not be published.
    #[error("cannot populate the fill ring: {0}")]
    Prefill(#[source] RingError),

    /// Binding the socket to an interface queue failed.
    #[error("cannot bind to interface {if_index} queue {queue_id}: {source}")]
    Bind {
        if_index: u32,
        queue_id: u32,
        #[source]
        source: io::Error,
    },
}

impl SetupError {
    /// The state the session was trying to reach when the error occurred.
    pub fn stage(&self) -> SessionState {
        match self {
            SetupError::Channel(_) => SessionState::ChannelOpen,
            SetupError::Allocation { .. } | SetupError::Registration(_) => {
                SessionState::UmemRegistered
            }
            SetupError::Configuration {
                ring: RingKind::Fill | RingKind::Completion,
                ..
            } => SessionState::UmemRegistered,
            SetupError::Configuration { .. } => SessionState::RingsConfigured,
            SetupError::Mapping { .. } => SessionState::RingsMapped,
            SetupError::Ordering { attempted, .. } => *attempted,
            SetupError::Prefill(_) => SessionState::Ready,
            SetupError::Bind { .. } => SessionState::Bound,
        }
    }

    /// The OS error code behind the failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SetupError::Channel(e) | SetupError::Registration(e) => e.raw_os_error(),
            SetupError::Allocation { source, .. }
            | SetupError::Configuration { source, .. }
            | SetupError::Mapping { source, .. }
            | SetupError::Bind { source, .. } => source.raw_os_error(),
            SetupError::Prefill(RingError::Io(e)) => e.raw_os_error(),
            SetupError::Ordering { .. } | SetupError::Prefill(_) => None,
        }
    }
}

/// A failure of a ring or frame operation on the data path.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// No free slot in a producer ring.
    #[error("ring is full")]
    RingFull,
    /// Every frame of the pool is currently in use.
    #[error("no free frame in the pool")]
    NoFreeFrame,
    /// The payload does not fit in a frame.
    #[error("length {0} does not fit in a frame")]
    InvalidLength(usize),
    /// The address is outside the frame pool.
    #[error("address {0:#x} is outside the frame pool")]
    InvalidAddress(u64),
    /// More slots were committed than are available.
    #[error("cannot commit {requested} slots, only {available} available")]
    Overcommit { requested: u32, available: u32 },
    /// A producer operation on a ring this process consumes from, or the
    /// other way round.
    #[error("{kind:?} ring is not used in this direction")]
    WrongDirection { kind: RingKind },
    /// A frame changed hands in a way its current owner does not allow.
    #[error("frame {addr:#x} is {actual:?}, expected {expected:?}")]
    FrameOwnership {
        addr: u64,
        expected: FrameState,
        actual: FrameState,
    },
    /// The kernel wakeup or poll syscall failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
