//! # AF_XDP Rings
//!
//! ## Purpose
//!
//! A ring is a single-producer/single-consumer circular buffer living in memory
//! shared with the kernel. AF_XDP uses four of them: the fill and completion rings
//! carry bare frame addresses (`u64`), the rx and tx rings carry `XdpDesc`
//! descriptors. On the fill and tx rings this process is the producer; on the
//! completion and rx rings it is the consumer.
//!
//! ## How it works
//!
//! Both cursors are free-running `u32` values; a slot index is `cursor & mask`.
//! The local side keeps a cached copy of both cursors and only reads the peer's
//! shared cell when the cached view cannot satisfy a request. Slot writes are
//! published with a release store of the producer cell, and the consumer reads
//! the producer cell with acquire ordering before touching any slot.
//!
//! Producer rings start with `cached_cons = consumer + size`, so the first
//! reservation on a fresh ring succeeds without reading the consumer cell.
//!
//! ## Main components
//!
//! - `Ring<T>`: a mapped ring and its cached cursors.
//! - `RingKind`: which of the four rings, with its socket option and page offset.
//! - `XdpDesc`: the rx/tx descriptor, layout-compatible with `struct xdp_desc`.

use std::io;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::channel::Channel;
use crate::error::{RingError, SetupError};
use crate::mmap::OwnedMmap;

/// Default depth of each of the four rings.
pub const DEFAULT_RING_DEPTH: u32 = 1024;

/// Raw pointers into a mapped ring.
pub struct RingMmap<T> {
    pub(crate) mmap: OwnedMmap,
    pub(crate) producer: *mut AtomicU32,
    pub(crate) consumer: *mut AtomicU32,
    pub(crate) flags: *mut AtomicU32,
    pub(crate) desc: *mut T,
}

/// Descriptor carried by the rx and tx rings.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XdpDesc {
    /// Offset of the packet data inside the frame pool.
    pub addr: u64,
    /// Length of the packet data.
    pub len: u32,
    pub options: u32,
}

static_assertions::assert_eq_size!(XdpDesc, libc::xdp_desc);
static_assertions::assert_eq_align!(XdpDesc, libc::xdp_desc);

impl XdpDesc {
    pub fn new(addr: u64, len: u32, options: u32) -> Self {
        XdpDesc { addr, len, options }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u64 {}
    impl Sealed for super::XdpDesc {}
}

/// Slot types a ring can carry: `u64` frame addresses or `XdpDesc` descriptors.
pub trait Slot: Copy + sealed::Sealed {
    /// `true` for rings of descriptors (rx, tx).
    const DESCRIPTOR: bool;
}

impl Slot for u64 {
    const DESCRIPTOR: bool = false;
}

impl Slot for XdpDesc {
    const DESCRIPTOR: bool = true;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RingKind {
    Fill,
    Completion,
    Rx,
    Tx,
}

impl RingKind {
    pub const ALL: [RingKind; 4] = [
        RingKind::Fill,
        RingKind::Completion,
        RingKind::Rx,
        RingKind::Tx,
    ];

    /// The `SOL_XDP` socket option that sets this ring's depth.
    pub fn sockopt(self) -> libc::c_int {
        match self {
            RingKind::Fill => libc::XDP_UMEM_FILL_RING,
            RingKind::Completion => libc::XDP_UMEM_COMPLETION_RING,
            RingKind::Rx => libc::XDP_RX_RING,
            RingKind::Tx => libc::XDP_TX_RING,
        }
    }

    /// The mmap offset at which the kernel exposes this ring.
    pub fn pgoff(self) -> u64 {
        match self {
            RingKind::Fill => libc::XDP_UMEM_PGOFF_FILL_RING as u64,
            RingKind::Completion => libc::XDP_UMEM_PGOFF_COMPLETION_RING as u64,
            RingKind::Rx => libc::XDP_PGOFF_RX_RING as u64,
            RingKind::Tx => libc::XDP_PGOFF_TX_RING as u64,
        }
    }

    /// `true` if this process produces into the ring (fill, tx).
    pub fn is_producer(self) -> bool {
        matches!(self, RingKind::Fill | RingKind::Tx)
    }

    /// `true` if the ring carries `XdpDesc` rather than bare addresses.
    pub fn carries_descriptors(self) -> bool {
        matches!(self, RingKind::Rx | RingKind::Tx)
    }

    pub fn offsets(self, offsets: &libc::xdp_mmap_offsets) -> &libc::xdp_ring_offset {
        match self {
            RingKind::Fill => &offsets.fr,
            RingKind::Completion => &offsets.cr,
            RingKind::Rx => &offsets.rx,
            RingKind::Tx => &offsets.tx,
        }
    }

    /// Asks the peer to allocate this ring with `depth` slots.
    ///
    /// The depth is validated locally first: zero or a non-power-of-two never
    /// reaches the kernel.
    pub fn configure_depth<C: Channel>(self, channel: &C, depth: u32) -> Result<(), SetupError> {
        if !depth.is_power_of_two() {
            return Err(SetupError::Configuration {
                ring: self,
                depth,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "ring depth must be a non-zero power of two",
                ),
            });
        }
        channel
            .set_ring_size(self, depth)
            .map_err(|source| SetupError::Configuration {
                ring: self,
                depth,
                source,
            })?;
        log::debug!("{self:?} ring configured with {depth} slots");
        Ok(())
    }

    /// Maps this ring using offsets already obtained from the peer.
    pub fn mmap<T: Slot, C: Channel>(
        self,
        channel: &C,
        offsets: &libc::xdp_mmap_offsets,
        depth: u32,
    ) -> Result<Ring<T>, SetupError> {
        let mapping_error = |source| SetupError::Mapping { ring: self, source };
        if T::DESCRIPTOR != self.carries_descriptors() {
            return Err(mapping_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "slot type does not match ring kind",
            )));
        }
        if !depth.is_power_of_two() {
            return Err(mapping_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ring depth must be a non-zero power of two",
            )));
        }
        let offs = self.offsets(offsets);
        let size = (offs.desc as usize).saturating_add(depth as usize * size_of::<T>());
        let mmap = channel.map_ring(self, size).map_err(mapping_error)?;
        if mmap.len() < size {
            return Err(mapping_error(io::Error::new(
                io::ErrorKind::InvalidData,
                "ring mapping is shorter than requested",
            )));
        }
        log::debug!("{self:?} ring mapped at {:p} ({size} bytes)", mmap.as_void_ptr());
        Ok(Ring::from_mmap(self, depth, mmap, offs))
    }
}

/// One mapped ring and the local view of its cursors.
pub struct Ring<T> {
    pub(crate) mmap: RingMmap<T>,
    kind: RingKind,
    size: u32,
    mask: u32,
    cached_prod: u32,
    cached_cons: u32,
}

// Only one thread may drive the local side of a ring; `&mut self` on every
// cursor-moving operation makes that a compile-time property.
unsafe impl<T: Send> Send for Ring<T> {}

impl<T: Slot> Ring<T> {
    /// Queries the layout offsets and maps `kind` with `depth` slots.
    pub fn map<C: Channel>(channel: &C, kind: RingKind, depth: u32) -> Result<Self, SetupError> {
        let offsets = channel
            .mmap_offsets()
            .map_err(|source| SetupError::Mapping { ring: kind, source })?;
        kind.mmap(channel, &offsets, depth)
    }

    fn from_mmap(kind: RingKind, size: u32, mmap: OwnedMmap, offs: &libc::xdp_ring_offset) -> Self {
        let base = mmap.as_u8_ptr();
        let (producer, consumer, flags, desc) = unsafe {
            (
                base.add(offs.producer as usize) as *mut AtomicU32,
                base.add(offs.consumer as usize) as *mut AtomicU32,
                base.add(offs.flags as usize) as *mut AtomicU32,
                base.add(offs.desc as usize) as *mut T,
            )
        };
        let mut ring = Ring {
            mmap: RingMmap {
                mmap,
                producer,
                consumer,
                flags,
                desc,
            },
            kind,
            size,
            mask: size - 1,
            cached_prod: 0,
            cached_cons: 0,
        };
        ring.cached_prod = ring.producer();
        ring.cached_cons = if kind.is_producer() {
            ring.consumer().wrapping_add(size)
        } else {
            ring.consumer()
        };
        ring
    }

    pub fn kind(&self) -> RingKind {
        self.kind
    }

    /// Number of slots.
    pub fn depth(&self) -> u32 {
        self.size
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Start of the ring's mapping.
    pub fn map_addr(&self) -> *const libc::c_void {
        self.mmap.mmap.as_void_ptr()
    }

    fn producer(&self) -> u32 {
        unsafe { (*self.mmap.producer).load(Ordering::Acquire) }
    }

    fn consumer(&self) -> u32 {
        unsafe { (*self.mmap.consumer).load(Ordering::Acquire) }
    }

    /// Reads both shared cursors as `(producer, consumer)`.
    pub fn cursors(&self) -> (u32, u32) {
        let consumer = self.consumer();
        (self.producer(), consumer)
    }

    /// `true` if the kernel asked to be woken up for this ring.
    pub fn needs_wakeup(&self) -> bool {
        unsafe { (*self.mmap.flags).load(Ordering::Relaxed) & libc::XDP_RING_NEED_WAKEUP != 0 }
    }

    fn slot(&self, cursor: u32) -> *mut T {
        unsafe { self.mmap.desc.add((cursor & self.mask) as usize) }
    }

    fn require_producer(&self) -> Result<(), RingError> {
        if self.kind.is_producer() {
            Ok(())
        } else {
            Err(RingError::WrongDirection { kind: self.kind })
        }
    }

    fn require_consumer(&self) -> Result<(), RingError> {
        if self.kind.is_producer() {
            Err(RingError::WrongDirection { kind: self.kind })
        } else {
            Ok(())
        }
    }

    /// Returns how many of `count` slots can be written now.
    ///
    /// The consumer cell is read only if the cached view has fewer than
    /// `count` free slots. Always 0 on a ring this process consumes from.
    pub fn reserve_producer_slots(&mut self, count: u32) -> u32 {
        if !self.kind.is_producer() {
            return 0;
        }
        let mut free = self.cached_cons.wrapping_sub(self.cached_prod);
        if free < count {
            self.cached_cons = self.consumer().wrapping_add(self.size);
            free = self.cached_cons.wrapping_sub(self.cached_prod);
        }
        free.min(count)
    }

    /// The `index`-th slot after the local producer cursor.
    pub fn producer_slot_mut(&mut self, index: u32) -> Result<&mut T, RingError> {
        self.require_producer()?;
        let available = self.cached_cons.wrapping_sub(self.cached_prod);
        if index >= available {
            return Err(RingError::Overcommit {
                requested: index.saturating_add(1),
                available,
            });
        }
        Ok(unsafe { &mut *self.slot(self.cached_prod.wrapping_add(index)) })
    }

    /// Publishes `count` written slots to the peer.
    pub fn commit_produced(&mut self, count: u32) -> Result<(), RingError> {
        self.require_producer()?;
        let available = self.cached_cons.wrapping_sub(self.cached_prod);
        if count > available {
            return Err(RingError::Overcommit {
                requested: count,
                available,
            });
        }
        self.cached_prod = self.cached_prod.wrapping_add(count);
        unsafe { (*self.mmap.producer).store(self.cached_prod, Ordering::Release) };
        Ok(())
    }

    /// Returns how many of `count` entries can be read now.
    ///
    /// The producer cell is read only if the cached view holds fewer than
    /// `count` entries. Always 0 on a ring this process produces into.
    pub fn reserve_consumer_slots(&mut self, count: u32) -> u32 {
        if self.kind.is_producer() {
            return 0;
        }
        let mut entries = self.cached_prod.wrapping_sub(self.cached_cons);
        if entries < count {
            self.cached_prod = self.producer();
            entries = self.cached_prod.wrapping_sub(self.cached_cons);
        }
        entries.min(count)
    }

    /// The `index`-th entry after the local consumer cursor.
    pub fn consumer_slot(&self, index: u32) -> Result<T, RingError> {
        self.require_consumer()?;
        let available = self.cached_prod.wrapping_sub(self.cached_cons);
        if index >= available {
            return Err(RingError::Overcommit {
                requested: index.saturating_add(1),
                available,
            });
        }
        Ok(unsafe { *self.slot(self.cached_cons.wrapping_add(index)) })
    }

    /// Hands `count` consumed slots back to the producer.
    pub fn commit_consumed(&mut self, count: u32) -> Result<(), RingError> {
        self.require_consumer()?;
        let available = self.cached_prod.wrapping_sub(self.cached_cons);
        if count > available {
            return Err(RingError::Overcommit {
                requested: count,
                available,
            });
        }
        self.cached_cons = self.cached_cons.wrapping_add(count);
        unsafe { (*self.mmap.consumer).store(self.cached_cons, Ordering::Release) };
        Ok(())
    }
}
