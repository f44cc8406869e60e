//! # Frame Pool
//!
//! ## Purpose
//!
//! The frame pool is the UMEM: one page-aligned region split into equal frames
//! that both this process and the kernel read and write directly. Ring entries
//! refer to frames by their byte offset into the pool ("address").
//!
//! ## How it works
//!
//! Besides the memory, the pool keeps an ownership ledger with one state per
//! frame. A frame is `Free` (unused, ours), `Caller` (ours, being filled for
//! transmission or read after reception), `Fill` (offered on the fill ring) or
//! `Tx` (queued on the tx ring). Every ring crossing is a checked transition, so
//! an address can never be offered twice, and an address the kernel returns on
//! the rx or completion ring must be one it was actually given on the matching
//! ring.
//!
//! ## Main components
//!
//! - `FramePool`: memory, geometry, UMEM registration and the ledger.
//! - `FrameState`: ledger entry.

use std::{io, slice};

use crate::channel::Channel;
use crate::error::{RingError, SetupError};
use crate::mmap::{OwnedMmap, page_size};

/// Who may touch a frame right now.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameState {
    Free,
    Caller,
    Fill,
    Tx,
}

pub struct FramePool {
    mmap: OwnedMmap,
    frame_size: u32,
    frame_count: u32,
    headroom: u32,
    states: Vec<FrameState>,
    free: Vec<u64>,
}

impl FramePool {
    /// Allocates `frame_count` frames of `frame_size` bytes.
    ///
    /// The total size must be a multiple of the page size and `headroom` must
    /// leave room for data in every frame.
    pub fn allocate(
        frame_count: u32,
        frame_size: u32,
        headroom: u32,
        huge_page: Option<bool>,
    ) -> Result<Self, SetupError> {
        let size = (frame_count as usize).saturating_mul(frame_size as usize);
        let invalid = |msg: &str| SetupError::Allocation {
            size,
            source: io::Error::new(io::ErrorKind::InvalidInput, msg.to_owned()),
        };
        if frame_count == 0 || frame_size == 0 {
            return Err(invalid("frame count and frame size must be non-zero"));
        }
        if headroom >= frame_size {
            return Err(invalid("headroom must be smaller than the frame size"));
        }
        if size % page_size() != 0 {
            return Err(invalid("frame pool size must be a multiple of the page size"));
        }
        let mmap = OwnedMmap::anonymous(size, huge_page)
            .map_err(|source| SetupError::Allocation { size, source })?;
        log::debug!(
            "frame pool: {frame_count} frames of {frame_size} bytes at {:p}",
            mmap.as_void_ptr()
        );
        Ok(FramePool {
            mmap,
            frame_size,
            frame_count,
            headroom,
            states: vec![FrameState::Free; frame_count as usize],
            free: (0..frame_count as u64)
                .rev()
                .map(|i| i * frame_size as u64)
                .collect(),
        })
    }

    /// Registers the pool with the peer as its UMEM.
    pub fn register<C: Channel>(&self, channel: &C) -> Result<(), SetupError> {
        let reg = unsafe {
            libc::xdp_umem_reg {
                addr: self.mmap.as_void_ptr() as u64,
                len: self.len() as u64,
                chunk_size: self.frame_size,
                headroom: self.headroom,
                ..std::mem::zeroed()
            }
        };
        channel
            .register_umem(&reg)
            .map_err(SetupError::Registration)?;
        log::debug!("UMEM registered on fd {}", channel.raw_fd());
        Ok(())
    }

    /// Total size in bytes (`frame_count * frame_size`).
    pub fn len(&self) -> usize {
        self.frame_count as usize * self.frame_size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn headroom(&self) -> u32 {
        self.headroom
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_u8_ptr()
    }

    /// Address of the `index`-th frame.
    pub fn frame_addr(&self, index: u32) -> u64 {
        index as u64 * self.frame_size as u64
    }

    fn index_of(&self, addr: u64) -> Result<usize, RingError> {
        let index = addr / self.frame_size as u64;
        if index >= self.frame_count as u64 {
            return Err(RingError::InvalidAddress(addr));
        }
        Ok(index as usize)
    }

    /// Checks that `len` bytes at `addr` stay inside one frame.
    fn check_span(&self, addr: u64, len: usize) -> Result<(), RingError> {
        let index = self.index_of(addr)?;
        let end = (index as u64 + 1) * self.frame_size as u64;
        if addr.saturating_add(len as u64) > end {
            return Err(RingError::InvalidLength(len));
        }
        Ok(())
    }

    /// `len` bytes of frame data starting at `addr`.
    pub fn frame(&self, addr: u64, len: usize) -> Result<&[u8], RingError> {
        self.check_span(addr, len)?;
        Ok(unsafe { slice::from_raw_parts(self.mmap.as_u8_ptr().add(addr as usize), len) })
    }

    /// Writable `len` bytes of frame data starting at `addr`.
    pub fn frame_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], RingError> {
        self.check_span(addr, len)?;
        Ok(unsafe { slice::from_raw_parts_mut(self.mmap.as_u8_ptr().add(addr as usize), len) })
    }

    /// Ledger state of the frame containing `addr`.
    pub fn state(&self, addr: u64) -> Option<FrameState> {
        self.index_of(addr).ok().map(|i| self.states[i])
    }

    /// Number of frames nobody is using.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Takes a free frame, returning its address.
    pub fn take(&mut self) -> Option<u64> {
        let addr = self.free.pop()?;
        self.states[(addr / self.frame_size as u64) as usize] = FrameState::Caller;
        Some(addr)
    }

    /// The frame at `addr` is about to be offered on the fill ring.
    pub fn offer_for_fill(&mut self, addr: u64) -> Result<(), RingError> {
        self.transition(addr, FrameState::Caller, FrameState::Fill)
    }

    /// The frame at `addr` is about to be queued on the tx ring.
    pub fn submit_for_tx(&mut self, addr: u64) -> Result<(), RingError> {
        self.transition(addr, FrameState::Caller, FrameState::Tx)
    }

    /// The kernel delivered a packet into the frame containing `addr`.
    pub fn received(&mut self, addr: u64) -> Result<(), RingError> {
        self.transition(addr, FrameState::Fill, FrameState::Caller)
    }

    /// The kernel finished transmitting the frame at `addr`.
    pub fn completed(&mut self, addr: u64) -> Result<(), RingError> {
        self.transition(addr, FrameState::Tx, FrameState::Caller)
    }

    /// Puts a frame the caller holds back on the free list.
    pub fn release(&mut self, addr: u64) -> Result<(), RingError> {
        self.transition(addr, FrameState::Caller, FrameState::Free)?;
        self.free.push(addr - addr % self.frame_size as u64);
        Ok(())
    }

    fn transition(&mut self, addr: u64, from: FrameState, to: FrameState) -> Result<(), RingError> {
        let index = self.index_of(addr)?;
        if self.states[index] != from {
            return Err(RingError::FrameOwnership {
                addr,
                expected: from,
                actual: self.states[index],
            });
        }
        self.states[index] = to;
        Ok(())
    }
}
