//! # AF_XDP Channel Endpoint
//!
//! ## Purpose
//!
//! The channel is the only place where this crate talks to the kernel: socket
//! creation, `SOL_XDP` socket options, ring mappings, binding, wakeups and
//! polling. The `Channel` trait captures that surface so the ring and session
//! logic above it does not care who sits on the other side.
//!
//! ## Main components
//!
//! - `Channel`: the socket-option boundary.
//! - `XdpChannel`: a raw `AF_XDP` socket implementing it.

use std::mem::size_of;
use std::os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd, RawFd};
use std::{io, ptr};

use crate::mmap::OwnedMmap;
use crate::ring::RingKind;

/// Operations the setup stages and the data path need from the peer.
pub trait Channel {
    /// The endpoint's file descriptor.
    fn raw_fd(&self) -> RawFd;

    /// Registers the frame pool (`XDP_UMEM_REG`).
    fn register_umem(&self, reg: &libc::xdp_umem_reg) -> io::Result<()>;

    /// Sets the depth of one ring.
    fn set_ring_size(&self, kind: RingKind, depth: u32) -> io::Result<()>;

    /// Reads the producer/consumer/desc/flags offsets of all four rings.
    fn mmap_offsets(&self) -> io::Result<libc::xdp_mmap_offsets>;

    /// Maps `size` bytes of ring memory for `kind`.
    fn map_ring(&self, kind: RingKind, size: usize) -> io::Result<OwnedMmap>;

    /// Binds the endpoint to an interface queue.
    fn bind(&self, addr: &libc::sockaddr_xdp) -> io::Result<()>;

    /// Nudges the peer to process the tx ring.
    fn wakeup(&self) -> io::Result<()>;

    /// Waits for `events` on the endpoint, returning the reported `revents`.
    /// A negative timeout waits forever.
    fn poll(&self, events: libc::c_short, timeout_ms: libc::c_int) -> io::Result<libc::c_short>;
}

/// A raw `AF_XDP` socket.
#[derive(Debug)]
pub struct XdpChannel {
    fd: OwnedFd,
}

impl XdpChannel {
    /// Creates the socket (`socket(AF_XDP, SOCK_RAW | SOCK_CLOEXEC, 0)`).
    pub fn open() -> io::Result<Self> {
        let fd = unsafe {
            let fd = libc::socket(libc::AF_XDP, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            OwnedFd::from_raw_fd(fd)
        };
        Ok(XdpChannel { fd })
    }

    fn setsockopt<V>(&self, name: libc::c_int, value: &V) -> io::Result<()> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_XDP,
                name,
                value as *const V as *const libc::c_void,
                size_of::<V>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Channel for XdpChannel {
    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn register_umem(&self, reg: &libc::xdp_umem_reg) -> io::Result<()> {
        self.setsockopt(libc::XDP_UMEM_REG, reg)
    }

    fn set_ring_size(&self, kind: RingKind, depth: u32) -> io::Result<()> {
        self.setsockopt(kind.sockopt(), &(depth as libc::c_int))
    }

    fn mmap_offsets(&self) -> io::Result<libc::xdp_mmap_offsets> {
        let mut offsets: libc::xdp_mmap_offsets = unsafe { std::mem::zeroed() };
        let mut optlen = size_of::<libc::xdp_mmap_offsets>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_XDP,
                libc::XDP_MMAP_OFFSETS,
                &mut offsets as *mut _ as *mut libc::c_void,
                &mut optlen,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(offsets)
    }

    fn map_ring(&self, kind: RingKind, size: usize) -> io::Result<OwnedMmap> {
        OwnedMmap::shared(self.fd.as_raw_fd(), size, kind.pgoff())
    }

    fn bind(&self, addr: &libc::sockaddr_xdp) -> io::Result<()> {
        let ret = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                addr as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_xdp>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn wakeup(&self) -> io::Result<()> {
        let ret = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                ptr::null(),
                0,
                libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
                ptr::null(),
                0,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn poll(&self, events: libc::c_short, timeout_ms: libc::c_int) -> io::Result<libc::c_short> {
        let mut fds = [libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events,
            revents: 0,
        }];
        loop {
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
            if ret >= 0 {
                return Ok(fds[0].revents);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}
