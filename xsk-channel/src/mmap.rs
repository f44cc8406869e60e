//! # Owned Memory Mappings
//!
//! ## Purpose
//!
//! Every piece of memory this crate shares with the kernel is a memory mapping:
//! the frame pool backing the UMEM is an anonymous mapping, and each of the four
//! rings is a shared mapping of the AF_XDP socket at a kernel-defined page offset.
//! This module owns both kinds and guarantees that `munmap` runs exactly once.
//!
//! ## How it works
//!
//! `OwnedMmap` wraps the pointer/length pair returned by `libc::mmap` and unmaps it
//! in `Drop`. Anonymous mappings are rounded up to the page size (standard or 2 MiB
//! huge page). Huge pages are used automatically when `/proc/meminfo` reports free
//! 2 MiB pages and the caller did not decide explicitly.
//!
//! ## Main components
//!
//! - `OwnedMmap`: owner of one mapping.
//! - `page_size()`: the system page size.
//! - `get_hugepage_info()` / `parse_hugepage_info()`: huge page availability.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::fd::RawFd;
use std::{io, ptr};

/// Size of a 2 MiB huge page.
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// A memory-mapped region that is unmapped when dropped.
#[derive(Debug)]
pub struct OwnedMmap(
    /// Start of the mapping.
    pub(crate) *mut libc::c_void,
    /// Length of the mapping in bytes.
    pub(crate) usize,
);

// The mapping is plain memory; synchronisation with the kernel goes through the
// ring cursors, not through this handle.
unsafe impl Send for OwnedMmap {}

impl OwnedMmap {
    /// Allocates an anonymous, private, page-aligned region of at least `size` bytes.
    ///
    /// If `huge_page` is `None`, 2 MiB huge pages are used when the system has free
    /// ones. The returned length is `size` rounded up to the chosen page size.
    pub fn anonymous(size: usize, huge_page: Option<bool>) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty region",
            ));
        }
        let huge_tlb = match huge_page {
            Some(yes) => yes,
            None => match get_hugepage_info() {
                Ok(HugePageInfo {
                    free: Some(free),
                    size_kb: Some(2048),
                    ..
                }) => free > 0,
                _ => false,
            },
        };
        let page = if huge_tlb { HUGE_PAGE_SIZE } else { page_size() };
        let aligned_size = (size + page - 1) & !(page - 1);
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                aligned_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE
                    | libc::MAP_ANONYMOUS
                    | if huge_tlb {
                        libc::MAP_HUGETLB | libc::MAP_HUGE_2MB
                    } else {
                        0
                    },
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        log::debug!("mapped {aligned_size} bytes of anonymous memory (huge pages: {huge_tlb})");
        Ok(OwnedMmap(ptr, aligned_size))
    }

    /// Maps `size` bytes of `fd` at byte offset `pgoff`, shared and pre-faulted.
    ///
    /// This is how ring memory is brought into the process: the kernel exposes
    /// each ring behind a fixed "page offset" of the AF_XDP socket.
    pub fn shared(fd: RawFd, size: usize, pgoff: u64) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                pgoff as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(OwnedMmap(ptr, size))
    }

    /// Returns the start of the mapping.
    pub fn as_void_ptr(&self) -> *mut libc::c_void {
        self.0
    }

    pub fn as_u8_ptr(&self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// Returns the size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.1
    }

    pub fn is_empty(&self) -> bool {
        self.1 == 0
    }
}

impl Drop for OwnedMmap {
    fn drop(&mut self) {
        if self.0 != libc::MAP_FAILED && !self.0.is_null() {
            let res = unsafe { libc::munmap(self.0, self.1) };
            if res < 0 {
                log::error!("Failed to unmap memory: {}", io::Error::last_os_error());
            }
        }
    }
}

/// Returns the system page size.
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Huge page configuration as reported by `/proc/meminfo`.
#[derive(Debug, Default, PartialEq)]
pub struct HugePageInfo {
    /// The size of a huge page in kilobytes.
    pub size_kb: Option<u64>,
    /// The total number of huge pages configured in the system.
    pub total: Option<u64>,
    /// The number of free huge pages.
    pub free: Option<u64>,
}

/// Reads huge page information from `/proc/meminfo`.
pub fn get_hugepage_info() -> io::Result<HugePageInfo> {
    let file = File::open("/proc/meminfo")?;
    parse_hugepage_info(BufReader::new(file))
}

/// Parses `Hugepagesize`, `HugePages_Total` and `HugePages_Free` out of a
/// meminfo-formatted reader. Other keys are ignored.
pub fn parse_hugepage_info<R: BufRead>(reader: R) -> io::Result<HugePageInfo> {
    let mut info = HugePageInfo::default();
    for line in reader.lines() {
        let line = line?;
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_end_matches(" kB");
        let slot = match key.trim() {
            "Hugepagesize" => &mut info.size_kb,
            "HugePages_Total" => &mut info.total,
            "HugePages_Free" => &mut info.free,
            _ => continue,
        };
        *slot = Some(value.parse().map_err(io::Error::other)?);
    }
    Ok(info)
}
