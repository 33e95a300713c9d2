//! Circular virtual-memory mapping used by [`crate::RingBuffer`].
//!
//! A single physical region of `capacity` bytes (backed by an anonymous,
//! shared `memfd`) is mapped twice into adjacent virtual pages, so the
//! region is addressable as `2 * capacity` contiguous bytes: writes at
//! offset `capacity + k` land on the same physical page as offset `k`.
//! This is the same trick `vmap`-style ring buffers use to avoid ever
//! splitting a readable/writable view across the wrap point.

use crate::error::RingBufferError;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::ptr;

/// Owns the doubled mapping and unmaps/closes it on drop.
pub(crate) struct MirrorMap {
    base: *mut u8,
    capacity: usize,
}

// SAFETY: the mapping is plain shared memory; no aliased mutable access
// happens concurrently because `RingBuffer` is used from a single thread
// at a time (see module docs on `RingBuffer`).
unsafe impl Send for MirrorMap {}

impl MirrorMap {
    pub(crate) fn new(capacity: usize) -> Result<Self, RingBufferError> {
        // SAFETY: all arguments below are validated before use; failures
        // are checked and converted to `io::Error::last_os_error()`.
        unsafe {
            let name = CString::new("ringbuf").expect("no interior NUL");
            let fd = libc::memfd_create(name.as_ptr(), 0);
            if fd < 0 {
                return Err(RingBufferError::Mapping(std::io::Error::last_os_error()));
            }
            let result = Self::map_doubled(fd, capacity);
            libc::close(fd);
            result
        }
    }

    unsafe fn map_doubled(fd: RawFd, capacity: usize) -> Result<Self, RingBufferError> {
        if libc::ftruncate(fd, capacity as libc::off_t) != 0 {
            return Err(RingBufferError::Mapping(std::io::Error::last_os_error()));
        }

        // Reserve 2*capacity of contiguous address space first, so the two
        // file-backed mappings below are guaranteed adjacent.
        let reservation = libc::mmap(
            ptr::null_mut(),
            2 * capacity,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if reservation == libc::MAP_FAILED {
            return Err(RingBufferError::Mapping(std::io::Error::last_os_error()));
        }

        let low = libc::mmap(
            reservation,
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED,
            fd,
            0,
        );
        if low == libc::MAP_FAILED {
            libc::munmap(reservation, 2 * capacity);
            return Err(RingBufferError::Mapping(std::io::Error::last_os_error()));
        }

        let high = libc::mmap(
            reservation.add(capacity),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED,
            fd,
            0,
        );
        if high == libc::MAP_FAILED {
            libc::munmap(reservation, 2 * capacity);
            return Err(RingBufferError::Mapping(std::io::Error::last_os_error()));
        }

        Ok(Self {
            base: reservation.cast::<u8>(),
            capacity,
        })
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base
    }
}

impl Drop for MirrorMap {
    fn drop(&mut self) {
        // SAFETY: `base` was obtained from a matching mmap of `2*capacity`
        // bytes in `new`, and nothing else holds a pointer into it once
        // the owning `RingBuffer` is dropped.
        unsafe {
            libc::munmap(self.base.cast::<libc::c_void>(), 2 * self.capacity);
        }
    }
}
