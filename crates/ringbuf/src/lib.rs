//! Fixed-capacity byte ring buffer with contiguous readable/writable views.
//!
//! [`RingBuffer`] exposes its readable and writable regions as single
//! contiguous slices regardless of where the logical wrap point currently
//! falls, so a caller can hand a pointer+length straight to a socket
//! `read`/`write` or to a streaming codec without copying. The backing
//! storage is a single physical page range mapped twice into adjacent
//! virtual pages (see [`mapping`]) so indexing past the logical capacity
//! transparently continues into the mirror.
//!
//! Unlike [the lock-free SPSC ring this crate's sibling workspace member
//! builds](https://docs.rs/ringmpsc-rs), this buffer has exactly one
//! reader and one writer *on the same thread* (an event loop's single
//! connection), so the indices are plain `u64` fields rather than
//! cache-line-padded atomics.

#[cfg(not(unix))]
compile_error!("ringbuf requires an anonymous shared-memory mapping primitive (memfd_create); only unix targets are supported");

mod error;
mod mapping;

pub use error::RingBufferError;

use mapping::MirrorMap;
use std::slice;

/// Returns the OS page size, used to validate [`RingBuffer::new`]'s capacity.
/// Public so callers can size buffers without hard-coding a page size.
pub fn page_size() -> usize {
    // SAFETY: `sysconf` with `_SC_PAGESIZE` never fails on a sane system;
    // a negative return would indicate a corrupt libc, not a recoverable
    // runtime condition.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).expect("sysconf(_SC_PAGESIZE) returned a negative size")
}

/// A fixed-capacity byte queue whose readable and writable regions are
/// each a single contiguous slice.
///
/// Invariants: `read_index <= write_index`, and
/// `write_index - read_index <= capacity` at all times. Both indices are
/// monotonically increasing `u64` counters; wrapping into the physical
/// buffer happens only inside the view accessors (`readable`/`writable`).
pub struct RingBuffer {
    map: MirrorMap,
    capacity: usize,
    read_index: u64,
    write_index: u64,
}

impl RingBuffer {
    /// Creates a ring buffer of `capacity` bytes. `capacity` must be a
    /// positive multiple of the OS page size.
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        let page = page_size();
        if capacity == 0 || capacity % page != 0 {
            return Err(RingBufferError::InvalidSize(capacity));
        }
        Ok(Self {
            map: MirrorMap::new(capacity)?,
            capacity,
            read_index: 0,
            write_index: 0,
        })
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently available to read.
    #[inline]
    pub fn readable_len(&self) -> usize {
        (self.write_index - self.read_index) as usize
    }

    /// Number of bytes currently available to write.
    #[inline]
    pub fn writable_len(&self) -> usize {
        self.capacity - self.readable_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_index == self.write_index
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.readable_len() == self.capacity
    }

    /// The current readable region as a single contiguous slice.
    pub fn readable(&self) -> &[u8] {
        let start = (self.read_index % self.capacity as u64) as usize;
        let len = self.readable_len();
        // SAFETY: `start + len <= 2*capacity` because `len <= capacity`
        // and `start < capacity`; the mirror mapping makes that whole
        // range valid, initialized memory we own exclusively.
        unsafe { slice::from_raw_parts(self.map.base_ptr().add(start), len) }
    }

    /// The current writable region as a single contiguous slice.
    pub fn writable(&mut self) -> &mut [u8] {
        let start = (self.write_index % self.capacity as u64) as usize;
        let len = self.writable_len();
        // SAFETY: see `readable`; we hold `&mut self` so no other view
        // into the buffer can be alive at the same time.
        unsafe { slice::from_raw_parts_mut(self.map.base_ptr().add(start), len) }
    }

    /// Marks `n` bytes of the current readable view as consumed.
    pub fn advance_read(&mut self, n: usize) -> Result<(), RingBufferError> {
        let available = self.readable_len();
        if n > available {
            return Err(RingBufferError::Overflow {
                requested: n,
                available,
            });
        }
        self.read_index += n as u64;
        Ok(())
    }

    /// Marks `n` bytes of the current writable view as produced.
    pub fn advance_write(&mut self, n: usize) -> Result<(), RingBufferError> {
        let available = self.writable_len();
        if n > available {
            return Err(RingBufferError::Overflow {
                requested: n,
                available,
            });
        }
        self.write_index += n as u64;
        Ok(())
    }

    /// Copies `data` into the writable region and advances past it.
    /// Returns the number of bytes actually written (may be less than
    /// `data.len()` if the buffer doesn't have enough room).
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.writable_len());
        self.writable()[..n].copy_from_slice(&data[..n]);
        self.advance_write(n).expect("n <= writable_len by construction");
        n
    }

    /// Copies up to `out.len()` bytes out of the readable region and
    /// advances past them. Returns the number of bytes actually read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.readable_len());
        out[..n].copy_from_slice(&self.readable()[..n]);
        self.advance_read(n).expect("n <= readable_len by construction");
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_capacity() -> usize {
        page_size()
    }

    #[test]
    fn rejects_non_page_multiple_capacity() {
        assert!(matches!(
            RingBuffer::new(1),
            Err(RingBufferError::InvalidSize(1))
        ));
        assert!(matches!(
            RingBuffer::new(0),
            Err(RingBufferError::InvalidSize(0))
        ));
    }

    #[test]
    fn capacity_equals_sum_of_views() {
        let cap = small_capacity();
        let rb = RingBuffer::new(cap).unwrap();
        assert_eq!(rb.readable_len() + rb.writable_len(), cap);
        assert!(rb.is_empty());
        assert!(!rb.is_full());
    }

    #[test]
    fn write_then_read_round_trips_across_many_wraps() {
        let cap = small_capacity();
        let mut rb = RingBuffer::new(cap).unwrap();
        let chunk = vec![0x5Au8; cap / 8];
        let mut out = vec![0u8; chunk.len()];

        for _ in 0..100 {
            let written = rb.write(&chunk);
            assert_eq!(written, chunk.len());
            let read = rb.read(&mut out);
            assert_eq!(read, chunk.len());
            assert_eq!(out, chunk);
        }
        assert!(rb.is_empty());
    }

    #[test]
    fn readable_and_writable_views_are_always_contiguous_across_the_wrap() {
        let cap = small_capacity();
        let mut rb = RingBuffer::new(cap).unwrap();

        // Push the write index right up to the wrap boundary.
        let near_edge = cap - 4;
        rb.write(&vec![1u8; near_edge]);
        rb.read(&mut vec![0u8; near_edge]);
        assert!(rb.is_empty());

        // Now write 16 bytes: must straddle the physical end of the
        // buffer, yet `writable()`/`readable()` must each return one
        // contiguous slice.
        let straddling = vec![7u8; 16];
        let written = rb.write(&straddling);
        assert_eq!(written, 16);
        assert_eq!(rb.readable(), &straddling[..]);
    }

    #[test]
    fn advance_read_past_available_overflows() {
        let cap = small_capacity();
        let mut rb = RingBuffer::new(cap).unwrap();
        rb.write(&[1, 2, 3]);
        assert!(matches!(
            rb.advance_read(4),
            Err(RingBufferError::Overflow {
                requested: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn advance_write_past_capacity_overflows() {
        let cap = small_capacity();
        let mut rb = RingBuffer::new(cap).unwrap();
        assert!(matches!(
            rb.advance_write(cap + 1),
            Err(RingBufferError::Overflow { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn sequential_write_read_preserves_bytes(
            ops in proptest::collection::vec((proptest::bool::ANY, 1usize..=200), 1..200)
        ) {
            let cap = small_capacity();
            let mut rb = RingBuffer::new(cap).unwrap();
            let mut model = std::collections::VecDeque::new();
            let mut produced = Vec::new();
            let mut consumed = Vec::new();

            for (do_write, n) in ops {
                if do_write {
                    let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
                    let written = rb.write(&data);
                    for &b in &data[..written] {
                        model.push_back(b);
                        produced.push(b);
                    }
                } else {
                    let mut out = vec![0u8; n];
                    let read = rb.read(&mut out);
                    for &b in &out[..read] {
                        consumed.push(b);
                        assert_eq!(model.pop_front(), Some(b));
                    }
                }
                prop_assert_eq!(rb.readable_len() + rb.writable_len(), cap);
            }
        }
    }
}
