use thiserror::Error;

/// Errors produced by [`crate::RingBuffer`].
#[derive(Debug, Error)]
pub enum RingBufferError {
    /// `capacity` was zero or not a multiple of the OS page size.
    #[error("capacity must be a positive multiple of the page size (got {0})")]
    InvalidSize(usize),

    /// `advance_read`/`advance_write` was asked to advance past the
    /// current readable/writable length.
    #[error("advance of {requested} bytes exceeds available {available} bytes")]
    Overflow { requested: usize, available: usize },

    /// The circular memory mapping could not be established.
    #[error("failed to map ring buffer backing memory: {0}")]
    Mapping(#[from] std::io::Error),
}
