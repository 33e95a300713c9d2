use thiserror::Error;

/// Errors produced by [`crate::Store`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The key holds a value of a kind that doesn't support the requested
    /// operation (e.g. `LPUSH` against a string).
    #[error("Operation against a key holding the wrong kind of value")]
    TypeMismatch,
    /// `INCR`/`DECR` against a string that isn't a base-10 `i64`.
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    /// `INCR`/`DECR` would overflow `i64`.
    #[error("increment or decrement would overflow")]
    IncrementOverflow,
}
