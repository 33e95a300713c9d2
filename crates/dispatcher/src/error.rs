use thiserror::Error;

/// Errors surfaced by [`crate::dispatch`]. Every variant travels back to
/// the originating connection as a protocol error reply; none of them
/// close the connection or abort the server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    Arity(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    ValueRange,

    #[error("ERR expiration must be a non-negative integer")]
    NonNegativeExpiration,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    TypeMismatch,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    IncrementOverflow,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

impl DispatchError {
    /// The bytes after `-` in the protocol error reply, without the
    /// trailing CRLF (added by the writer).
    pub fn reply_message(&self) -> String {
        self.to_string()
    }
}

impl From<kvstore::StoreError> for DispatchError {
    fn from(e: kvstore::StoreError) -> Self {
        match e {
            kvstore::StoreError::TypeMismatch => DispatchError::TypeMismatch,
            kvstore::StoreError::NotAnInteger => DispatchError::NotAnInteger,
            kvstore::StoreError::IncrementOverflow => DispatchError::IncrementOverflow,
        }
    }
}
