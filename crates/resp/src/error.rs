use thiserror::Error;

/// Errors produced by the incremental parser. Per spec, any of these is
/// fatal for the connection: the parser does not attempt to resynchronize.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RespError {
    #[error("malformed protocol framing: {0}")]
    Framing(String),
}
