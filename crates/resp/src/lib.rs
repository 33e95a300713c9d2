//! Streaming codec for the client-facing wire protocol: an array of
//! bulk strings with an inline-command fallback on the read side (spec
//! §4.4), and a handful of reply encoders on the write side.

mod error;
mod parser;
mod sink;
mod writer;

pub use error::RespError;
pub use parser::Parser;
pub use sink::EventSink;
pub use writer::{array_header, bulk_string, bulk_string_array, error, integer, push, simple_string};
