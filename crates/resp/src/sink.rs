/// Named callbacks the parser drives as it recognizes tokens.
///
/// A single concrete implementation (the dispatcher's argument
/// assembler, or a replica's handshake-reply reader) keeps the parser
/// itself unit-testable against a mock sink.
pub trait EventSink {
    fn begin_array(&mut self, len: i64);
    fn end_array(&mut self);
    fn begin_bulk_string(&mut self, len: i64);
    fn end_bulk_string(&mut self);
    fn begin_simple_string(&mut self);
    fn end_simple_string(&mut self);
    fn begin_error(&mut self);
    fn end_error(&mut self);
    fn begin_integer(&mut self);
    fn end_integer(&mut self);
    /// Fragment of a simple-string/error/integer line or bulk-string
    /// payload. May be called more than once for one bulk string when
    /// it spans multiple `feed` calls.
    fn chars(&mut self, data: &[u8]);
}
