//! Incremental push-parser for the inbound wire grammar (spec §4.4).
//!
//! [`Parser::feed`] consumes as much of its input as forms complete
//! tokens, emits events to an [`EventSink`], and returns how many bytes
//! it consumed. Any bytes not consumed (because a token is still
//! incomplete) are *not* left for redelivery — the parser instead keeps
//! its own scratch state (`line_buf`, `bulk_remaining`, a frame stack)
//! so a caller only ever needs to hand it newly-arrived bytes, never
//! replay old ones. Feeding the same logical stream split at any byte
//! boundary, across any number of `feed` calls, yields the same event
//! sequence as feeding it in one call.

use crate::error::RespError;
use crate::sink::EventSink;

const MAX_DEPTH: usize = 32;

#[derive(Clone, Copy)]
enum LinePurpose {
    SimpleString,
    Error,
    IntegerValue,
    BulkLength,
    ArrayLength,
    Inline,
}

enum State {
    AwaitingTypeByte,
    Line(LinePurpose),
    BulkBody,
    BulkTrailingCrlf,
}

enum StackFrame {
    Array { remaining: i64 },
}

pub struct Parser {
    state: State,
    stack: Vec<StackFrame>,
    line_buf: Vec<u8>,
    saw_cr: bool,
    bulk_remaining: i64,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingTypeByte,
            stack: Vec::new(),
            line_buf: Vec::new(),
            saw_cr: false,
            bulk_remaining: 0,
        }
    }

    /// Feeds `data` to the parser, driving `sink`. Returns the number of
    /// bytes of `data` consumed (always `data.len()` unless a
    /// [`RespError`] cuts parsing short, in which case the connection
    /// must be closed regardless of the partial count).
    pub fn feed(&mut self, sink: &mut dyn EventSink, data: &[u8]) -> Result<usize, RespError> {
        let mut pos = 0;
        loop {
            match self.state {
                State::AwaitingTypeByte => {
                    if pos >= data.len() {
                        break;
                    }
                    let b = data[pos];
                    pos += 1;
                    self.dispatch_type_byte(b);
                }
                State::Line(purpose) => {
                    if !self.consume_line(data, &mut pos) {
                        break;
                    }
                    self.finish_line(sink, purpose)?;
                }
                State::BulkBody => {
                    let available = data.len() - pos;
                    if available == 0 {
                        break;
                    }
                    let take = available.min(self.bulk_remaining as usize);
                    sink.chars(&data[pos..pos + take]);
                    pos += take;
                    self.bulk_remaining -= take as i64;
                    if self.bulk_remaining == 0 {
                        self.state = State::BulkTrailingCrlf;
                    } else {
                        break;
                    }
                }
                State::BulkTrailingCrlf => {
                    if data.len() - pos < 2 {
                        break;
                    }
                    if &data[pos..pos + 2] != b"\r\n" {
                        return Err(RespError::Framing(
                            "bulk string payload not followed by CRLF".into(),
                        ));
                    }
                    pos += 2;
                    sink.end_bulk_string();
                    self.state = State::AwaitingTypeByte;
                    self.complete_value(sink);
                }
            }
        }
        Ok(pos)
    }

    fn dispatch_type_byte(&mut self, b: u8) {
        self.line_buf.clear();
        self.saw_cr = false;
        self.state = match b {
            b'+' => State::Line(LinePurpose::SimpleString),
            b'-' => State::Line(LinePurpose::Error),
            b':' => State::Line(LinePurpose::IntegerValue),
            b'$' => State::Line(LinePurpose::BulkLength),
            b'*' => State::Line(LinePurpose::ArrayLength),
            other => {
                self.line_buf.push(other);
                State::Line(LinePurpose::Inline)
            }
        };
    }

    /// Accumulates bytes from `data[*pos..]` into `self.line_buf` until
    /// a CRLF is found (which is consumed but not stored). Returns
    /// whether a full line is now available.
    fn consume_line(&mut self, data: &[u8], pos: &mut usize) -> bool {
        while *pos < data.len() {
            let b = data[*pos];
            *pos += 1;
            if self.saw_cr {
                self.saw_cr = false;
                if b == b'\n' {
                    return true;
                }
                // A lone CR wasn't a line terminator; keep it as data
                // and reprocess this byte normally.
                self.line_buf.push(b'\r');
            }
            if b == b'\r' {
                self.saw_cr = true;
            } else {
                self.line_buf.push(b);
            }
        }
        false
    }

    fn finish_line(&mut self, sink: &mut dyn EventSink, purpose: LinePurpose) -> Result<(), RespError> {
        match purpose {
            LinePurpose::SimpleString => {
                sink.chars(&self.line_buf);
                sink.end_simple_string();
                self.line_buf.clear();
                self.state = State::AwaitingTypeByte;
                self.complete_value(sink);
            }
            LinePurpose::Error => {
                sink.chars(&self.line_buf);
                sink.end_error();
                self.line_buf.clear();
                self.state = State::AwaitingTypeByte;
                self.complete_value(sink);
            }
            LinePurpose::IntegerValue => {
                sink.chars(&self.line_buf);
                sink.end_integer();
                self.line_buf.clear();
                self.state = State::AwaitingTypeByte;
                self.complete_value(sink);
            }
            LinePurpose::BulkLength => {
                let n = parse_length(&self.line_buf)?;
                self.line_buf.clear();
                if n == -1 {
                    sink.begin_bulk_string(-1);
                    sink.end_bulk_string();
                    self.state = State::AwaitingTypeByte;
                    self.complete_value(sink);
                } else {
                    sink.begin_bulk_string(n);
                    self.bulk_remaining = n;
                    self.state = if n == 0 {
                        State::BulkTrailingCrlf
                    } else {
                        State::BulkBody
                    };
                }
            }
            LinePurpose::ArrayLength => {
                let n = parse_length(&self.line_buf)?;
                self.line_buf.clear();
                if n <= 0 {
                    sink.begin_array(n);
                    sink.end_array();
                    self.state = State::AwaitingTypeByte;
                    self.complete_value(sink);
                } else {
                    if self.stack.len() >= MAX_DEPTH {
                        return Err(RespError::Framing("array nesting exceeds maximum depth".into()));
                    }
                    sink.begin_array(n);
                    self.stack.push(StackFrame::Array { remaining: n });
                    self.state = State::AwaitingTypeByte;
                }
            }
            LinePurpose::Inline => {
                let tokens = tokenize_inline(&self.line_buf);
                self.line_buf.clear();
                sink.begin_array(tokens.len() as i64);
                for token in &tokens {
                    sink.begin_bulk_string(token.len() as i64);
                    sink.chars(token);
                    sink.end_bulk_string();
                }
                sink.end_array();
                self.state = State::AwaitingTypeByte;
                self.complete_value(sink);
            }
        }
        Ok(())
    }

    /// Bubbles a just-completed value up through any enclosing array
    /// frames, closing each one that has now seen all of its elements.
    fn complete_value(&mut self, sink: &mut dyn EventSink) {
        while let Some(StackFrame::Array { remaining }) = self.stack.last_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                sink.end_array();
                self.stack.pop();
            } else {
                return;
            }
        }
    }
}

fn parse_length(line: &[u8]) -> Result<i64, RespError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| RespError::Framing("length is not valid UTF-8".into()))?;
    text.parse::<i64>()
        .map_err(|_| RespError::Framing(format!("malformed length {text:?}")))
}

/// Tokenizes an inline-command line by whitespace, honoring single- and
/// double-quoted tokens. A quote that is never closed takes the
/// remainder of the line as one token (spec §4.4).
fn tokenize_inline(line: &[u8]) -> Vec<Vec<u8>> {
    let mut tokens = Vec::new();
    let mut i = 0;
    let n = line.len();
    while i < n {
        while i < n && (line[i] == b' ' || line[i] == b'\t') {
            i += 1;
        }
        if i >= n {
            break;
        }
        if line[i] == b'\'' || line[i] == b'"' {
            let quote = line[i];
            i += 1;
            let start = i;
            while i < n && line[i] != quote {
                i += 1;
            }
            if i < n {
                tokens.push(line[start..i].to_vec());
                i += 1;
            } else {
                tokens.push(line[start..n].to_vec());
                i = n;
            }
        } else {
            let start = i;
            while i < n && line[i] != b' ' && line[i] != b'\t' {
                i += 1;
            }
            tokens.push(line[start..i].to_vec());
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        BeginArray(i64),
        EndArray,
        BeginBulkString(i64),
        EndBulkString,
        BeginSimpleString,
        EndSimpleString,
        BeginError,
        EndError,
        BeginInteger,
        EndInteger,
        Chars(Vec<u8>),
    }

    #[derive(Default)]
    struct RecordingSink(Vec<Event>);

    impl EventSink for RecordingSink {
        fn begin_array(&mut self, len: i64) {
            self.0.push(Event::BeginArray(len));
        }
        fn end_array(&mut self) {
            self.0.push(Event::EndArray);
        }
        fn begin_bulk_string(&mut self, len: i64) {
            self.0.push(Event::BeginBulkString(len));
        }
        fn end_bulk_string(&mut self) {
            self.0.push(Event::EndBulkString);
        }
        fn begin_simple_string(&mut self) {
            self.0.push(Event::BeginSimpleString);
        }
        fn end_simple_string(&mut self) {
            self.0.push(Event::EndSimpleString);
        }
        fn begin_error(&mut self) {
            self.0.push(Event::BeginError);
        }
        fn end_error(&mut self) {
            self.0.push(Event::EndError);
        }
        fn begin_integer(&mut self) {
            self.0.push(Event::BeginInteger);
        }
        fn end_integer(&mut self) {
            self.0.push(Event::EndInteger);
        }
        fn chars(&mut self, data: &[u8]) {
            self.0.push(Event::Chars(data.to_vec()));
        }
    }

    fn run(input: &[u8]) -> Vec<Event> {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        let consumed = parser.feed(&mut sink, input).unwrap();
        assert_eq!(consumed, input.len());
        sink.0
    }

    #[test]
    fn parses_a_simple_array_of_bulk_strings() {
        let events = run(b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n");
        assert_eq!(
            events,
            vec![
                Event::BeginArray(2),
                Event::BeginBulkString(4),
                Event::Chars(b"ECHO".to_vec()),
                Event::EndBulkString,
                Event::BeginBulkString(5),
                Event::Chars(b"hello".to_vec()),
                Event::EndBulkString,
                Event::EndArray,
            ]
        );
    }

    #[test]
    fn null_bulk_string_and_null_array_emit_begin_end_with_no_body() {
        let events = run(b"$-1\r\n");
        assert_eq!(events, vec![Event::BeginBulkString(-1), Event::EndBulkString]);

        let events = run(b"*-1\r\n");
        assert_eq!(events, vec![Event::BeginArray(-1), Event::EndArray]);
    }

    #[test]
    fn empty_array_emits_begin_end_immediately() {
        let events = run(b"*0\r\n");
        assert_eq!(events, vec![Event::BeginArray(0), Event::EndArray]);
    }

    #[test]
    fn inline_command_is_tokenized_into_an_array_of_bulk_strings() {
        let events = run(b"PING\r\n");
        assert_eq!(
            events,
            vec![
                Event::BeginArray(1),
                Event::BeginBulkString(4),
                Event::Chars(b"PING".to_vec()),
                Event::EndBulkString,
                Event::EndArray,
            ]
        );
    }

    #[test]
    fn inline_quoting_handles_single_and_double_quotes() {
        for input in [
            &b"ECHO 'HELLO WORLD'\r\n"[..],
            &b"ECHO \"HELLO WORLD\"\r\n"[..],
        ] {
            let events = run(input);
            assert_eq!(
                events,
                vec![
                    Event::BeginArray(2),
                    Event::BeginBulkString(4),
                    Event::Chars(b"ECHO".to_vec()),
                    Event::EndBulkString,
                    Event::BeginBulkString(11),
                    Event::Chars(b"HELLO WORLD".to_vec()),
                    Event::EndBulkString,
                    Event::EndArray,
                ]
            );
        }
    }

    #[test]
    fn mismatched_quote_takes_the_remainder_of_the_line() {
        let events = run(b"SET k 'unterminated\r\n");
        assert_eq!(
            events,
            vec![
                Event::BeginArray(3),
                Event::BeginBulkString(3),
                Event::Chars(b"SET".to_vec()),
                Event::EndBulkString,
                Event::BeginBulkString(1),
                Event::Chars(b"k".to_vec()),
                Event::EndBulkString,
                Event::BeginBulkString(12),
                Event::Chars(b"unterminated".to_vec()),
                Event::EndBulkString,
                Event::EndArray,
            ]
        );
    }

    #[test]
    fn nested_arrays_bubble_completion_to_the_right_frame() {
        let events = run(b"*2\r\n*1\r\n$1\r\na\r\n$1\r\nb\r\n");
        assert_eq!(
            events,
            vec![
                Event::BeginArray(2),
                Event::BeginArray(1),
                Event::BeginBulkString(1),
                Event::Chars(b"a".to_vec()),
                Event::EndBulkString,
                Event::EndArray,
                Event::BeginBulkString(1),
                Event::Chars(b"b".to_vec()),
                Event::EndBulkString,
                Event::EndArray,
            ]
        );
    }

    #[test]
    fn feeding_split_across_any_boundary_yields_identical_events() {
        let whole = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n";
        let reference = run(whole);

        for split in 0..whole.len() {
            let (a, b) = whole.split_at(split);
            let mut parser = Parser::new();
            let mut sink = RecordingSink::default();
            let consumed_a = parser.feed(&mut sink, a).unwrap();
            assert_eq!(consumed_a, a.len());
            let consumed_b = parser.feed(&mut sink, b).unwrap();
            assert_eq!(consumed_b, b.len());
            assert_eq!(sink.0, reference, "split at {split} diverged");
        }
    }

    #[test]
    fn malformed_length_is_a_framing_error() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        assert!(parser.feed(&mut sink, b"$notanumber\r\n").is_err());
    }

    #[test]
    fn array_nesting_beyond_max_depth_is_rejected() {
        let mut parser = Parser::new();
        let mut sink = RecordingSink::default();
        let deep: Vec<u8> = "*1\r\n".repeat(MAX_DEPTH + 1).into_bytes();
        assert!(parser.feed(&mut sink, &deep).is_err());
    }
}
