//! Per-connection state: buffers, parser, role, and the little event
//! sink that turns parser callbacks into complete command argument
//! vectors (spec §3, "Entity: Connection").

use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;
use mio::Token;
use resp::{EventSink, Parser};
use ringbuf::RingBuffer;
use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::replica_link::HandshakeState;

/// What a connection is currently being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnRole {
    /// A regular client: request, reply, repeat.
    Regular,
    /// A replica that completed `PSYNC`; only receives propagated
    /// writes and occasional `REPLCONF GETACK`.
    Replica,
    /// This process's own link to its master, in replica mode.
    MasterLink,
}

/// Assembles [`resp::Parser`] events into complete command argument
/// vectors. Commands are always a flat array of bulk strings on the
/// wire (the inline fallback synthesizes the same shape), so nesting
/// below depth 1 is not expected; a deeper nested array is tolerated by
/// simply not contributing its elements to the enclosing command.
#[derive(Default)]
pub struct CommandSink {
    depth: usize,
    current: Vec<Bytes>,
    current_bulk: Option<BytesMut>,
    pub completed: VecDeque<Vec<Bytes>>,
}

impl EventSink for CommandSink {
    fn begin_array(&mut self, _len: i64) {
        if self.depth == 0 {
            self.current.clear();
        }
        self.depth += 1;
    }

    fn end_array(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.completed.push_back(std::mem::take(&mut self.current));
        }
    }

    fn begin_bulk_string(&mut self, len: i64) {
        self.current_bulk = if len >= 0 { Some(BytesMut::with_capacity(len as usize)) } else { None };
    }

    fn end_bulk_string(&mut self) {
        let bytes = self.current_bulk.take().map(BytesMut::freeze).unwrap_or_default();
        if self.depth >= 1 {
            self.current.push(bytes);
        }
    }

    fn begin_simple_string(&mut self) {}
    fn end_simple_string(&mut self) {}
    fn begin_error(&mut self) {}
    fn end_error(&mut self) {}
    fn begin_integer(&mut self) {}
    fn end_integer(&mut self) {}

    fn chars(&mut self, data: &[u8]) {
        if let Some(buf) = self.current_bulk.as_mut() {
            buf.extend_from_slice(data);
        }
    }
}

const INPUT_CAPACITY: usize = 64 * 1024;
const OUTPUT_CAPACITY: usize = 1024 * 1024;

pub struct Connection {
    pub stream: TcpStream,
    pub token: Token,
    pub role: ConnRole,
    pub input: RingBuffer,
    pub output: RingBuffer,
    output_backlog: VecDeque<u8>,
    pub parser: Parser,
    pub sink: CommandSink,
    pub wants_write: bool,
    pub handshake: Option<HandshakeState>,
}

impl Connection {
    pub fn new(stream: TcpStream, token: Token, role: ConnRole) -> io::Result<Self> {
        let page = ringbuf::page_size();
        Ok(Self {
            stream,
            token,
            role,
            input: RingBuffer::new(INPUT_CAPACITY.next_multiple_of(page))
                .map_err(|e| io::Error::other(e.to_string()))?,
            output: RingBuffer::new(OUTPUT_CAPACITY.next_multiple_of(page))
                .map_err(|e| io::Error::other(e.to_string()))?,
            output_backlog: VecDeque::new(),
            parser: Parser::new(),
            sink: CommandSink::default(),
            wants_write: false,
            handshake: None,
        })
    }

    /// Reads as much as is currently available (non-blocking) into the
    /// input buffer. Returns `Ok(true)` if the peer closed the
    /// connection (a zero-length read).
    pub fn read_available(&mut self) -> io::Result<bool> {
        loop {
            let writable = self.input.writable();
            if writable.is_empty() {
                return Ok(false);
            }
            match self.stream.read(writable) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    self.input
                        .advance_write(n)
                        .map_err(|e| io::Error::other(e.to_string()))?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Feeds every currently-readable input byte through the parser,
    /// advancing the read cursor by exactly what the parser consumed.
    pub fn pump_parser(&mut self) -> Result<(), resp::RespError> {
        let readable = self.input.readable();
        if readable.is_empty() {
            return Ok(());
        }
        let consumed = self.parser.feed(&mut self.sink, readable)?;
        self.input
            .advance_read(consumed)
            .expect("parser never reports consuming more than it was given");
        Ok(())
    }

    /// Queues `bytes` for output, overflowing into a backlog queue when
    /// they don't fit the ring buffer directly (e.g. a large snapshot
    /// transfer). Marks the connection as wanting a writable-readiness
    /// registration.
    pub fn queue_output(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let written = resp::push(&mut self.output, bytes);
        if written < bytes.len() {
            self.output_backlog.extend(&bytes[written..]);
        }
        self.wants_write = true;
    }

    fn pump_backlog(&mut self) {
        while !self.output_backlog.is_empty() && self.output.writable_len() > 0 {
            let take = self.output.writable_len().min(self.output_backlog.len());
            let chunk: Vec<u8> = self.output_backlog.drain(..take).collect();
            let written = self.output.write(&chunk);
            debug_assert_eq!(written, chunk.len());
        }
    }

    /// Drains queued output to the socket. Returns `true` once
    /// everything queued so far has been written.
    pub fn flush_output(&mut self) -> io::Result<bool> {
        self.pump_backlog();
        loop {
            let readable = self.output.readable();
            if readable.is_empty() {
                break;
            }
            match self.stream.write(readable) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "wrote zero bytes")),
                Ok(n) => {
                    self.output
                        .advance_read(n)
                        .expect("wrote no more than was readable");
                    self.pump_backlog();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let drained = self.output_backlog.is_empty() && self.output.is_empty();
        if drained {
            self.wants_write = false;
        }
        Ok(drained)
    }
}
