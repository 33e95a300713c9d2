//! Replica-side handshake state machine (spec §4.7, steps 1-10): PING,
//! REPLCONF listening-port, REPLCONF capa psync2, PSYNC, FULLRESYNC,
//! then the raw RDB transfer. Deliberately bypasses [`resp::Parser`]
//! during the handshake: the RDB payload is length-prefixed raw bytes
//! with no trailing CRLF, which the streaming RESP grammar doesn't
//! model, so this module reads lines and byte-counted bodies directly.

use std::io::{self, Read, Write};

use mio::net::TcpStream;

/// Where a replica's link to its master currently is.
pub enum HandshakeState {
    AwaitPingReply,
    AwaitReplconfPortReply,
    AwaitReplconfCapaReply,
    AwaitFullresyncReply,
    AwaitRdbLengthLine { replid: String, offset: u64 },
    AwaitRdbBody { replid: String, offset: u64, body: Vec<u8>, remaining: usize },
    /// Handshake complete; the connection now streams ordinary
    /// propagated commands through the regular parser/dispatch path.
    Ready,
}

/// The result of a completed handshake: the master's replication ID
/// and offset at the moment of the snapshot, plus the snapshot itself.
pub struct FullResync {
    pub master_replid: String,
    pub master_repl_offset: u64,
    pub snapshot: Vec<u8>,
}

/// Scratch accumulator for the handshake's line- and length-prefixed
/// reads, kept separate from the connection's [`ringbuf::RingBuffer`]
/// input (which is sized and shaped for steady-state command framing,
/// not one-off handshake replies).
#[derive(Default)]
pub struct HandshakeBuf {
    buf: Vec<u8>,
}

impl HandshakeBuf {
    /// Reads whatever is currently available (non-blocking) from
    /// `stream` into the scratch buffer. Returns `Ok(true)` on peer
    /// close.
    pub fn fill(&mut self, stream: &mut TcpStream) -> io::Result<bool> {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pulls one complete CRLF-terminated line out of the scratch
    /// buffer, if one is present.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.windows(2).position(|w| w == b"\r\n")?;
        let line = self.buf[..pos].to_vec();
        self.buf.drain(..pos + 2);
        Some(line)
    }

    /// Removes up to `n` raw bytes (no line framing). Returns fewer than
    /// `n` if that's all that's buffered.
    fn take_bytes(&mut self, n: usize) -> Vec<u8> {
        let take = n.min(self.buf.len());
        self.buf.drain(..take).collect()
    }

    /// Bytes left over once the handshake reaches [`HandshakeState::Ready`];
    /// these are already-propagated command bytes that must be replayed
    /// into the normal parser.
    pub fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Advances `state` as far as currently-buffered data allows, writing
/// handshake requests to `stream` as each step completes. Returns the
/// full resync payload once the snapshot transfer finishes.
pub fn advance(
    state: &mut HandshakeState,
    stream: &mut TcpStream,
    scratch: &mut HandshakeBuf,
    listening_port: u16,
) -> io::Result<Option<FullResync>> {
    loop {
        match state {
            HandshakeState::AwaitPingReply => {
                let Some(line) = scratch.take_line() else { return Ok(None) };
                if !line.starts_with(b"+PONG") {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "master did not reply PONG to PING"));
                }
                send_command(stream, &["REPLCONF", "listening-port", &listening_port.to_string()])?;
                *state = HandshakeState::AwaitReplconfPortReply;
            }
            HandshakeState::AwaitReplconfPortReply => {
                let Some(line) = scratch.take_line() else { return Ok(None) };
                expect_ok(&line)?;
                send_command(stream, &["REPLCONF", "capa", "psync2"])?;
                *state = HandshakeState::AwaitReplconfCapaReply;
            }
            HandshakeState::AwaitReplconfCapaReply => {
                let Some(line) = scratch.take_line() else { return Ok(None) };
                expect_ok(&line)?;
                send_command(stream, &["PSYNC", "?", "-1"])?;
                *state = HandshakeState::AwaitFullresyncReply;
            }
            HandshakeState::AwaitFullresyncReply => {
                let Some(line) = scratch.take_line() else { return Ok(None) };
                let text = String::from_utf8_lossy(&line);
                let text = text.strip_prefix('+').unwrap_or(&text);
                let mut parts = text.split_whitespace();
                let tag = parts.next();
                let replid = parts.next();
                let offset = parts.next();
                let (Some("FULLRESYNC"), Some(replid), Some(offset)) = (tag, replid, offset) else {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "expected FULLRESYNC reply"));
                };
                let offset: u64 = offset
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-numeric FULLRESYNC offset"))?;
                *state = HandshakeState::AwaitRdbLengthLine { replid: replid.to_string(), offset };
            }
            HandshakeState::AwaitRdbLengthLine { replid, offset } => {
                let Some(line) = scratch.take_line() else { return Ok(None) };
                let text = String::from_utf8_lossy(&line);
                let text = text
                    .strip_prefix('$')
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "expected $<len> RDB header"))?;
                let len: usize = text
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-numeric RDB length"))?;
                let replid = std::mem::take(replid);
                let offset = *offset;
                *state = HandshakeState::AwaitRdbBody { replid, offset, body: Vec::with_capacity(len), remaining: len };
            }
            HandshakeState::AwaitRdbBody { body, remaining, .. } => {
                if *remaining > 0 {
                    let took = scratch.take_bytes(*remaining);
                    *remaining -= took.len();
                    body.extend_from_slice(&took);
                }
                if *remaining > 0 {
                    return Ok(None);
                }
                let HandshakeState::AwaitRdbBody { replid, offset, body, .. } =
                    std::mem::replace(state, HandshakeState::Ready)
                else {
                    unreachable!()
                };
                return Ok(Some(FullResync { master_replid: replid, master_repl_offset: offset, snapshot: body }));
            }
            HandshakeState::Ready => return Ok(None),
        }
    }
}

fn expect_ok(line: &[u8]) -> io::Result<()> {
    if line.starts_with(b"+OK") {
        Ok(())
    } else {
        Err(io::Error::new(io::ErrorKind::InvalidData, "expected +OK reply during handshake"))
    }
}

fn send_command(stream: &mut TcpStream, parts: &[&str]) -> io::Result<()> {
    let refs: Vec<Option<&[u8]>> = parts.iter().map(|p| Some(p.as_bytes())).collect();
    let encoded = resp::bulk_string_array(&refs);
    stream.write_all(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_buf_extracts_one_line_at_a_time() {
        let mut buf = HandshakeBuf::default();
        buf.buf.extend_from_slice(b"+PONG\r\n+OK\r\n");
        assert_eq!(buf.take_line().unwrap(), b"+PONG");
        assert_eq!(buf.take_line().unwrap(), b"+OK");
        assert!(buf.take_line().is_none());
    }

    #[test]
    fn handshake_buf_takes_raw_bytes_without_line_framing() {
        let mut buf = HandshakeBuf::default();
        buf.buf.extend_from_slice(b"REDIS0011binarydata");
        let chunk = buf.take_bytes(5);
        assert_eq!(chunk, b"REDIS");
        assert_eq!(buf.take_remainder(), b"0011binarydata");
    }
}
