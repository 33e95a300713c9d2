//! Reply encoding: pure functions building the wire bytes for each reply
//! type the dispatcher can send (spec §4.4, "Outbound replies").
//!
//! These return `Vec<u8>` rather than writing straight into a
//! [`RingBuffer`] because a reply can legitimately be larger than the
//! buffer's current writable space (a long `LRANGE`, a snapshot
//! transfer); the connection layer is what decides how to drain a
//! pending reply across multiple writable events. [`push`] is the thin
//! seam between the two: it copies as much of an encoded reply into the
//! ring buffer as currently fits and reports how much it took.

use ringbuf::RingBuffer;

pub fn simple_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 3);
    out.push(b'+');
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

pub fn error(message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 3);
    out.push(b'-');
    out.extend_from_slice(message.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

pub fn integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

/// `None` encodes the null bulk string (`$-1\r\n`).
pub fn bulk_string(data: Option<&[u8]>) -> Vec<u8> {
    match data {
        None => b"$-1\r\n".to_vec(),
        Some(bytes) => {
            let mut out = Vec::with_capacity(bytes.len() + 16);
            out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\r\n");
            out
        }
    }
}

/// Header for a `len`-element array; the caller appends `len` encoded
/// elements after it. `len < 0` alone (with nothing appended) encodes
/// the null array (`*-1\r\n`).
pub fn array_header(len: i64) -> Vec<u8> {
    format!("*{len}\r\n").into_bytes()
}

/// Encodes a complete array of bulk strings, `None` elements becoming
/// null bulk strings.
pub fn bulk_string_array(items: &[Option<&[u8]>]) -> Vec<u8> {
    let mut out = array_header(items.len() as i64);
    for item in items {
        out.extend_from_slice(&bulk_string(*item));
    }
    out
}

/// Copies as much of `bytes` into `rb`'s writable region as currently
/// fits. Returns the number of bytes actually copied; the caller is
/// responsible for retaining and resending `&bytes[written..]` once
/// more space frees up.
pub fn push(rb: &mut RingBuffer, bytes: &[u8]) -> usize {
    rb.write(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_string() {
        assert_eq!(simple_string("OK"), b"+OK\r\n");
    }

    #[test]
    fn encodes_error() {
        assert_eq!(error("ERR unknown command"), b"-ERR unknown command\r\n");
    }

    #[test]
    fn encodes_integer() {
        assert_eq!(integer(-7), b":-7\r\n");
    }

    #[test]
    fn encodes_bulk_string_and_null_bulk_string() {
        assert_eq!(bulk_string(Some(b"hi")), b"$2\r\nhi\r\n");
        assert_eq!(bulk_string(None), b"$-1\r\n");
    }

    #[test]
    fn encodes_array_of_bulk_strings_with_nulls() {
        let encoded = bulk_string_array(&[Some(&b"a"[..]), None, Some(&b"bc"[..])]);
        assert_eq!(encoded, b"*3\r\n$1\r\na\r\n$-1\r\n$2\r\nbc\r\n");
    }

    #[test]
    fn push_caps_at_the_buffer_writable_len() {
        let mut rb = RingBuffer::new(ringbuf::page_size()).unwrap();
        let reply = simple_string("OK");
        let written = push(&mut rb, &reply);
        assert_eq!(written, reply.len());
    }
}
