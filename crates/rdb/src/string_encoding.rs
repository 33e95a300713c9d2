//! The snapshot format's length/integer-prefixed string encoding
//! (spec §4.3 "String encoding").

use crate::cursor::Cursor;
use crate::error::RdbError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

const TAG_LEN6: u8 = 0b00;
const TAG_LEN14: u8 = 0b01;
const TAG_LEN32: u8 = 0b10;
const TAG_SPECIAL: u8 = 0b11;

const ENC_INT8: u8 = 0xC0;
const ENC_INT16: u8 = 0xC1;
const ENC_INT32: u8 = 0xC2;
const ENC_LZF: u8 = 0xC3;

/// Appends the string encoding of `data` to `out`.
///
/// If `data` is the canonical decimal rendering of an integer that fits
/// in `i8`/`i16`/`i32`, the smallest integer form is used; otherwise a
/// plain length-prefixed form sized to `data.len()` is used.
pub(crate) fn encode(out: &mut Vec<u8>, data: &[u8]) {
    if let Some(n) = canonical_decimal(data) {
        if let Ok(v) = i8::try_from(n) {
            out.push(ENC_INT8);
            out.push(v as u8);
            return;
        }
        if let Ok(v) = i16::try_from(n) {
            out.push(ENC_INT16);
            let mut buf = [0u8; 2];
            LittleEndian::write_i16(&mut buf, v);
            out.extend_from_slice(&buf);
            return;
        }
        if let Ok(v) = i32::try_from(n) {
            out.push(ENC_INT32);
            let mut buf = [0u8; 4];
            LittleEndian::write_i32(&mut buf, v);
            out.extend_from_slice(&buf);
            return;
        }
    }
    encode_length_prefixed(out, data);
}

fn encode_length_prefixed(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < 64 {
        out.push((TAG_LEN6 << 6) | len as u8);
    } else if len < 16384 {
        out.push((TAG_LEN14 << 6) | ((len >> 8) as u8));
        out.push((len & 0xFF) as u8);
    } else {
        out.push(TAG_LEN32 << 6);
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, len as u32);
        out.extend_from_slice(&buf);
    }
    out.extend_from_slice(data);
}

/// Returns `Some(n)` if `data` is exactly the decimal ASCII rendering of
/// `n` with no leading zeros, sign quirks, or whitespace — i.e. it would
/// round-trip through `n.to_string()`.
fn canonical_decimal(data: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(data).ok()?;
    let n: i64 = s.parse().ok()?;
    (n.to_string() == s).then_some(n)
}

/// Decodes one string-encoded value from `cursor`.
pub(crate) fn decode(cursor: &mut Cursor<'_>) -> Result<Vec<u8>, RdbError> {
    let tag_byte = cursor.read_u8()?;
    match tag_byte >> 6 {
        t if t == TAG_LEN6 => {
            let len = (tag_byte & 0x3F) as usize;
            Ok(cursor.read_exact(len)?.to_vec())
        }
        t if t == TAG_LEN14 => {
            let hi = (tag_byte & 0x3F) as usize;
            let lo = cursor.read_u8()? as usize;
            let len = (hi << 8) | lo;
            Ok(cursor.read_exact(len)?.to_vec())
        }
        t if t == TAG_LEN32 => {
            let len = cursor.read_exact(4).map(BigEndian::read_u32)? as usize;
            Ok(cursor.read_exact(len)?.to_vec())
        }
        t if t == TAG_SPECIAL => decode_special(tag_byte, cursor),
        _ => unreachable!("two-bit tag has only four values"),
    }
}

fn decode_special(tag_byte: u8, cursor: &mut Cursor<'_>) -> Result<Vec<u8>, RdbError> {
    match tag_byte {
        ENC_INT8 => Ok(cursor.read_i8()?.to_string().into_bytes()),
        ENC_INT16 => Ok(cursor.read_i16_le()?.to_string().into_bytes()),
        ENC_INT32 => Ok(cursor.read_i32_le()?.to_string().into_bytes()),
        ENC_LZF => Err(RdbError::Unsupported("LZF-compressed string")),
        _ => Err(RdbError::Corrupt(format!(
            "unrecognized special string encoding byte {tag_byte:#04x}"
        ))),
    }
}
