use crate::error::RdbError;
use byteorder::{ByteOrder, LittleEndian};

/// A read-only cursor over an in-memory snapshot buffer.
///
/// Every read that would run past the end of `data` fails with
/// [`RdbError::Truncated`] rather than panicking, since truncation is a
/// normal (if fatal) condition for a snapshot load.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn read_exact(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        if self.pos + n > self.data.len() {
            return Err(RdbError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, RdbError> {
        Ok(self.read_exact(1)?[0])
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, RdbError> {
        Ok(LittleEndian::read_u32(self.read_exact(4)?))
    }

    pub(crate) fn read_u64_le(&mut self) -> Result<u64, RdbError> {
        Ok(LittleEndian::read_u64(self.read_exact(8)?))
    }

    pub(crate) fn read_i8(&mut self) -> Result<i8, RdbError> {
        Ok(self.read_u8()? as i8)
    }

    pub(crate) fn read_i16_le(&mut self) -> Result<i16, RdbError> {
        Ok(LittleEndian::read_i16(self.read_exact(2)?))
    }

    pub(crate) fn read_i32_le(&mut self) -> Result<i32, RdbError> {
        Ok(LittleEndian::read_i32(self.read_exact(4)?))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}
