//! Little-endian primitives of the `.osr` container
//!
//! Every multi-byte field is little-endian. Strings use the osu! layout:
//!
//! ```text
//! 0x00                      -> empty / absent
//! 0x0B <uleb128 len> <utf8> -> present
//! ```
//!
//! Any other marker byte is rejected.

use super::codec::ParseError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

/// Marker byte for an absent (empty) string
pub const STRING_ABSENT: u8 = 0x00;
/// Marker byte for a present string
pub const STRING_PRESENT: u8 = 0x0B;

/// Bounds-checked reader over an in-memory replay buffer
pub struct BinaryReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Byte offset of the next read
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Bytes left after the current position
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    fn fixed<T>(
        &mut self,
        needed: usize,
        read: impl FnOnce(&mut Cursor<&'a [u8]>) -> io::Result<T>,
    ) -> Result<T, ParseError> {
        let offset = self.position();
        if self.remaining() < needed {
            return Err(ParseError::Truncated { offset, needed });
        }
        read(&mut self.cursor).map_err(|_| ParseError::Truncated { offset, needed })
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        self.fixed(1, |c| c.read_u8())
    }

    pub fn read_i16(&mut self) -> Result<i16, ParseError> {
        self.fixed(2, |c| c.read_i16::<LittleEndian>())
    }

    pub fn read_i32(&mut self) -> Result<i32, ParseError> {
        self.fixed(4, |c| c.read_i32::<LittleEndian>())
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        self.fixed(4, |c| c.read_u32::<LittleEndian>())
    }

    pub fn read_i64(&mut self) -> Result<i64, ParseError> {
        self.fixed(8, |c| c.read_i64::<LittleEndian>())
    }

    /// Borrow the next `len` bytes without copying
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let offset = self.position();
        if self.remaining() < len {
            return Err(ParseError::Truncated {
                offset,
                needed: len,
            });
        }
        let data: &'a [u8] = self.cursor.get_ref();
        self.cursor.set_position((offset + len) as u64);
        Ok(&data[offset..offset + len])
    }

    /// Decode an unsigned LEB128 integer.
    ///
    /// Each byte contributes its low 7 bits; a clear high bit ends the value.
    /// Values that do not fit in 64 bits are rejected instead of wrapping.
    pub fn read_uleb128(&mut self) -> Result<u64, ParseError> {
        let start = self.position();
        let mut result: u64 = 0;
        let mut shift: u32 = 0;

        loop {
            let byte = self.read_u8()?;
            let low = u64::from(byte & 0x7F);

            if shift >= 64 || (low << shift) >> shift != low {
                return Err(ParseError::UlebOverflow { offset: start });
            }
            result |= low << shift;

            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Decode an osu! string (marker, ULEB128 length, UTF-8 bytes)
    pub fn read_string(&mut self) -> Result<String, ParseError> {
        let offset = self.position();
        match self.read_u8()? {
            STRING_ABSENT => Ok(String::new()),
            STRING_PRESENT => {
                let len_offset = self.position();
                let len = self.read_uleb128()?;
                let len = usize::try_from(len).map_err(|_| ParseError::Truncated {
                    offset: len_offset,
                    needed: usize::MAX,
                })?;
                let bytes = self.read_bytes(len)?;
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            marker => Err(ParseError::InvalidStringMarker { offset, marker }),
        }
    }
}

/// Writer producing the same primitives `BinaryReader` consumes
pub struct BinaryWriter<W: Write> {
    writer: W,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_u8(&mut self, value: u8) -> io::Result<()> {
        self.writer.write_u8(value)
    }

    pub fn write_i16(&mut self, value: i16) -> io::Result<()> {
        self.writer.write_i16::<LittleEndian>(value)
    }

    pub fn write_i32(&mut self, value: i32) -> io::Result<()> {
        self.writer.write_i32::<LittleEndian>(value)
    }

    pub fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.writer.write_u32::<LittleEndian>(value)
    }

    pub fn write_i64(&mut self, value: i64) -> io::Result<()> {
        self.writer.write_i64::<LittleEndian>(value)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    pub fn write_uleb128(&mut self, mut value: u64) -> io::Result<()> {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                return self.writer.write_u8(byte);
            }
            self.writer.write_u8(byte | 0x80)?;
        }
    }

    /// Empty strings are written as the absent marker alone
    pub fn write_string(&mut self, value: &str) -> io::Result<()> {
        if value.is_empty() {
            return self.write_u8(STRING_ABSENT);
        }
        self.write_u8(STRING_PRESENT)?;
        self.write_uleb128(value.len() as u64)?;
        self.write_bytes(value.as_bytes())
    }
}
