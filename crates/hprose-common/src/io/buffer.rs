use crate::protocol::error::{HproseError, Result};

/// Capacity of the first allocation of an empty buffer.
const INITIAL_CAPACITY: usize = 1024;

/// Growable byte buffer with independent read and write cursors.
///
/// Bytes are appended at the write cursor (the end of the written data) and
/// consumed from the read cursor. [`mark`](Self::mark) and
/// [`reset`](Self::reset) checkpoint and rewind both cursors, which lets a
/// caller re-send a frame after a failed write without encoding it again.
///
/// Strings are stored as UTF-8. Lengths passed to [`read_string`](Self::read_string)
/// count UTF-16 code units, matching the length prefix of the wire format:
/// a four-byte UTF-8 sequence counts as two units.
///
/// # Example
///
/// ```
/// use hprose_common::io::ByteBuffer;
///
/// let mut buf = ByteBuffer::new();
/// buf.write_str("héllo;");
/// assert_eq!(buf.read_until(b';').unwrap(), "héllo");
/// assert_eq!(buf.read_byte(), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    offset: usize,
    write_mark: usize,
    read_mark: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing bytes; the read cursor starts at the beginning.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            write_mark: data.len(),
            data,
            offset: 0,
            read_mark: 0,
        }
    }

    /// Number of written bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Read cursor position.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes left between the read cursor and the end of the written data.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// All written bytes, regardless of the read cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Unread bytes.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Drops all content and both marks.
    pub fn clear(&mut self) {
        self.data.clear();
        self.offset = 0;
        self.write_mark = 0;
        self.read_mark = 0;
    }

    /// Checkpoints both cursors.
    pub fn mark(&mut self) {
        self.write_mark = self.data.len();
        self.read_mark = self.offset;
    }

    /// Rewinds both cursors to the last [`mark`](Self::mark): bytes written
    /// after the mark are discarded and bytes read after it become unread.
    pub fn reset(&mut self) {
        self.data.truncate(self.write_mark);
        self.offset = self.read_mark.min(self.data.len());
    }

    /// Grows capacity so `n` more bytes fit. New capacity is the required size
    /// rounded up to a power of two, then doubled.
    fn grow(&mut self, n: usize) {
        let required = self.data.len() + n;
        if required <= self.data.capacity() {
            return;
        }
        let size = if self.data.capacity() == 0 {
            required.next_power_of_two().max(INITIAL_CAPACITY)
        } else {
            required.next_power_of_two() * 2
        };
        self.data.reserve_exact(size - self.data.len());
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.grow(1);
        self.data.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.grow(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    pub fn write_i32_be(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_i32_le(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32_be(&mut self, value: u32) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Appends `s` as UTF-8.
    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Appends UTF-16 code units as UTF-8, combining surrogate pairs into
    /// four-byte sequences.
    ///
    /// # Errors
    ///
    /// Returns [`HproseError::Encoding`] on an unpaired surrogate; nothing is
    /// written in that case.
    pub fn write_utf16(&mut self, units: &[u16]) -> Result<()> {
        let mut encoded = String::with_capacity(units.len());
        for (index, decoded) in char::decode_utf16(units.iter().copied()).enumerate() {
            match decoded {
                Ok(c) => encoded.push(c),
                Err(e) => {
                    return Err(HproseError::Encoding(format!(
                        "unpaired surrogate 0x{:04x} near unit {}",
                        e.unpaired_surrogate(),
                        index
                    )))
                }
            }
        }
        self.write_str(&encoded);
        Ok(())
    }

    /// Reads one byte, or `None` past the end of the written data.
    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = self.data.get(self.offset).copied()?;
        self.offset += 1;
        Some(byte)
    }

    /// Looks at the next byte without consuming it.
    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    /// Reads up to `n` bytes; fewer (possibly none) near the end.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let end = (self.offset + n).min(self.data.len());
        let bytes = self.data[self.offset..end].to_vec();
        self.offset = end;
        bytes
    }

    /// Reads exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// [`HproseError::EndOfStream`] if fewer than `n` bytes remain; the cursor
    /// does not move.
    pub fn read_exact(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(HproseError::EndOfStream);
        }
        let start = self.offset;
        self.offset += n;
        Ok(&self.data[start..self.offset])
    }

    /// Advances the read cursor by up to `n` bytes, returning how many were skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let skipped = n.min(self.remaining());
        self.offset += skipped;
        skipped
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    pub fn read_i32_be(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Reads bytes up to `delimiter` (consumed, not returned) or to the end of
    /// the data, decoded as UTF-8.
    pub fn read_until(&mut self, delimiter: u8) -> Result<String> {
        let rest = &self.data[self.offset..];
        let (len, consumed) = match rest.iter().position(|&b| b == delimiter) {
            Some(pos) => (pos, pos + 1),
            None => (rest.len(), rest.len()),
        };
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|e| HproseError::Encoding(format!("invalid UTF-8: {}", e)))?
            .to_string();
        self.offset += consumed;
        Ok(text)
    }

    /// Reads `units` UTF-16 code units worth of UTF-8 text.
    ///
    /// # Errors
    ///
    /// [`HproseError::Encoding`] on malformed UTF-8 (bad lead or continuation
    /// bytes, encoded surrogates) and [`HproseError::EndOfStream`] if the data
    /// ends mid-string. The cursor does not move on error.
    pub fn read_string(&mut self, units: usize) -> Result<String> {
        let rest = &self.data[self.offset..];
        let mut pos = 0;
        let mut counted = 0;
        while counted < units {
            let lead = *rest.get(pos).ok_or(HproseError::EndOfStream)?;
            let (width, weight) = match lead {
                0x00..=0x7f => (1, 1),
                0xc0..=0xdf => (2, 1),
                0xe0..=0xef => (3, 1),
                0xf0..=0xf7 => (4, 2),
                _ => {
                    return Err(HproseError::Encoding(format!(
                        "bad UTF-8 lead byte 0x{:02x} at offset {}",
                        lead,
                        self.offset + pos
                    )))
                }
            };
            if pos + width > rest.len() {
                return Err(HproseError::EndOfStream);
            }
            pos += width;
            counted += weight;
        }
        let text = std::str::from_utf8(&rest[..pos])
            .map_err(|e| HproseError::Encoding(format!("invalid UTF-8: {}", e)))?
            .to_string();
        self.offset += pos;
        Ok(text)
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        ByteBuffer::from_vec(data)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        ByteBuffer::from_vec(data.to_vec())
    }
}
