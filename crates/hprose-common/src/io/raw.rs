//! Copying values without decoding them.
//!
//! Used when a caller asks for a result in serialized form: the bytes of one
//! complete value are lifted out of a response stream exactly as they
//! arrived, references and class definitions included.

use super::reader::{too_deep, MAX_DEPTH};
use super::ByteBuffer;
use crate::protocol::error::{HproseError, Result};
use crate::protocol::tags::*;

/// Copies exactly one encoded value from `input` to `out`.
pub fn read_raw(input: &mut ByteBuffer, out: &mut ByteBuffer) -> Result<()> {
    read_raw_at(input, out, 0)
}

/// Copies one value from `input` into a fresh buffer.
pub fn read_raw_value(input: &mut ByteBuffer) -> Result<ByteBuffer> {
    let mut out = ByteBuffer::new();
    read_raw(input, &mut out)?;
    Ok(out)
}

fn read_raw_at(input: &mut ByteBuffer, out: &mut ByteBuffer, depth: usize) -> Result<()> {
    match input.read_byte() {
        Some(tag) => read_raw_tagged(tag, input, out, depth),
        None => Err(HproseError::EndOfStream),
    }
}

fn read_raw_tagged(
    tag: u8,
    input: &mut ByteBuffer,
    out: &mut ByteBuffer,
    depth: usize,
) -> Result<()> {
    if depth >= MAX_DEPTH {
        return Err(too_deep());
    }
    out.write_byte(tag);
    match tag {
        b'0'..=b'9' | TAG_NULL | TAG_EMPTY | TAG_TRUE | TAG_FALSE | TAG_NAN => Ok(()),
        TAG_INFINITY => match input.read_byte() {
            Some(sign) if sign == TAG_POS || sign == TAG_NEG => {
                out.write_byte(sign);
                Ok(())
            }
            sign => Err(HproseError::unexpected_tag(sign, b"+-")),
        },
        TAG_INTEGER | TAG_LONG | TAG_DOUBLE | TAG_REF => copy_until(input, out, TAG_SEMICOLON),
        TAG_DATE | TAG_TIME => copy_until_any(input, out, &[TAG_SEMICOLON, TAG_UTC]),
        TAG_UTF8_CHAR => copy_utf16_units(input, out, 1),
        TAG_STRING => {
            let count = copy_count(input, out, TAG_QUOTE)?;
            copy_utf16_units(input, out, count)?;
            copy_tag(input, out, TAG_QUOTE)
        }
        TAG_BYTES => {
            let count = copy_count(input, out, TAG_QUOTE)?;
            let bytes = input.read_exact(count)?;
            out.write_bytes(bytes);
            copy_tag(input, out, TAG_QUOTE)
        }
        TAG_GUID => {
            copy_tag(input, out, TAG_OPENBRACE)?;
            let text = input.read_exact(36)?;
            out.write_bytes(text);
            copy_tag(input, out, TAG_CLOSEBRACE)
        }
        TAG_LIST | TAG_MAP | TAG_OBJECT => {
            copy_until(input, out, TAG_OPENBRACE)?;
            copy_children(input, out, depth + 1)
        }
        TAG_CLASS => {
            let len = copy_count(input, out, TAG_QUOTE)?;
            copy_utf16_units(input, out, len)?;
            copy_tag(input, out, TAG_QUOTE)?;
            copy_until(input, out, TAG_OPENBRACE)?;
            copy_children(input, out, depth + 1)?;
            // The definition is always followed by the instance that uses it.
            read_raw_at(input, out, depth + 1)
        }
        TAG_ERROR => read_raw_at(input, out, depth + 1),
        _ => Err(HproseError::unexpected_tag(Some(tag), VALUE_TAGS)),
    }
}

/// Copies nested values up to and including the closing brace.
fn copy_children(input: &mut ByteBuffer, out: &mut ByteBuffer, depth: usize) -> Result<()> {
    loop {
        match input.read_byte() {
            Some(TAG_CLOSEBRACE) => {
                out.write_byte(TAG_CLOSEBRACE);
                return Ok(());
            }
            Some(tag) => read_raw_tagged(tag, input, out, depth)?,
            None => return Err(HproseError::EndOfStream),
        }
    }
}

fn copy_tag(input: &mut ByteBuffer, out: &mut ByteBuffer, expected: u8) -> Result<()> {
    match input.read_byte() {
        Some(tag) if tag == expected => {
            out.write_byte(tag);
            Ok(())
        }
        tag => Err(HproseError::unexpected_tag(tag, &[expected])),
    }
}

fn copy_until(input: &mut ByteBuffer, out: &mut ByteBuffer, delimiter: u8) -> Result<()> {
    copy_until_any(input, out, &[delimiter])
}

fn copy_until_any(input: &mut ByteBuffer, out: &mut ByteBuffer, delimiters: &[u8]) -> Result<()> {
    loop {
        let byte = input.read_byte().ok_or(HproseError::EndOfStream)?;
        out.write_byte(byte);
        if delimiters.contains(&byte) {
            return Ok(());
        }
    }
}

fn copy_count(input: &mut ByteBuffer, out: &mut ByteBuffer, delimiter: u8) -> Result<usize> {
    let text = input.read_until(delimiter)?;
    out.write_str(&text);
    out.write_byte(delimiter);
    if text.is_empty() {
        return Ok(0);
    }
    text.parse()
        .map_err(|_| HproseError::Protocol(format!("invalid count: {:?}", text)))
}

fn copy_utf16_units(input: &mut ByteBuffer, out: &mut ByteBuffer, units: usize) -> Result<()> {
    let text = input.read_string(units)?;
    out.write_str(&text);
    Ok(())
}
