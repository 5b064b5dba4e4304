use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use super::{raw, ByteBuffer, ClassRegistry};
use crate::protocol::error::{expect_tag, HproseError, Result};
use crate::protocol::tags::*;
use crate::protocol::value::{Date, List, Map, Object, Value};

/// Deepest container nesting accepted before decoding is abandoned.
pub const MAX_DEPTH: usize = 512;

/// Deserializes hprose-encoded [`Value`]s from a byte buffer.
///
/// The reader mirrors the [`Writer`](super::Writer): every string of two or
/// more units, byte block, date, guid and container takes a reference slot in
/// the order it is read, and class definitions accumulate until
/// [`reset`](Self::reset).
pub struct Reader {
    buffer: ByteBuffer,
    refs: Option<Vec<Value>>,
    classes: Vec<(String, Vec<String>)>,
    registry: Option<Arc<ClassRegistry>>,
    depth: usize,
}

impl Reader {
    /// Creates a reader over `buffer`. In `simple` mode no reference table is
    /// kept and an `r` tag is rejected.
    pub fn new(buffer: impl Into<ByteBuffer>, simple: bool) -> Self {
        Self {
            buffer: buffer.into(),
            refs: if simple { None } else { Some(Vec::new()) },
            classes: Vec::new(),
            registry: None,
            depth: 0,
        }
    }

    /// Maps wire class aliases back to local names through `registry`.
    pub fn with_registry(mut self, registry: Arc<ClassRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> ByteBuffer {
        self.buffer
    }

    /// Clears the reference table and known class definitions.
    pub fn reset(&mut self) {
        if let Some(refs) = self.refs.as_mut() {
            refs.clear();
        }
        self.classes.clear();
    }

    pub fn read_tag(&mut self) -> Option<u8> {
        self.buffer.read_byte()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.buffer.peek_byte()
    }

    /// Consumes the next byte, failing unless it is `expected`.
    pub fn check_tag(&mut self, expected: u8) -> Result<()> {
        match self.buffer.read_byte() {
            Some(tag) if tag == expected => Ok(()),
            tag => Err(expect_tag(tag, expected)),
        }
    }

    /// Consumes the next byte, failing unless it is one of `expected`.
    pub fn check_tags(&mut self, expected: &[u8]) -> Result<u8> {
        match self.buffer.read_byte() {
            Some(tag) if expected.contains(&tag) => Ok(tag),
            tag => Err(HproseError::unexpected_tag(tag, expected)),
        }
    }

    /// Reads the next complete value.
    ///
    /// # Errors
    ///
    /// [`HproseError::UnexpectedTag`] when the next byte cannot start a value,
    /// [`HproseError::EndOfStream`] on truncated input, and
    /// [`HproseError::Protocol`] / [`HproseError::Encoding`] on malformed
    /// bodies, including containers nested deeper than [`MAX_DEPTH`].
    pub fn unserialize(&mut self) -> Result<Value> {
        match self.buffer.read_byte() {
            Some(tag) => self.read_value(tag),
            None => Err(HproseError::EndOfStream),
        }
    }

    /// Reads a string value, following a back-reference if one is found.
    pub fn read_string(&mut self) -> Result<String> {
        let tag = self.buffer.read_byte();
        let value = match tag {
            Some(TAG_EMPTY) => return Ok(String::new()),
            Some(TAG_UTF8_CHAR) => return self.buffer.read_string(1),
            Some(TAG_STRING) => self.read_string_body()?,
            Some(TAG_REF) => self.read_ref()?,
            _ => return Err(HproseError::unexpected_tag(tag, b"eusr")),
        };
        match value {
            Value::String(s) => Ok(s.to_string()),
            _ => Err(HproseError::Protocol(
                "reference does not point to a string".into(),
            )),
        }
    }

    /// Reads a list value, following a back-reference if one is found.
    pub fn read_list(&mut self) -> Result<List> {
        let tag = self.buffer.read_byte();
        let value = match tag {
            Some(TAG_LIST) => self.read_list_body()?,
            Some(TAG_REF) => self.read_ref()?,
            _ => return Err(HproseError::unexpected_tag(tag, b"ar")),
        };
        match value {
            Value::List(list) => Ok(list),
            _ => Err(HproseError::Protocol(
                "reference does not point to a list".into(),
            )),
        }
    }

    /// Copies the bytes of the next value verbatim without decoding it.
    pub fn read_raw(&mut self) -> Result<ByteBuffer> {
        let mut out = ByteBuffer::new();
        raw::read_raw(&mut self.buffer, &mut out)?;
        Ok(out)
    }

    fn read_value(&mut self, tag: u8) -> Result<Value> {
        match tag {
            b'0'..=b'9' => Ok(Value::Integer(i32::from(tag - b'0'))),
            TAG_INTEGER => Ok(Value::Integer(self.read_number(TAG_SEMICOLON)?)),
            TAG_LONG => Ok(Value::Long(self.read_number(TAG_SEMICOLON)?)),
            TAG_DOUBLE => Ok(Value::Double(self.read_number(TAG_SEMICOLON)?)),
            TAG_NAN => Ok(Value::Double(f64::NAN)),
            TAG_INFINITY => match self.buffer.read_byte() {
                Some(TAG_POS) => Ok(Value::Double(f64::INFINITY)),
                Some(TAG_NEG) => Ok(Value::Double(f64::NEG_INFINITY)),
                tag => Err(HproseError::unexpected_tag(tag, b"+-")),
            },
            TAG_NULL => Ok(Value::Null),
            TAG_EMPTY => Ok(Value::from("")),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_DATE => self.read_date_body(),
            TAG_TIME => self.read_time_body(),
            TAG_BYTES => self.read_bytes_body(),
            TAG_UTF8_CHAR => Ok(Value::from(self.buffer.read_string(1)?)),
            TAG_STRING => self.read_string_body(),
            TAG_GUID => self.read_guid_body(),
            TAG_LIST => self.nested(Self::read_list_body),
            TAG_MAP => self.nested(Self::read_map_body),
            TAG_CLASS => self.nested(|reader| {
                reader.read_class_body()?;
                reader.unserialize()
            }),
            TAG_OBJECT => self.nested(Self::read_object_body),
            TAG_REF => self.read_ref(),
            _ => Err(HproseError::unexpected_tag(Some(tag), VALUE_TAGS)),
        }
    }

    fn nested(&mut self, read: fn(&mut Self) -> Result<Value>) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.depth += 1;
        let result = read(self);
        self.depth -= 1;
        result
    }

    /// Every element takes at least one byte, so a count larger than the
    /// unread input cannot be satisfied.
    fn read_element_count(&mut self) -> Result<usize> {
        let count = self.read_count(TAG_OPENBRACE)?;
        if count > self.buffer.remaining() {
            return Err(HproseError::Protocol(format!(
                "count {} exceeds the {} bytes left",
                count,
                self.buffer.remaining()
            )));
        }
        Ok(count)
    }

    fn register(&mut self, value: &Value) {
        if let Some(refs) = self.refs.as_mut() {
            refs.push(value.clone());
        }
    }

    fn read_number<T: FromStr>(&mut self, delimiter: u8) -> Result<T> {
        let text = self.buffer.read_until(delimiter)?;
        let digits = text.strip_prefix('+').unwrap_or(&text);
        digits
            .parse()
            .map_err(|_| HproseError::Protocol(format!("invalid number: {:?}", text)))
    }

    /// Element counts and lengths; an omitted count means zero.
    fn read_count(&mut self, delimiter: u8) -> Result<usize> {
        let text = self.buffer.read_until(delimiter)?;
        if text.is_empty() {
            return Ok(0);
        }
        text.parse()
            .map_err(|_| HproseError::Protocol(format!("invalid count: {:?}", text)))
    }

    fn read_digits(&mut self, n: usize) -> Result<u32> {
        let bytes = self.buffer.read_exact(n)?;
        bytes.iter().try_fold(0u32, |acc, &b| {
            if b.is_ascii_digit() {
                Ok(acc * 10 + u32::from(b - b'0'))
            } else {
                Err(HproseError::Protocol(format!(
                    "expected digit in date/time, found 0x{:02x}",
                    b
                )))
            }
        })
    }

    /// Parses `hhmmss[.fff[fff[fff]]]` and returns the time with the tag that ended it.
    fn read_time(&mut self) -> Result<(NaiveTime, u8)> {
        let hour = self.read_digits(2)?;
        let minute = self.read_digits(2)?;
        let second = self.read_digits(2)?;
        let mut nanos = 0;
        let mut tag = self.buffer.read_byte();
        if tag == Some(TAG_POINT) {
            nanos = self.read_digits(3)? * 1_000_000;
            tag = self.buffer.read_byte();
            for scale in [1_000, 1] {
                let Some(lead) = tag.filter(|t| is_digit(*t)) else {
                    break;
                };
                let group = u32::from(lead - b'0') * 100 + self.read_digits(2)?;
                nanos += group * scale;
                tag = self.buffer.read_byte();
            }
        }
        let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos).ok_or_else(|| {
            HproseError::Protocol(format!(
                "invalid time {:02}:{:02}:{:02}.{:09}",
                hour, minute, second, nanos
            ))
        })?;
        match tag {
            Some(t) if t == TAG_UTC || t == TAG_SEMICOLON => Ok((time, t)),
            tag => Err(HproseError::unexpected_tag(tag, b"Z;")),
        }
    }

    fn read_date_body(&mut self) -> Result<Value> {
        let year = self.read_digits(4)?;
        let month = self.read_digits(2)?;
        let day = self.read_digits(2)?;
        let date = NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(|| {
            HproseError::Protocol(format!("invalid date {:04}-{:02}-{:02}", year, month, day))
        })?;
        let (time, end) = match self.buffer.read_byte() {
            Some(TAG_TIME) => self.read_time()?,
            Some(t) if t == TAG_UTC || t == TAG_SEMICOLON => (NaiveTime::MIN, t),
            tag => return Err(HproseError::unexpected_tag(tag, b"TZ;")),
        };
        let value = Value::from(Date::new(date.and_time(time), end == TAG_UTC));
        self.register(&value);
        Ok(value)
    }

    fn read_time_body(&mut self) -> Result<Value> {
        let (time, end) = self.read_time()?;
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
            .ok_or_else(|| HproseError::Protocol("invalid epoch".into()))?;
        let value = Value::from(Date::new(epoch.and_time(time), end == TAG_UTC));
        self.register(&value);
        Ok(value)
    }

    fn read_bytes_body(&mut self) -> Result<Value> {
        let count = self.read_count(TAG_QUOTE)?;
        let bytes = self.buffer.read_exact(count)?.to_vec();
        self.check_tag(TAG_QUOTE)?;
        let value = Value::from(bytes);
        self.register(&value);
        Ok(value)
    }

    fn read_string_body(&mut self) -> Result<Value> {
        let count = self.read_count(TAG_QUOTE)?;
        let text = self.buffer.read_string(count)?;
        self.check_tag(TAG_QUOTE)?;
        let value = Value::from(text);
        self.register(&value);
        Ok(value)
    }

    fn read_guid_body(&mut self) -> Result<Value> {
        self.check_tag(TAG_OPENBRACE)?;
        let text = self.buffer.read_exact(36)?;
        let guid = std::str::from_utf8(text)
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| HproseError::Protocol("invalid guid".into()))?;
        self.check_tag(TAG_CLOSEBRACE)?;
        let value = Value::Guid(guid);
        self.register(&value);
        Ok(value)
    }

    fn read_list_body(&mut self) -> Result<Value> {
        let count = self.read_element_count()?;
        let list = List::with_capacity(count);
        let value = Value::List(list.clone());
        self.register(&value);
        for _ in 0..count {
            let item = self.unserialize()?;
            list.push(item);
        }
        self.check_tag(TAG_CLOSEBRACE)?;
        Ok(value)
    }

    fn read_map_body(&mut self) -> Result<Value> {
        let count = self.read_element_count()?;
        let map = Map::new(Vec::with_capacity(count));
        let value = Value::Map(map.clone());
        self.register(&value);
        for _ in 0..count {
            let key = self.unserialize()?;
            let item = self.unserialize()?;
            map.write().push((key, item));
        }
        self.check_tag(TAG_CLOSEBRACE)?;
        Ok(value)
    }

    fn read_class_body(&mut self) -> Result<()> {
        let len = self.read_count(TAG_QUOTE)?;
        let alias = self.buffer.read_string(len)?;
        self.check_tag(TAG_QUOTE)?;
        let count = self.read_element_count()?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(self.read_string()?);
        }
        self.check_tag(TAG_CLOSEBRACE)?;
        let class = match &self.registry {
            Some(registry) => registry.class_of(&alias),
            None => alias,
        };
        self.classes.push((class, fields));
        Ok(())
    }

    fn read_object_body(&mut self) -> Result<Value> {
        let index = self.read_count(TAG_OPENBRACE)?;
        let (class, fields) = self.classes.get(index).cloned().ok_or_else(|| {
            HproseError::Protocol(format!("unknown class definition {}", index))
        })?;
        let object = Object::new(class, Vec::with_capacity(fields.len()));
        let value = Value::Object(object.clone());
        self.register(&value);
        for field in fields {
            let item = self.unserialize()?;
            object.write().fields.push((field, item));
        }
        self.check_tag(TAG_CLOSEBRACE)?;
        Ok(value)
    }

    fn read_ref(&mut self) -> Result<Value> {
        let index = self.read_count(TAG_SEMICOLON)?;
        let Some(refs) = self.refs.as_ref() else {
            return Err(HproseError::unexpected_tag(Some(TAG_REF), b""));
        };
        refs.get(index).cloned().ok_or_else(|| {
            HproseError::Protocol(format!(
                "reference {} out of range ({} known)",
                index,
                refs.len()
            ))
        })
    }
}

pub(crate) fn too_deep() -> HproseError {
    HproseError::Protocol(format!("values nested deeper than {}", MAX_DEPTH))
}
