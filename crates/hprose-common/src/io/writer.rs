use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use uuid::Uuid;

use super::{ByteBuffer, ClassRegistry};
use crate::protocol::error::Result;
use crate::protocol::tags::*;
use crate::protocol::value::{Date, List, Map, Object, Value};

/// Reference table of the writing side.
///
/// Slots are numbered in emission order. Values with pointer identity are
/// remembered (and kept alive) so a later occurrence of the same allocation
/// becomes a back-reference; values without identity still take a slot so the
/// numbering matches the reader's.
#[derive(Default)]
struct WriterRefs {
    slots: HashMap<usize, usize>,
    count: usize,
    keep_alive: Vec<Value>,
}

impl WriterRefs {
    fn find(&self, value: &Value) -> Option<usize> {
        value.identity().and_then(|id| self.slots.get(&id).copied())
    }

    fn add(&mut self, value: &Value) {
        if let Some(id) = value.identity() {
            self.slots.insert(id, self.count);
            self.keep_alive.push(value.clone());
        }
        self.count += 1;
    }

    fn add_anonymous(&mut self) {
        self.count += 1;
    }
}

/// Serializes [`Value`]s into the hprose wire format.
///
/// The writer owns its output buffer, a reference table and a cache of class
/// definitions already emitted. [`reset`](Self::reset) clears both caches so
/// the next logical message on the same stream starts numbering from zero.
///
/// # Example
///
/// ```
/// use hprose_common::io::Writer;
/// use hprose_common::Value;
///
/// let mut writer = Writer::new(false);
/// writer.serialize(&Value::Integer(5));
/// writer.serialize(&Value::from("ab"));
/// assert_eq!(writer.buffer().as_slice(), b"5s2\"ab\"");
/// ```
pub struct Writer {
    buffer: ByteBuffer,
    refs: Option<WriterRefs>,
    classes: HashMap<String, usize>,
    class_fields: Vec<Vec<String>>,
    registry: Option<Arc<ClassRegistry>>,
}

impl Writer {
    /// Creates a writer. In `simple` mode no reference table is kept: every
    /// occurrence is written in full and cyclic input never terminates.
    pub fn new(simple: bool) -> Self {
        Self::with_buffer(ByteBuffer::new(), simple)
    }

    pub fn with_buffer(buffer: ByteBuffer, simple: bool) -> Self {
        Self {
            buffer,
            refs: if simple { None } else { Some(WriterRefs::default()) },
            classes: HashMap::new(),
            class_fields: Vec::new(),
            registry: None,
        }
    }

    /// Resolves class names through `registry` when writing class definitions.
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

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.into_vec()
    }

    /// Clears the reference table and the class cache.
    pub fn reset(&mut self) {
        if let Some(refs) = self.refs.as_mut() {
            *refs = WriterRefs::default();
        }
        self.classes.clear();
        self.class_fields.clear();
    }

    /// Appends a bare protocol or structural tag.
    pub fn write_tag(&mut self, tag: u8) {
        self.buffer.write_byte(tag);
    }

    pub fn serialize(&mut self, value: &Value) {
        match value {
            Value::Null => self.buffer.write_byte(TAG_NULL),
            Value::Bool(b) => self.write_bool(*b),
            Value::Integer(i) => self.write_integer(*i),
            Value::Long(l) => self.write_long(*l),
            Value::Double(d) => self.write_double(*d),
            Value::String(s) => {
                if !self.write_ref(value) {
                    self.write_string_body(s, Some(value));
                }
            }
            Value::Bytes(b) => {
                if !self.write_ref(value) {
                    self.write_bytes(b, value);
                }
            }
            Value::Date(d) => {
                if !self.write_ref(value) {
                    self.write_date(d, value);
                }
            }
            Value::Guid(g) => self.write_guid(g),
            Value::List(l) => {
                if !self.write_ref(value) {
                    self.write_list(l, value);
                }
            }
            Value::Map(m) => {
                if !self.write_ref(value) {
                    self.write_map(m, value);
                }
            }
            Value::Object(o) => {
                if !self.write_ref(value) {
                    self.write_object(o, value);
                }
            }
        }
    }

    /// Writes a string that has no identity of its own (method names, field
    /// names). It still occupies a reference slot when longer than one unit.
    pub fn write_str(&mut self, s: &str) {
        self.write_string_body(s, None);
    }

    /// Writes UTF-16 text as a string value.
    ///
    /// # Errors
    ///
    /// [`HproseError::Encoding`](crate::HproseError::Encoding) on an unpaired surrogate.
    pub fn write_utf16(&mut self, units: &[u16]) -> Result<()> {
        let mut scratch = ByteBuffer::new();
        scratch.write_utf16(units)?;
        let text = String::from_utf8_lossy(scratch.as_slice()).into_owned();
        self.write_str(&text);
        Ok(())
    }

    pub fn write_bool(&mut self, b: bool) {
        self.buffer.write_byte(if b { TAG_TRUE } else { TAG_FALSE });
    }

    pub fn write_integer(&mut self, i: i32) {
        if (0..=9).contains(&i) {
            self.buffer.write_byte(b'0' + i as u8);
        } else {
            self.buffer.write_byte(TAG_INTEGER);
            self.buffer.write_str(&i.to_string());
            self.buffer.write_byte(TAG_SEMICOLON);
        }
    }

    pub fn write_long(&mut self, l: i64) {
        self.buffer.write_byte(TAG_LONG);
        self.buffer.write_str(&l.to_string());
        self.buffer.write_byte(TAG_SEMICOLON);
    }

    pub fn write_double(&mut self, d: f64) {
        if d.is_nan() {
            self.buffer.write_byte(TAG_NAN);
        } else if d.is_infinite() {
            self.buffer.write_byte(TAG_INFINITY);
            self.buffer
                .write_byte(if d > 0.0 { TAG_POS } else { TAG_NEG });
        } else {
            self.buffer.write_byte(TAG_DOUBLE);
            self.buffer.write_str(&d.to_string());
            self.buffer.write_byte(TAG_SEMICOLON);
        }
    }

    /// Emits a back-reference if `value` was already written; returns whether it did.
    fn write_ref(&mut self, value: &Value) -> bool {
        let Some(index) = self.refs.as_ref().and_then(|refs| refs.find(value)) else {
            return false;
        };
        self.buffer.write_byte(TAG_REF);
        self.buffer.write_str(&index.to_string());
        self.buffer.write_byte(TAG_SEMICOLON);
        true
    }

    fn register(&mut self, value: Option<&Value>) {
        if let Some(refs) = self.refs.as_mut() {
            match value {
                Some(v) => refs.add(v),
                None => refs.add_anonymous(),
            }
        }
    }

    fn write_string_body(&mut self, s: &str, value: Option<&Value>) {
        let units = s.encode_utf16().count();
        match units {
            0 => self.buffer.write_byte(TAG_EMPTY),
            1 => {
                self.buffer.write_byte(TAG_UTF8_CHAR);
                self.buffer.write_str(s);
            }
            _ => {
                self.register(value);
                self.buffer.write_byte(TAG_STRING);
                self.buffer.write_str(&units.to_string());
                self.buffer.write_byte(TAG_QUOTE);
                self.buffer.write_str(s);
                self.buffer.write_byte(TAG_QUOTE);
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8], value: &Value) {
        self.register(Some(value));
        self.buffer.write_byte(TAG_BYTES);
        if !bytes.is_empty() {
            self.buffer.write_str(&bytes.len().to_string());
        }
        self.buffer.write_byte(TAG_QUOTE);
        self.buffer.write_bytes(bytes);
        self.buffer.write_byte(TAG_QUOTE);
    }

    fn write_date(&mut self, date: &Date, value: &Value) {
        self.register(Some(value));
        let date = Date::new(clamp_to_wire_range(date.value), date.utc);
        let dt = date.value;
        self.buffer.write_byte(TAG_DATE);
        self.buffer.write_str(&format!(
            "{:04}{:02}{:02}",
            dt.year(),
            dt.month(),
            dt.day()
        ));
        if !date.is_midnight() {
            self.buffer.write_byte(TAG_TIME);
            self.buffer.write_str(&format!(
                "{:02}{:02}{:02}",
                dt.hour(),
                dt.minute(),
                dt.second()
            ));
            let nanos = dt.nanosecond();
            if nanos != 0 {
                self.buffer.write_byte(TAG_POINT);
                if nanos % 1_000_000 == 0 {
                    self.buffer.write_str(&format!("{:03}", nanos / 1_000_000));
                } else if nanos % 1_000 == 0 {
                    self.buffer.write_str(&format!("{:06}", nanos / 1_000));
                } else {
                    self.buffer.write_str(&format!("{:09}", nanos));
                }
            }
        }
        self.buffer
            .write_byte(if date.utc { TAG_UTC } else { TAG_SEMICOLON });
    }

    fn write_guid(&mut self, guid: &Uuid) {
        self.register(None);
        self.buffer.write_byte(TAG_GUID);
        self.buffer.write_byte(TAG_OPENBRACE);
        self.buffer.write_str(&guid.hyphenated().to_string());
        self.buffer.write_byte(TAG_CLOSEBRACE);
    }

    fn write_count(&mut self, tag: u8, count: usize) {
        self.buffer.write_byte(tag);
        if count > 0 {
            self.buffer.write_str(&count.to_string());
        }
        self.buffer.write_byte(TAG_OPENBRACE);
    }

    fn write_list(&mut self, list: &List, value: &Value) {
        // Snapshot so no lock is held while recursing into children.
        let items = list.to_vec();
        self.register(Some(value));
        self.write_count(TAG_LIST, items.len());
        for item in &items {
            self.serialize(item);
        }
        self.buffer.write_byte(TAG_CLOSEBRACE);
    }

    fn write_map(&mut self, map: &Map, value: &Value) {
        let entries = map.read().clone();
        self.register(Some(value));
        self.write_count(TAG_MAP, entries.len());
        for (k, v) in &entries {
            self.serialize(k);
            self.serialize(v);
        }
        self.buffer.write_byte(TAG_CLOSEBRACE);
    }

    fn write_object(&mut self, object: &Object, value: &Value) {
        let data = object.read().clone();
        let index = match self.classes.get(&data.class) {
            Some(&index) => index,
            None => {
                let fields: Vec<String> = data.fields.iter().map(|(name, _)| name.clone()).collect();
                self.write_class(&data.class, fields)
            }
        };
        self.register(Some(value));
        self.buffer.write_byte(TAG_OBJECT);
        self.buffer.write_str(&index.to_string());
        self.buffer.write_byte(TAG_OPENBRACE);
        let schema = self.class_fields[index].clone();
        for field in &schema {
            let field_value = data
                .fields
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            self.serialize(&field_value);
        }
        self.buffer.write_byte(TAG_CLOSEBRACE);
    }

    fn write_class(&mut self, class: &str, fields: Vec<String>) -> usize {
        let alias = match &self.registry {
            Some(registry) => registry.alias_of(class),
            None => class.to_string(),
        };
        self.buffer.write_byte(TAG_CLASS);
        self.buffer
            .write_str(&alias.encode_utf16().count().to_string());
        self.buffer.write_byte(TAG_QUOTE);
        self.buffer.write_str(&alias);
        self.buffer.write_byte(TAG_QUOTE);
        self.write_count_only(fields.len());
        for field in &fields {
            self.write_str(field);
        }
        self.buffer.write_byte(TAG_CLOSEBRACE);

        let index = self.class_fields.len();
        self.classes.insert(class.to_string(), index);
        self.class_fields.push(fields);
        index
    }

    fn write_count_only(&mut self, count: usize) {
        if count > 0 {
            self.buffer.write_str(&count.to_string());
        }
        self.buffer.write_byte(TAG_OPENBRACE);
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Dates are written with a four-digit year, so anything outside years
/// 0000..=9999 is pinned to the nearest representable instant.
fn clamp_to_wire_range(dt: NaiveDateTime) -> NaiveDateTime {
    let first = NaiveDate::from_ymd_opt(0, 1, 1).map(|d| d.and_time(NaiveTime::MIN));
    let last = NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_nano_opt(23, 59, 59, 999_999_999));
    match (first, last) {
        (Some(first), _) if dt < first => first,
        (_, Some(last)) if dt > last => last,
        _ => dt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn encode(value: &Value) -> Vec<u8> {
        let mut writer = Writer::new(false);
        writer.serialize(value);
        writer.into_bytes()
    }

    #[test]
    fn test_small_integers_are_one_byte() {
        for i in 0..=9 {
            assert_eq!(encode(&Value::Integer(i)), vec![b'0' + i as u8]);
        }
        assert_eq!(encode(&Value::Integer(5)), vec![0x35]);
    }

    #[test]
    fn test_larger_integers() {
        assert_eq!(encode(&Value::Integer(10)), b"i10;");
        assert_eq!(encode(&Value::Integer(-1)), b"i-1;");
        assert_eq!(encode(&Value::Long(5)), b"l5;");
        assert_eq!(encode(&Value::Long(1 << 40)), b"l1099511627776;");
    }

    #[test]
    fn test_doubles() {
        assert_eq!(encode(&Value::Double(1.5)), b"d1.5;");
        assert_eq!(encode(&Value::Double(f64::NAN)), b"N");
        assert_eq!(encode(&Value::Double(f64::INFINITY)), b"I+");
        assert_eq!(encode(&Value::Double(f64::NEG_INFINITY)), b"I-");
    }

    #[test]
    fn test_scalars() {
        assert_eq!(encode(&Value::Null), b"n");
        assert_eq!(encode(&Value::Bool(true)), b"t");
        assert_eq!(encode(&Value::Bool(false)), b"f");
    }

    #[test]
    fn test_strings() {
        assert_eq!(encode(&Value::from("")), b"e");
        assert_eq!(encode(&Value::from("x")), b"ux");
        assert_eq!(encode(&Value::from("ab")), b"s2\"ab\"");
        assert_eq!(encode(&Value::from("\u{1F600}")), "s2\"\u{1F600}\"".as_bytes());
    }

    #[test]
    fn test_same_string_twice_becomes_reference() {
        let s = Value::from("ab");
        let list = Value::from(vec![s.clone(), s]);
        assert_eq!(encode(&list), b"a2{s2\"ab\"r1;}");
    }

    #[test]
    fn test_equal_but_distinct_strings_are_not_deduplicated() {
        let list = Value::from(vec![Value::from("ab"), Value::from("ab")]);
        assert_eq!(encode(&list), b"a2{s2\"ab\"s2\"ab\"}");
    }

    #[test]
    fn test_self_containing_list() {
        let list = List::default();
        list.push(Value::Integer(1));
        list.push(Value::List(list.clone()));
        assert_eq!(encode(&Value::List(list)), b"a2{1r0;}");
    }

    #[test]
    fn test_empty_containers_omit_count() {
        assert_eq!(encode(&Value::from(Vec::<Value>::new())), b"a{}");
        assert_eq!(encode(&Value::Map(Map::default())), b"m{}");
        assert_eq!(encode(&Value::from(Vec::<u8>::new())), b"b\"\"");
    }

    #[test]
    fn test_map() {
        let map = Map::default();
        map.insert("name".into(), "Ann".into());
        map.insert(1.into(), Value::Null);
        assert_eq!(
            encode(&Value::Map(map)),
            b"m2{s4\"name\"s3\"Ann\"1n}"
        );
    }

    #[test]
    fn test_bytes() {
        assert_eq!(encode(&Value::from(vec![1u8, 2, 3])), b"b3\"\x01\x02\x03\"");
    }

    #[test]
    fn test_dates() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(encode(&Date::from_date(day, false).into()), b"D20240309;");
        let dt = day.and_hms_milli_opt(8, 5, 3, 250).unwrap();
        assert_eq!(encode(&Date::new(dt, true).into()), b"D20240309T080503.250Z");
        let dt = day.and_hms_micro_opt(8, 5, 3, 1).unwrap();
        assert_eq!(encode(&Date::new(dt, false).into()), b"D20240309T080503.000001;");
    }

    #[test]
    fn test_dates_outside_four_digit_years_are_clamped() {
        let ancient = NaiveDate::from_ymd_opt(-44, 3, 15).unwrap().and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(encode(&Date::new(ancient, false).into()), b"D00000101;");
        let far = NaiveDate::from_ymd_opt(12000, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let bytes = encode(&Date::new(far, true).into());
        assert_eq!(bytes, b"D99991231T235959.999999999Z");
        assert!(crate::io::Reader::new(bytes, false).unserialize().is_ok());
    }

    #[test]
    fn test_guid() {
        let guid = Uuid::parse_str("6f1c1d4e-1b5a-4a3c-9d0e-0123456789ab").unwrap();
        assert_eq!(
            encode(&Value::Guid(guid)),
            b"g{6f1c1d4e-1b5a-4a3c-9d0e-0123456789ab}"
        );
    }

    #[test]
    fn test_objects_share_class_definition() {
        let a = Object::new("User", vec![("name".into(), "Al".into()), ("age".into(), 3.into())]);
        let b = Object::new("User", vec![("age".into(), 4.into()), ("name".into(), "Bo".into())]);
        let list = Value::from(vec![Value::Object(a), Value::Object(b)]);
        assert_eq!(
            encode(&list),
            b"a2{c4\"User\"2{s4\"name\"s3\"age\"}o0{s2\"Al\"3}o0{s2\"Bo\"4}}"
        );
    }

    #[test]
    fn test_registry_alias_used_for_class_name() {
        let registry = Arc::new(ClassRegistry::new());
        registry.register("app::User", "User");
        let mut writer = Writer::new(false).with_registry(registry);
        writer.serialize(&Value::Object(Object::new("app::User", vec![])));
        assert_eq!(writer.buffer().as_slice(), b"c4\"User\"{}o0{}");
    }

    #[test]
    fn test_reset_clears_references_and_classes() {
        let s = Value::from("ab");
        let mut writer = Writer::new(false);
        writer.serialize(&s);
        writer.reset();
        writer.serialize(&s);
        assert_eq!(writer.buffer().as_slice(), b"s2\"ab\"s2\"ab\"");
    }

    #[test]
    fn test_simple_mode_writes_every_occurrence() {
        let s = Value::from("ab");
        let mut writer = Writer::new(true);
        writer.serialize(&Value::from(vec![s.clone(), s]));
        assert_eq!(writer.buffer().as_slice(), b"a2{s2\"ab\"s2\"ab\"}");
    }

    #[test]
    fn test_write_utf16_rejects_unpaired_surrogate() {
        let mut writer = Writer::new(false);
        assert!(writer.write_utf16(&[0xDC00]).is_err());
        writer.write_utf16(&[0x0061, 0x0062]).unwrap();
        assert_eq!(writer.buffer().as_slice(), b"s2\"ab\"");
    }
}
