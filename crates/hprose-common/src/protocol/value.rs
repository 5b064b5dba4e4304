//! Hprose value model.
//!
//! [`Value`] is a closed union over everything the wire format can carry.
//! Strings, byte blocks, dates and containers are reference counted so that
//! the same allocation can appear in several places of one graph; the
//! [`Writer`](crate::io::Writer) uses that pointer identity, never value
//! equality, to decide when to emit a back-reference.
//!
//! [`List`], [`Map`] and [`Object`] are shared handles with interior
//! mutability. A list can therefore contain itself, and a decoder can hand out
//! a container before its children have been read. Graphs with cycles leak
//! when the last outside handle is dropped; break the cycle first if that
//! matters.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Depth after which `Debug` output is elided, so cyclic graphs still print.
const DEBUG_DEPTH: usize = 12;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    Date(Arc<Date>),
    Guid(Uuid),
    List(List),
    Map(Map),
    Object(Object),
}

/// A calendar date with time of day, optionally flagged as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub value: NaiveDateTime,
    pub utc: bool,
}

impl Date {
    pub fn new(value: NaiveDateTime, utc: bool) -> Self {
        Self { value, utc }
    }

    /// Midnight of `date`.
    pub fn from_date(date: NaiveDate, utc: bool) -> Self {
        Self::new(date.and_time(NaiveTime::MIN), utc)
    }

    /// Whether the time part is exactly midnight.
    pub fn is_midnight(&self) -> bool {
        let t = self.value.time();
        t.hour() == 0 && t.minute() == 0 && t.second() == 0 && t.nanosecond() == 0
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, mutable list of values.
#[derive(Clone, Default)]
pub struct List(Arc<RwLock<Vec<Value>>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Vec::with_capacity(capacity))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        read_lock(&self.0)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        write_lock(&self.0)
    }

    pub fn push(&self, value: Value) {
        self.write().push(value);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.read().get(index).cloned()
    }

    /// Shallow copy of the current items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.read().clone()
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        List::new(items)
    }
}

/// Shared, mutable, insertion-ordered map. Keys may be any value.
#[derive(Clone, Default)]
pub struct Map(Arc<RwLock<Vec<(Value, Value)>>>);

impl Map {
    pub fn new(entries: Vec<(Value, Value)>) -> Self {
        Self(Arc::new(RwLock::new(entries)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<(Value, Value)>> {
        read_lock(&self.0)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<(Value, Value)>> {
        write_lock(&self.0)
    }

    /// Inserts or replaces the entry whose key equals `key`.
    pub fn insert(&self, key: Value, value: Value) {
        let mut entries = self.write();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }

    /// Looks up a string key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read()
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

/// Fields of an object instance, in declaration order.
#[derive(Clone, Default)]
pub struct ObjectData {
    pub class: String,
    pub fields: Vec<(String, Value)>,
}

/// Shared, mutable instance of a named class.
#[derive(Clone)]
pub struct Object(Arc<RwLock<ObjectData>>);

impl Object {
    pub fn new(class: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self(Arc::new(RwLock::new(ObjectData {
            class: class.into(),
            fields,
        })))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ObjectData> {
        read_lock(&self.0)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ObjectData> {
        write_lock(&self.0)
    }

    pub fn class(&self) -> String {
        self.read().class.clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.read()
            .fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v.clone())
    }

    pub fn set(&self, field: &str, value: Value) {
        let mut data = self.write();
        match data.fields.iter_mut().find(|(name, _)| name == field) {
            Some(entry) => entry.1 = value,
            None => data.fields.push((field.to_string(), value)),
        }
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of `Integer` and `Long` values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(f64::from(*i)),
            Value::Long(l) => Some(*l as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Pointer identity of values that live in the reference table.
    ///
    /// Single-character and empty strings are written inline and have no
    /// identity; neither do scalars or guids.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::String(s) if s.encode_utf16().nth(1).is_some() => {
                Some(Arc::as_ptr(s) as *const u8 as usize)
            }
            Value::Bytes(b) => Some(Arc::as_ptr(b) as *const u8 as usize),
            Value::Date(d) => Some(Arc::as_ptr(d) as usize),
            Value::List(l) => Some(l.addr()),
            Value::Map(m) => Some(m.addr()),
            Value::Object(o) => Some(o.addr()),
            _ => None,
        }
    }

    /// Returns `true` when both values share the same allocation.
    pub fn same_ref(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Arc::ptr_eq(a, b),
            (Value::Bytes(a), Value::Bytes(b)) => Arc::ptr_eq(a, b),
            (Value::Date(a), Value::Date(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Deep value equality. Containers that are the same allocation compare equal
/// without descending, which keeps comparisons of a cyclic graph with itself
/// finite; two distinct cyclic graphs must not be compared.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b) || *a.read() == *b.read(),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b) || *a.read() == *b.read(),
            (Value::Object(a), Value::Object(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.class == b.class && a.fields == b.fields
            }
            _ => false,
        }
    }
}

struct Depth<'a>(&'a Value, usize);

impl fmt::Debug for Depth<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Depth(value, depth) = *self;
        if depth > DEBUG_DEPTH {
            return f.write_str("..");
        }
        match value {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Long(l) => write!(f, "Long({})", l),
            Value::Double(d) => write!(f, "Double({})", d),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes({:?})", b),
            Value::Date(d) => write!(f, "Date({}{})", d.value, if d.utc { "Z" } else { "" }),
            Value::Guid(g) => write!(f, "Guid({})", g),
            Value::List(l) => f
                .debug_list()
                .entries(l.read().iter().map(|v| Depth(v, depth + 1)))
                .finish(),
            Value::Map(m) => f
                .debug_map()
                .entries(
                    m.read()
                        .iter()
                        .map(|(k, v)| (Depth(k, depth + 1), Depth(v, depth + 1))),
                )
                .finish(),
            Value::Object(o) => {
                let data = o.read();
                let mut s = f.debug_struct(&data.class);
                for (name, v) in &data.fields {
                    s.field(name, &Depth(v, depth + 1));
                }
                s.finish()
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Depth(self, 0).fmt(f)
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Value::List(self.clone()).fmt(f)
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Value::Map(self.clone()).fmt(f)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Value::Object(self.clone()).fmt(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Arc::from(b))
    }
}

impl From<Date> for Value {
    fn from(d: Date) -> Self {
        Value::Date(Arc::new(d))
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(List::new(items))
    }
}

impl From<List> for Value {
    fn from(l: List) -> Self {
        Value::List(l)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
