//! Per-call invocation context and settings resolution.
//!
//! A [`Context`] is built for every call from the client defaults, then the
//! per-method [`InvokeSettings`], then the call-site settings. Each layer only
//! overrides the fields it actually sets.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hprose_common::{HproseError, List, Map, Result, Value};

use crate::config::ClientConfig;

/// How a call's result is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// Decode the result value
    #[default]
    Normal,
    /// Return the encoded bytes of the result value only
    Serialized,
    /// Return the whole response without its trailing end tag
    Raw,
    /// Return the whole response as received
    RawWithEndTag,
}

impl ResultMode {
    /// Maps the numeric codes used in trailing call arguments (0 to 3).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ResultMode::Normal),
            1 => Some(ResultMode::Serialized),
            2 => Some(ResultMode::Raw),
            3 => Some(ResultMode::RawWithEndTag),
            _ => None,
        }
    }
}

/// What a [`Callback`] is told about a finished call.
#[derive(Debug)]
pub enum Outcome<'a> {
    Success {
        result: &'a Value,
        /// Call arguments, updated in place for by-reference calls
        args: &'a List,
    },
    Failure {
        method: &'a str,
        error: &'a HproseError,
    },
}

/// A success or error handler attached to a call, a method or the client.
///
/// The slot a callback fills is decided by where it is attached, not by the
/// constructor used; [`Callback::success`] and [`Callback::error`] just ignore
/// the outcome kind they are not interested in. Returning an error from a
/// success handler turns the call into a failure.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Outcome<'_>) -> Result<()> + Send + Sync>);

impl Callback {
    pub fn new(f: impl Fn(Outcome<'_>) -> Result<()> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn success(f: impl Fn(&Value, &List) -> Result<()> + Send + Sync + 'static) -> Self {
        Self::new(move |outcome| match outcome {
            Outcome::Success { result, args } => f(result, args),
            Outcome::Failure { .. } => Ok(()),
        })
    }

    pub fn error(f: impl Fn(&str, &HproseError) + Send + Sync + 'static) -> Self {
        Self::new(move |outcome| {
            if let Outcome::Failure { method, error } = outcome {
                f(method, error);
            }
            Ok(())
        })
    }

    pub fn call(&self, outcome: Outcome<'_>) -> Result<()> {
        (self.0)(outcome)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Optional per-call or per-method overrides.
///
/// # Example
///
/// ```rust
/// use hprose_client::{InvokeSettings, ResultMode};
/// use std::time::Duration;
///
/// let settings = InvokeSettings::new()
///     .idempotent(true)
///     .retry(3)
///     .timeout(Duration::from_millis(500))
///     .mode(ResultMode::Serialized);
/// assert_eq!(settings.retry, Some(3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InvokeSettings {
    pub timeout: Option<Duration>,
    pub retry: Option<u32>,
    pub idempotent: Option<bool>,
    pub failswitch: Option<bool>,
    pub oneway: Option<bool>,
    pub sync: Option<bool>,
    pub mode: Option<ResultMode>,
    pub byref: Option<bool>,
    pub simple: Option<bool>,
    pub on_success: Option<Callback>,
    pub on_error: Option<Callback>,
    pub userdata: HashMap<String, Value>,
}

impl InvokeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn failswitch(mut self, failswitch: bool) -> Self {
        self.failswitch = Some(failswitch);
        self
    }

    pub fn oneway(mut self, oneway: bool) -> Self {
        self.oneway = Some(oneway);
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn mode(mut self, mode: ResultMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn byref(mut self, byref: bool) -> Self {
        self.byref = Some(byref);
        self
    }

    pub fn simple(mut self, simple: bool) -> Self {
        self.simple = Some(simple);
        self
    }

    pub fn on_success(mut self, callback: Callback) -> Self {
        self.on_success = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: Callback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn userdata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.userdata.insert(key.into(), value);
        self
    }

    /// Overrides every field that `other` sets.
    pub fn merge(&mut self, other: &InvokeSettings) {
        fn pick<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        pick(&mut self.timeout, &other.timeout);
        pick(&mut self.retry, &other.retry);
        pick(&mut self.idempotent, &other.idempotent);
        pick(&mut self.failswitch, &other.failswitch);
        pick(&mut self.oneway, &other.oneway);
        pick(&mut self.sync, &other.sync);
        pick(&mut self.mode, &other.mode);
        pick(&mut self.byref, &other.byref);
        pick(&mut self.simple, &other.simple);
        pick(&mut self.on_success, &other.on_success);
        pick(&mut self.on_error, &other.on_error);
        for (key, value) in &other.userdata {
            self.userdata.insert(key.clone(), value.clone());
        }
    }

    /// Reads a bag of named overrides. `timeout` is in milliseconds, `mode`
    /// is a [`ResultMode::from_code`] number; unknown keys become user data.
    ///
    /// # Errors
    ///
    /// [`HproseError::Configuration`] when a known key has the wrong type.
    pub fn from_map(map: &Map) -> Result<Self> {
        let mut settings = InvokeSettings::new();
        for (key, value) in map.read().iter() {
            let Some(key) = key.as_str() else {
                return Err(HproseError::Configuration(format!(
                    "settings key must be a string, got {:?}",
                    key
                )));
            };
            match key {
                "timeout" => {
                    let ms = non_negative(key, value)?;
                    settings.timeout = Some(Duration::from_millis(ms));
                }
                "retry" => {
                    let retry = non_negative(key, value)?;
                    settings.retry = Some(u32::try_from(retry).unwrap_or(u32::MAX));
                }
                "idempotent" => settings.idempotent = Some(flag(key, value)?),
                "failswitch" => settings.failswitch = Some(flag(key, value)?),
                "oneway" => settings.oneway = Some(flag(key, value)?),
                "sync" => settings.sync = Some(flag(key, value)?),
                "byref" => settings.byref = Some(flag(key, value)?),
                "simple" => settings.simple = Some(flag(key, value)?),
                "mode" => {
                    let code = value.as_i64().unwrap_or(-1);
                    settings.mode = Some(ResultMode::from_code(code).ok_or_else(|| {
                        HproseError::Configuration(format!("invalid result mode {:?}", value))
                    })?);
                }
                _ => {
                    settings.userdata.insert(key.to_string(), value.clone());
                }
            }
        }
        Ok(settings)
    }
}

fn flag(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| HproseError::Configuration(format!("{} must be a boolean", key)))
}

fn non_negative(key: &str, value: &Value) -> Result<u64> {
    value
        .as_i64()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| HproseError::Configuration(format!("{} must be a non-negative integer", key)))
}

/// Resolved state of one call.
#[derive(Debug, Clone)]
pub struct Context {
    pub method: String,
    /// Endpoint the current attempt is sent to
    pub uri: String,
    pub timeout: Duration,
    pub retry: u32,
    /// Attempts re-sent so far
    pub retried: u32,
    pub idempotent: bool,
    pub failswitch: bool,
    pub oneway: bool,
    pub sync: bool,
    pub byref: bool,
    pub simple: bool,
    pub mode: ResultMode,
    pub on_success: Option<Callback>,
    pub on_error: Option<Callback>,
    pub userdata: HashMap<String, Value>,
    /// Headers of the last HTTP response, when the transport has any
    pub response_headers: Vec<(String, String)>,
}

impl Context {
    pub fn new(method: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            method: method.into(),
            uri: String::new(),
            timeout: config.timeout,
            retry: config.retry,
            retried: 0,
            idempotent: config.idempotent,
            failswitch: config.failswitch,
            oneway: config.oneway,
            sync: config.sync,
            byref: config.byref,
            simple: config.simple,
            mode: config.mode,
            on_success: None,
            on_error: None,
            userdata: HashMap::new(),
            response_headers: Vec::new(),
        }
    }

    /// Layers `settings` over the current values.
    pub fn apply(&mut self, settings: &InvokeSettings) {
        if let Some(timeout) = settings.timeout {
            self.timeout = timeout;
        }
        if let Some(retry) = settings.retry {
            self.retry = retry;
        }
        if let Some(idempotent) = settings.idempotent {
            self.idempotent = idempotent;
        }
        if let Some(failswitch) = settings.failswitch {
            self.failswitch = failswitch;
        }
        if let Some(oneway) = settings.oneway {
            self.oneway = oneway;
        }
        if let Some(sync) = settings.sync {
            self.sync = sync;
        }
        if let Some(mode) = settings.mode {
            self.mode = mode;
        }
        if let Some(byref) = settings.byref {
            self.byref = byref;
        }
        if let Some(simple) = settings.simple {
            self.simple = simple;
        }
        if settings.on_success.is_some() {
            self.on_success.clone_from(&settings.on_success);
        }
        if settings.on_error.is_some() {
            self.on_error.clone_from(&settings.on_error);
        }
        for (key, value) in &settings.userdata {
            self.userdata.insert(key.clone(), value.clone());
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Looks up a response header by case-insensitive name.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One item of a loosely typed call: an argument, a callback or settings.
#[derive(Debug, Clone)]
pub enum CallArg {
    Value(Value),
    Callback(Callback),
    Settings(InvokeSettings),
}

impl From<Value> for CallArg {
    fn from(value: Value) -> Self {
        CallArg::Value(value)
    }
}

impl From<Callback> for CallArg {
    fn from(callback: Callback) -> Self {
        CallArg::Callback(callback)
    }
}

impl From<InvokeSettings> for CallArg {
    fn from(settings: InvokeSettings) -> Self {
        CallArg::Settings(settings)
    }
}

/// Splits a loosely typed call into its arguments and trailing overrides.
///
/// Arguments run up to the first callback or settings item. In the tail that
/// follows, the first callback is the success handler and the next one the
/// error handler; a boolean sets by-reference passing, an integer the result
/// mode and a map is read with [`InvokeSettings::from_map`]. Later tail items
/// override earlier ones.
///
/// # Errors
///
/// [`HproseError::Configuration`] for a tail item of any other kind.
pub fn split_call_args(items: Vec<CallArg>) -> Result<(List, InvokeSettings)> {
    let tail_start = items
        .iter()
        .position(|item| !matches!(item, CallArg::Value(_)))
        .unwrap_or(items.len());

    let mut items = items.into_iter();
    let args: Vec<Value> = items
        .by_ref()
        .take(tail_start)
        .filter_map(|item| match item {
            CallArg::Value(value) => Some(value),
            _ => None,
        })
        .collect();

    let mut settings = InvokeSettings::new();
    let mut callbacks = 0;
    for item in items {
        match item {
            CallArg::Callback(callback) => {
                if callbacks == 0 {
                    settings.on_success = Some(callback);
                } else {
                    settings.on_error = Some(callback);
                }
                callbacks += 1;
            }
            CallArg::Settings(overrides) => settings.merge(&overrides),
            CallArg::Value(Value::Bool(byref)) => settings.byref = Some(byref),
            CallArg::Value(value @ (Value::Integer(_) | Value::Long(_))) => {
                let code = value.as_i64().unwrap_or(-1);
                settings.mode = Some(ResultMode::from_code(code).ok_or_else(|| {
                    HproseError::Configuration(format!("invalid result mode {}", code))
                })?);
            }
            CallArg::Value(Value::Map(map)) => settings.merge(&InvokeSettings::from_map(&map)?),
            CallArg::Value(other) => {
                return Err(HproseError::Configuration(format!(
                    "unexpected trailing argument {:?}",
                    other
                )))
            }
        }
    }
    Ok((List::new(args), settings))
}
