//! Call and response frames.
//!
//! ```text
//! call:      C <name> [a{args} [t]] z
//! batch:     C <name> ... C <name> ... z
//! reply:     R <value> [A a{args}] z   |   E <message> z
//! functions: z  ->  F a{names} z
//! ```
//!
//! The codec reference table restarts before every argument list and before
//! every `R`, `A` and `E` segment.

use std::sync::Arc;

use hprose_common::error::missing_end;
use hprose_common::io::{ClassRegistry, Reader, Writer};
use hprose_common::tags::*;
use hprose_common::{HproseError, List, Result, Value};
use tracing::warn;

use crate::context::ResultMode;

pub(crate) fn new_writer(simple: bool, registry: &Arc<ClassRegistry>) -> Writer {
    Writer::new(simple).with_registry(registry.clone())
}

fn new_reader(bytes: Vec<u8>, simple: bool, registry: &Arc<ClassRegistry>) -> Reader {
    Reader::new(bytes, simple).with_registry(registry.clone())
}

/// Appends one call (without the end tag) to `writer`.
pub fn write_call(writer: &mut Writer, name: &str, args: &List, byref: bool) {
    writer.write_tag(TAG_CALL);
    writer.write_str(name);
    if !args.is_empty() || byref {
        writer.reset();
        writer.serialize(&Value::List(args.clone()));
        if byref {
            writer.write_bool(true);
        }
    }
}

/// Encodes a complete single-call request.
pub fn encode_call(
    name: &str,
    args: &List,
    byref: bool,
    simple: bool,
    registry: &Arc<ClassRegistry>,
) -> Vec<u8> {
    let mut writer = new_writer(simple, registry);
    write_call(&mut writer, name, args, byref);
    writer.write_tag(TAG_END);
    writer.into_bytes()
}

/// Per-call decoding options of one batch entry.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub args: List,
    pub mode: ResultMode,
}

/// Decodes a single-call response.
///
/// # Errors
///
/// [`HproseError::Remote`] when the server answered with an error segment;
/// codec errors when the frame is malformed.
pub fn decode_response(
    bytes: Vec<u8>,
    mode: ResultMode,
    args: &List,
    simple: bool,
    registry: &Arc<ClassRegistry>,
) -> Result<Value> {
    match mode {
        ResultMode::RawWithEndTag => return Ok(Value::from(bytes)),
        ResultMode::Raw => {
            let mut bytes = bytes;
            if bytes.last() == Some(&TAG_END) {
                bytes.pop();
            }
            return Ok(Value::from(bytes));
        }
        ResultMode::Normal | ResultMode::Serialized => {}
    }

    let mut reader = new_reader(bytes, simple, registry);
    if reader.peek_tag() == Some(TAG_END) {
        return Ok(Value::Null);
    }
    let outcome = read_reply(&mut reader, mode, args)?;
    match reader.read_tag() {
        Some(TAG_END) => outcome,
        tag => Err(missing_end(tag)),
    }
}

/// Decodes a batch response into one result per entry, in order.
///
/// A malformed or short response fails only the entries that had not been
/// decoded yet.
pub fn decode_batch(
    bytes: Vec<u8>,
    entries: &[BatchEntry],
    simple: bool,
    registry: &Arc<ClassRegistry>,
) -> Vec<Result<Value>> {
    let mut reader = new_reader(bytes, simple, registry);
    let mut results = Vec::with_capacity(entries.len());

    for entry in entries {
        if reader.peek_tag() == Some(TAG_END) {
            let err = HproseError::Protocol(format!(
                "expected {} results, got {}",
                entries.len(),
                results.len()
            ));
            fill_remaining(&mut results, entries.len(), err);
            return results;
        }

        let start = reader.buffer().position();
        match read_reply(&mut reader, entry.mode, &entry.args) {
            Ok(outcome) => {
                let end = reader.buffer().position();
                let outcome = match entry.mode {
                    ResultMode::Raw => Ok(segment(&reader, start, end, false)),
                    ResultMode::RawWithEndTag => Ok(segment(&reader, start, end, true)),
                    ResultMode::Normal | ResultMode::Serialized => outcome,
                };
                results.push(outcome);
            }
            Err(err) => {
                fill_remaining(&mut results, entries.len(), err);
                return results;
            }
        }
    }

    match reader.read_tag() {
        Some(TAG_END) => {}
        tag => warn!(
            tag = ?tag.map(char::from),
            "batch response carries more segments than calls"
        ),
    }
    results
}

fn fill_remaining(results: &mut Vec<Result<Value>>, total: usize, err: HproseError) {
    while results.len() < total {
        results.push(Err(err.clone()));
    }
}

fn segment(reader: &Reader, start: usize, end: usize, with_end_tag: bool) -> Value {
    let mut bytes = reader.buffer().as_slice()[start..end].to_vec();
    if with_end_tag {
        bytes.push(TAG_END);
    }
    Value::from(bytes)
}

/// Reads one `R`/`E` segment. The outer error means the stream is unusable,
/// the inner one is the server's answer.
fn read_reply(reader: &mut Reader, mode: ResultMode, args: &List) -> Result<Result<Value>> {
    match reader.read_tag() {
        Some(TAG_RESULT) => {
            reader.reset();
            let result = match mode {
                ResultMode::Serialized => Value::from(reader.read_raw()?.into_vec()),
                _ => reader.unserialize()?,
            };
            if reader.peek_tag() == Some(TAG_ARGUMENT) {
                reader.read_tag();
                reader.reset();
                let out = reader.read_list()?;
                copy_back(args, &out);
            }
            Ok(Ok(result))
        }
        Some(TAG_ERROR) => {
            reader.reset();
            let message = reader.read_string()?;
            Ok(Err(HproseError::Remote(message)))
        }
        tag => Err(HproseError::unexpected_tag(tag, &[TAG_RESULT, TAG_ERROR, TAG_END])),
    }
}

/// Writes by-reference outputs back into the caller's argument list.
fn copy_back(args: &List, out: &List) {
    let out = out.to_vec();
    let mut args = args.write();
    for (slot, value) in args.iter_mut().zip(out) {
        *slot = value;
    }
}

/// Request asking the server for its published function names.
pub fn encode_functions_request() -> Vec<u8> {
    vec![TAG_END]
}

pub fn decode_functions(bytes: Vec<u8>, registry: &Arc<ClassRegistry>) -> Result<Vec<String>> {
    let mut reader = new_reader(bytes, false, registry);
    match reader.read_tag() {
        Some(TAG_FUNCTIONS) => {
            reader.reset();
            let names = reader
                .read_list()?
                .to_vec()
                .into_iter()
                .map(|name| {
                    name.as_str().map(str::to_string).ok_or_else(|| {
                        HproseError::Protocol(format!("function name is not a string: {:?}", name))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            reader.check_tag(TAG_END)?;
            Ok(names)
        }
        Some(TAG_ERROR) => {
            reader.reset();
            Err(HproseError::Remote(reader.read_string()?))
        }
        tag => Err(HproseError::unexpected_tag(tag, &[TAG_FUNCTIONS, TAG_ERROR])),
    }
}
