//! A tiny hprose service shared by the transport tests.
//!
//! Functions:
//! - `sum(a, b, ...)`: integer sum
//! - `echo(x)`: returns `x`
//! - `fail()`: always answers with an error
//! - `inc(x)`: by-reference, increments `x` in place
//! - `sleep(ms)`: answers `ms` after that many milliseconds
//! - `#()`: the client id
//! - `news(id)`: a topic message for subscriber `id`

#![allow(dead_code)]

use std::time::Duration;

use hprose_common::io::{Reader, Writer};
use hprose_common::tags::*;
use hprose_common::{List, Value};

pub const FUNCTIONS: &[&str] = &["sum", "echo", "fail", "inc", "sleep", "#", "news"];

pub struct Request {
    pub name: String,
    pub args: List,
    pub byref: bool,
}

/// Decodes every call of a (possibly batched) request frame. An empty list
/// means the frame asked for the function list.
pub fn parse(request: &[u8]) -> Vec<Request> {
    let mut reader = Reader::new(request.to_vec(), false);
    let mut calls = Vec::new();
    while reader.read_tag() == Some(TAG_CALL) {
        let name = reader.read_string().unwrap();
        let mut args = List::new(Vec::new());
        let mut byref = false;
        if reader.peek_tag() == Some(TAG_LIST) {
            reader.reset();
            args = reader.read_list().unwrap();
            if reader.peek_tag() == Some(TAG_TRUE) {
                reader.read_tag();
                byref = true;
            }
        }
        calls.push(Request { name, args, byref });
    }
    calls
}

fn call(request: &Request) -> Result<Value, String> {
    let args = request.args.to_vec();
    match request.name.as_str() {
        "sum" => Ok(Value::Integer(
            args.iter().filter_map(Value::as_i64).sum::<i64>() as i32,
        )),
        "echo" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
        "fail" => Err("boom".to_string()),
        "inc" => {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            request.args.write()[0] = Value::Integer(n as i32 + 1);
            Ok(Value::Null)
        }
        "sleep" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
        "#" => Ok(Value::from("client-1")),
        "news" => Ok(Value::from("headline")),
        other => Err(format!("Can't find this function {}()", other)),
    }
}

/// Longest `sleep` argument in the request.
pub fn delay_of(requests: &[Request]) -> Duration {
    let ms = requests
        .iter()
        .filter(|r| r.name == "sleep")
        .filter_map(|r| r.args.get(0).and_then(|v| v.as_i64()))
        .max()
        .unwrap_or(0);
    Duration::from_millis(ms as u64)
}

/// Builds the response frame for `requests`.
pub fn respond(requests: &[Request]) -> Vec<u8> {
    let mut writer = Writer::new(false);
    if requests.is_empty() {
        writer.write_tag(TAG_FUNCTIONS);
        let names: Vec<Value> = FUNCTIONS.iter().map(|f| Value::from(*f)).collect();
        writer.serialize(&Value::from(names));
        writer.write_tag(TAG_END);
        return writer.into_bytes();
    }
    for request in requests {
        writer.reset();
        match call(request) {
            Ok(result) => {
                writer.write_tag(TAG_RESULT);
                writer.serialize(&result);
                if request.byref {
                    writer.write_tag(TAG_ARGUMENT);
                    writer.reset();
                    writer.serialize(&Value::List(request.args.clone()));
                }
            }
            Err(message) => {
                writer.write_tag(TAG_ERROR);
                writer.serialize(&Value::from(message));
            }
        }
    }
    writer.write_tag(TAG_END);
    writer.into_bytes()
}

/// Serves one request frame, honoring `sleep`.
pub async fn handle(request: &[u8]) -> Vec<u8> {
    let requests = parse(request);
    let delay = delay_of(&requests);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    respond(&requests)
}

pub fn args(values: Vec<Value>) -> List {
    List::new(values)
}
