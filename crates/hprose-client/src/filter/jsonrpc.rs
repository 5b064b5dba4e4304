//! Talks JSON-RPC 2.0 to the server while the client keeps speaking hprose.
//!
//! Outgoing call frames are decoded and re-encoded as a JSON-RPC request (or
//! a batch array for several calls); incoming JSON-RPC responses are turned
//! back into `R`/`E` segments.

use std::sync::atomic::{AtomicU64, Ordering};

use hprose_common::io::{Reader, Writer};
use hprose_common::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use hprose_common::tags::*;
use hprose_common::{from_json, to_json, HproseError, Result, Value};
use serde_json::Value as JsonValue;

use super::Filter;
use crate::context::Context;

#[derive(Debug, Default)]
pub struct JsonRpcFilter {
    next_id: AtomicU64,
}

impl JsonRpcFilter {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_calls(&self, request: Vec<u8>) -> Result<Vec<JsonRpcRequest>> {
        let mut reader = Reader::new(request, false);
        let mut calls = Vec::new();
        loop {
            match reader.read_tag() {
                Some(TAG_CALL) => {
                    let method = reader.read_string()?;
                    let mut params = Vec::new();
                    if reader.peek_tag() == Some(TAG_LIST) {
                        reader.reset();
                        for arg in reader.read_list()?.to_vec() {
                            params.push(to_json(&arg)?);
                        }
                        if reader.peek_tag() == Some(TAG_TRUE) {
                            reader.read_tag();
                        }
                    }
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    calls.push(JsonRpcRequest::new(method, JsonValue::Array(params), id));
                }
                Some(TAG_END) => return Ok(calls),
                tag => return Err(HproseError::unexpected_tag(tag, &[TAG_CALL, TAG_END])),
            }
        }
    }
}

impl Filter for JsonRpcFilter {
    fn outgoing(&self, request: Vec<u8>, _ctx: &Context) -> Result<Vec<u8>> {
        if request.first() != Some(&TAG_CALL) {
            // Not a call frame, e.g. a function list request.
            return Ok(request);
        }
        let mut calls = self.decode_calls(request)?;
        let body = if calls.len() == 1 {
            serde_json::to_vec(&calls.remove(0))?
        } else {
            serde_json::to_vec(&calls)?
        };
        Ok(body)
    }

    fn incoming(&self, response: Vec<u8>, _ctx: &Context) -> Result<Vec<u8>> {
        let json: JsonValue = serde_json::from_slice(&response)?;
        let mut responses: Vec<JsonRpcResponse> = match json {
            JsonValue::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<std::result::Result<_, _>>()?,
            single => vec![serde_json::from_value(single)?],
        };
        // Ids were handed out in call order.
        responses.sort_by_key(|r| r.id.as_u64().unwrap_or(u64::MAX));

        let mut writer = Writer::new(false);
        for response in responses {
            writer.reset();
            match response.into_result() {
                Ok(result) => {
                    writer.write_tag(TAG_RESULT);
                    writer.serialize(&from_json(&result));
                }
                Err(error) => {
                    writer.write_tag(TAG_ERROR);
                    writer.serialize(&Value::from(error.to_string()));
                }
            }
        }
        writer.write_tag(TAG_END);
        Ok(writer.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use serde_json::json;

    fn ctx() -> Context {
        Context::new("m", &ClientConfig::default())
    }

    #[test]
    fn test_single_call_becomes_request_object() {
        let filter = JsonRpcFilter::new();
        let out = filter
            .outgoing(b"Cs3\"sum\"a2{12}z".to_vec(), &ctx())
            .unwrap();
        let json: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            json,
            json!({"jsonrpc": "2.0", "method": "sum", "params": [1, 2], "id": 0})
        );
    }

    #[test]
    fn test_batch_becomes_array() {
        let filter = JsonRpcFilter::new();
        let out = filter.outgoing(b"CuaCs2\"bc\"a1{ux}z".to_vec(), &ctx()).unwrap();
        let json: JsonValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(json[0]["method"], "a");
        assert_eq!(json[0]["params"], json!([]));
        assert_eq!(json[1]["params"], json!(["x"]));
        assert_eq!(json[1]["id"], 1);
    }

    #[test]
    fn test_non_call_frames_pass_through() {
        let filter = JsonRpcFilter::new();
        assert_eq!(filter.outgoing(b"z".to_vec(), &ctx()).unwrap(), b"z");
    }

    #[test]
    fn test_responses_become_segments_in_id_order() {
        let filter = JsonRpcFilter::new();
        let body = br#"[
            {"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":8},
            {"jsonrpc":"2.0","result":"hi","id":7}
        ]"#;
        let out = filter.incoming(body.to_vec(), &ctx()).unwrap();
        assert_eq!(out, b"Rs2\"hi\"Es25\"Method not found (-32601)\"z");
    }

    #[test]
    fn test_invalid_json_is_a_protocol_error() {
        let filter = JsonRpcFilter::new();
        assert!(matches!(
            filter.incoming(b"Rz".to_vec(), &ctx()),
            Err(HproseError::Protocol(_))
        ));
    }
}
