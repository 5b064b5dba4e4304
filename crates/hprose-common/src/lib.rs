//! Hprose Common Types and Codec
//!
//! This crate provides the value model, the binary codec and the error
//! taxonomy shared by the hprose client and command line tool.
//!
//! # Overview
//!
//! Hprose is a self-describing, tag-based serialization format. Every encoded
//! value starts with a one-byte tag; strings, containers and objects that
//! occur more than once in a graph are written once and referenced by index
//! afterwards, so shared and cyclic structures survive a round trip.
//!
//! - **Protocol Layer**: [`Value`], tags, [`HproseError`], JSON-RPC envelope
//!   types and conversion to and from `serde_json`
//! - **I/O Layer**: [`io::ByteBuffer`], [`io::Writer`], [`io::Reader`] and the raw
//!   value copier
//!
//! # Wire Format
//!
//! ```text
//! 5                  integer 5
//! i1234;             integer 1234
//! s5"hello"          string
//! a2{1u2}            list [1, "2"]
//! m1{ua1}            map {"a": 1}
//! r0;                back-reference to the first registered value
//! ```
//!
//! # Example
//!
//! ```
//! use hprose_common::io::{Reader, Writer};
//! use hprose_common::Value;
//!
//! let mut writer = Writer::new(false);
//! writer.serialize(&Value::from(vec![Value::Integer(1), Value::from("two")]));
//! let bytes = writer.into_bytes();
//! assert_eq!(bytes, b"a2{1s3\"two\"}");
//!
//! let value = Reader::new(bytes, false).unserialize().unwrap();
//! assert_eq!(value.as_list().unwrap().get(1), Some(Value::from("two")));
//! ```

pub mod io;
pub mod protocol;

pub use protocol::*;
