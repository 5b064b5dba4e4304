//! Byte-level I/O for the hprose wire format.
//!
//! # Components
//!
//! - **[`ByteBuffer`]**: growable buffer with independent read/write cursors
//! - **[`Writer`]**: serializes [`Value`](crate::Value) graphs, emitting back-references for shared allocations
//! - **[`Reader`]**: the symmetric decoder
//! - **[`raw`]**: copies one encoded value verbatim without decoding it
//! - **[`ClassRegistry`]**: local class name <-> wire alias mapping
//!
//! # Example
//!
//! ```
//! use hprose_common::io::{Reader, Writer};
//! use hprose_common::{List, Value};
//!
//! let list = List::new(vec![Value::from("hello")]);
//! list.push(Value::List(list.clone()));
//!
//! let mut writer = Writer::new(false);
//! writer.serialize(&Value::List(list));
//! assert_eq!(writer.buffer().as_slice(), b"a2{s5\"hello\"r0;}");
//!
//! let mut reader = Reader::new(writer.into_buffer(), false);
//! let decoded = reader.unserialize().unwrap();
//! let decoded = decoded.as_list().unwrap();
//! assert!(decoded.get(1).unwrap().as_list().unwrap().ptr_eq(decoded));
//! ```

pub mod buffer;
pub mod class_registry;
pub mod raw;
pub mod reader;
pub mod writer;

pub use buffer::ByteBuffer;
pub use class_registry::ClassRegistry;
pub use raw::{read_raw, read_raw_value};
pub use reader::Reader;
pub use writer::Writer;
