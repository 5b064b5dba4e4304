pub mod convert;
pub mod error;
pub mod jsonrpc;
pub mod tags;
pub mod value;

#[cfg(test)]
mod tests;

pub use convert::{from_json, to_json};
pub use error::{HproseError, Result};
pub use value::{Date, List, Map, Object, ObjectData, Value};
