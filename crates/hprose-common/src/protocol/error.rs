use std::sync::Arc;
use thiserror::Error;

use super::tags;

#[derive(Error, Debug, Clone)]
pub enum HproseError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Unexpected tag: {}{}", describe_tag(.tag), describe_expected(.expected))]
    UnexpectedTag {
        tag: Option<u8>,
        expected: Option<String>,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unexpected end of stream")]
    EndOfStream,

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl HproseError {
    /// Builds an [`HproseError::UnexpectedTag`] listing the tags that were acceptable.
    pub fn unexpected_tag(tag: Option<u8>, expected: &[u8]) -> Self {
        HproseError::UnexpectedTag {
            tag,
            expected: if expected.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(expected).into_owned())
            },
        }
    }

    /// Returns `true` for failures worth re-sending: transport and timeout errors.
    ///
    /// Codec errors mean the stream itself is corrupt and remote errors are the
    /// server's final answer, so neither is ever retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HproseError::Timeout(_)
                | HproseError::Transport(_)
                | HproseError::Http { .. }
                | HproseError::Io(_)
        )
    }
}

impl From<std::io::Error> for HproseError {
    fn from(err: std::io::Error) -> Self {
        HproseError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for HproseError {
    fn from(err: serde_json::Error) -> Self {
        HproseError::Protocol(format!("invalid JSON: {}", err))
    }
}

fn describe_tag(tag: &Option<u8>) -> String {
    match *tag {
        Some(t) if t.is_ascii_graphic() => format!("'{}' (0x{:02x})", t as char, t),
        Some(t) => format!("0x{:02x}", t),
        None => "end of stream".to_string(),
    }
}

fn describe_expected(expected: &Option<String>) -> String {
    match expected {
        Some(e) => format!(", expected one of \"{}\"", e),
        None => String::new(),
    }
}

/// Shorthand used by readers: "got `tag`, wanted exactly `wanted`".
pub(crate) fn expect_tag(tag: Option<u8>, wanted: u8) -> HproseError {
    HproseError::unexpected_tag(tag, &[wanted])
}

/// Shorthand for an end tag that never arrived.
pub fn missing_end(tag: Option<u8>) -> HproseError {
    HproseError::unexpected_tag(tag, &[tags::TAG_END])
}

pub type Result<T> = std::result::Result<T, HproseError>;
