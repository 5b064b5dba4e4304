//! Byte transports between the client and a server.
//!
//! A transport moves one encoded request frame to the endpoint named in the
//! call's [`Context`] and hands back the raw response frame. It knows nothing
//! about tags or values.
//!
//! | scheme              | transport |
//! |---------------------|-----------|
//! | `http`              | [`HttpTransport`], one POST per call |
//! | `ws`                | [`WebSocketTransport`], one socket, requests tagged by id |
//! | `tcp`/`tcp4`/`tcp6` | [`HalfDuplexTransport`] or, with [`TcpConfig::full_duplex`](crate::TcpConfig), [`FullDuplexTransport`] |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hprose_common::{HproseError, Result};

use crate::config::ClientConfig;
use crate::context::Context;

pub mod http;
pub mod tcp;
pub mod websocket;

pub use http::HttpTransport;
pub use tcp::{FullDuplexTransport, HalfDuplexTransport};
pub use websocket::WebSocketTransport;

/// Sends a request frame and waits for its response frame.
///
/// Implementations must honor `ctx.timeout` (zero disables it) and send to
/// `ctx.uri`, which can change between attempts when failover is enabled.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_and_receive(&self, request: Vec<u8>, ctx: &mut Context) -> Result<Vec<u8>>;

    /// Drops persistent connections. Later calls reconnect.
    async fn close(&self) {}
}

/// Races `fut` against `timeout`. A zero timeout waits forever.
pub async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if timeout.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HproseError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Returns the lower-cased scheme of `uri`.
pub fn scheme_of(uri: &str) -> Result<String> {
    match uri.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => {
            Ok(scheme.to_ascii_lowercase())
        }
        _ => Err(HproseError::Configuration(format!("invalid uri '{}'", uri))),
    }
}

fn family(scheme: &str) -> &str {
    match scheme {
        "tcp4" | "tcp6" => "tcp",
        other => other,
    }
}

/// Picks the transport for an endpoint list.
///
/// # Errors
///
/// [`HproseError::Configuration`] when the list is empty, a scheme is not
/// supported, or the endpoints mix transport families.
pub fn create(uris: &[String], config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    let first = uris
        .first()
        .ok_or_else(|| HproseError::Configuration("no endpoint configured".into()))?;
    let scheme = scheme_of(first)?;
    for uri in &uris[1..] {
        let other = scheme_of(uri)?;
        if family(&other) != family(&scheme) {
            return Err(HproseError::Configuration(format!(
                "endpoints mix '{}' and '{}' schemes",
                scheme, other
            )));
        }
    }

    let transport: Arc<dyn Transport> = match scheme.as_str() {
        "http" => Arc::new(HttpTransport::new(config.http.clone())),
        "ws" => Arc::new(WebSocketTransport::new(config.websocket.clone())),
        "tcp" | "tcp4" | "tcp6" if config.tcp.full_duplex => {
            Arc::new(FullDuplexTransport::new(config.tcp.clone()))
        }
        "tcp" | "tcp4" | "tcp6" => Arc::new(HalfDuplexTransport::new(config.tcp.clone())),
        other => {
            return Err(HproseError::Configuration(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    };
    Ok(transport)
}
