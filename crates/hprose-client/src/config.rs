use std::time::Duration;

use crate::context::ResultMode;

/// Client-wide call defaults and transport settings.
///
/// Every call starts from these values; per-method settings and call-site
/// overrides are layered on top (see [`InvokeSettings`](crate::InvokeSettings)).
///
/// # Default Configuration
///
/// - `timeout`: 30 seconds (`Duration::ZERO` disables the timeout)
/// - `retry`: 10 attempts, only used by idempotent calls
/// - every flag off, result mode [`ResultMode::Normal`]
///
/// # Example
///
/// ```rust
/// use hprose_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     timeout: Duration::from_secs(5),
///     idempotent: true,
///     failswitch: true,
///     ..ClientConfig::default()
/// };
/// assert_eq!(config.retry, 10);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    /// Maximum re-sends of a failed idempotent call
    pub retry: u32,
    pub idempotent: bool,
    /// Rotate to the next endpoint after a retryable failure
    pub failswitch: bool,
    pub oneway: bool,
    pub sync: bool,
    pub byref: bool,
    /// Disable reference tracking in the codec
    pub simple: bool,
    pub mode: ResultMode,
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
    pub tcp: TcpConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: 10,
            idempotent: false,
            failswitch: false,
            oneway: false,
            sync: false,
            byref: false,
            simple: false,
            mode: ResultMode::Normal,
            http: HttpConfig::default(),
            websocket: WebSocketConfig::default(),
            tcp: TcpConfig::default(),
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
    /// When false every request carries `Connection: close`
    pub keep_alive: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            keep_alive: true,
        }
    }
}

/// WebSocket transport settings.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Requests allowed in flight on the socket; later ones wait for a slot
    pub max_requests: usize,
    /// Keep the socket open when no request is pending
    pub keep_alive: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            keep_alive: true,
        }
    }
}

/// TCP transport settings.
///
/// # Default Configuration
///
/// - `full_duplex`: false (one request per connection at a time)
/// - `max_connections`: 10 per address
/// - `max_in_flight`: 10 per full-duplex connection
/// - `idle_timeout`: 30 seconds
/// - `no_delay`: true
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub full_duplex: bool,
    pub max_connections: usize,
    pub max_in_flight: usize,
    /// Idle connections older than this are closed
    pub idle_timeout: Duration,
    pub no_delay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            full_duplex: false,
            max_connections: 10,
            max_in_flight: 10,
            idle_timeout: Duration::from_secs(30),
            no_delay: true,
        }
    }
}
