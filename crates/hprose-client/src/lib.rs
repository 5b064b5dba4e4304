//! Hprose RPC Client
//!
//! An asynchronous hprose client for tokio.
//!
//! # Architecture
//!
//! - **[`Client`]**: the call pipeline. It layers settings, runs filters,
//!   retries idempotent calls with optional failover, queues synchronous calls,
//!   batches calls and polls topics
//! - **[`Transport`]**: moves encoded frames over HTTP, WebSocket or TCP (half
//!   or full duplex), picked from the endpoint scheme
//! - **[`Filter`]**: byte-level hooks around the transport, such as
//!   [`JsonRpcFilter`]
//!
//! # Example
//!
//! ```rust,no_run
//! use hprose_client::{Callback, Client, ClientConfig, InvokeSettings};
//! use hprose_common::Value;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> hprose_common::Result<()> {
//! let config = ClientConfig {
//!     timeout: Duration::from_secs(5),
//!     ..ClientConfig::default()
//! };
//! let client = Client::with_config(["tcp://10.0.0.1:4321", "tcp://10.0.0.2:4321"], config)?;
//!
//! let settings = InvokeSettings::new()
//!     .idempotent(true)
//!     .failswitch(true)
//!     .on_error(Callback::error(|method, error| eprintln!("{} failed: {}", method, error)));
//! let greeting = client.invoke("hello", vec![Value::from("world")], settings).await?;
//! println!("{:?}", greeting);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod endpoints;
pub mod filter;
pub mod pending;
pub mod topic;
pub mod transport;

pub use client::{Client, FailswitchHook};
pub use config::{ClientConfig, HttpConfig, TcpConfig, WebSocketConfig};
pub use context::{split_call_args, CallArg, Callback, Context, InvokeSettings, Outcome, ResultMode};
pub use endpoints::EndpointSet;
pub use filter::{Filter, FilterChain, JsonRpcFilter};
pub use pending::{Call, Pending};
pub use topic::TopicCallback;
pub use transport::Transport;
