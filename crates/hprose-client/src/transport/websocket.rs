//! WebSocket transport.
//!
//! All calls share one socket. Each binary message is `[u32 BE id][frame]`,
//! ids are 31-bit and wrap around, and a reader task hands each response to
//! the request with the same id, so responses may arrive in any order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hprose_common::{HproseError, Result};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{with_timeout, Transport};
use crate::config::WebSocketConfig;
use crate::context::Context;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Waiter = oneshot::Sender<Result<Vec<u8>>>;

struct Connection {
    uri: String,
    sink: tokio::sync::Mutex<SplitSink<Socket, Message>>,
    pending: Mutex<HashMap<u32, Waiter>>,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take(&self, id: u32) -> Option<Waiter> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    fn fail_all(&self, error: HproseError) {
        self.closed.store(true, Ordering::Release);
        let waiters: Vec<Waiter> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, waiter)| waiter)
            .collect();
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Fails pending requests, stops the reader and sends a close frame.
    fn shutdown(self: &Arc<Self>, reason: &str) {
        self.fail_all(HproseError::Transport(reason.to_string()));
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let conn = self.clone();
            runtime.spawn(async move {
                let _ = conn.sink.lock().await.close().await;
            });
        }
    }
}

async fn read_loop(conn: Arc<Connection>, mut stream: SplitStream<Socket>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if data.len() < 4 {
                    warn!(len = data.len(), "Dropping short websocket message");
                    continue;
                }
                let id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                match conn.take(id) {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(data[4..].to_vec()));
                    }
                    None => warn!(id, "Dropping response for unknown request id"),
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, uri = %conn.uri, "WebSocket read failed");
                break;
            }
        }
    }
    conn.fail_all(HproseError::Transport("websocket closed".into()));
}

/// Removes a request from the pending table when it finishes or is dropped
/// by a timeout, and tears an idle socket down when keep-alive is off.
struct PendingRequest {
    conn: Arc<Connection>,
    id: u32,
    keep_alive: bool,
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.conn.take(self.id);
        if !self.keep_alive && !self.conn.is_closed() && self.conn.pending_count() == 0 {
            debug!(uri = %self.conn.uri, "Closing idle websocket");
            self.conn.shutdown("websocket closed");
        }
    }
}

/// Sends calls over a single persistent WebSocket.
///
/// At most `max_requests` calls are in flight; later ones wait for a slot.
/// When the socket closes every pending call fails. The socket is reopened
/// on the next call, or whenever the endpoint changes.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    slots: Semaphore,
    next_id: AtomicU32,
    conn: tokio::sync::Mutex<Option<Arc<Connection>>>,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            slots: Semaphore::new(config.max_requests.max(1)),
            config,
            next_id: AtomicU32::new(0),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff
    }

    async fn connection(&self, uri: &str) -> Result<Arc<Connection>> {
        let mut current = self.conn.lock().await;
        if let Some(conn) = current.as_ref() {
            if !conn.is_closed() && conn.uri == uri {
                return Ok(conn.clone());
            }
        }
        if let Some(old) = current.take() {
            if !old.is_closed() {
                debug!(from = %old.uri, to = %uri, "Switching websocket endpoint");
                old.shutdown("websocket endpoint changed");
            }
        }

        debug!(uri = %uri, "Opening websocket");
        let (socket, _) = connect_async(uri)
            .await
            .map_err(|e| HproseError::Transport(format!("websocket connect to {} failed: {}", uri, e)))?;
        let (sink, stream) = socket.split();
        let conn = Arc::new(Connection {
            uri: uri.to_string(),
            sink: tokio::sync::Mutex::new(sink),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });
        let handle = tokio::spawn(read_loop(conn.clone(), stream));
        *conn.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        *current = Some(conn.clone());
        Ok(conn)
    }

    async fn round_trip(&self, request: Vec<u8>, uri: &str) -> Result<Vec<u8>> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| HproseError::Transport("websocket transport closed".into()))?;
        let conn = self.connection(uri).await?;

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        conn.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let _pending = PendingRequest {
            conn: conn.clone(),
            id,
            keep_alive: self.config.keep_alive,
        };
        // The reader may have failed the table just before the insert.
        if conn.is_closed() {
            return Err(HproseError::Transport("websocket closed".into()));
        }

        let mut frame = Vec::with_capacity(4 + request.len());
        frame.extend_from_slice(&id.to_be_bytes());
        frame.extend_from_slice(&request);
        if let Err(e) = conn.sink.lock().await.send(Message::Binary(frame)).await {
            let error = HproseError::Transport(format!("websocket send failed: {}", e));
            conn.fail_all(error.clone());
            return Err(error);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(HproseError::Transport("websocket closed".into())),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_and_receive(&self, request: Vec<u8>, ctx: &mut Context) -> Result<Vec<u8>> {
        let uri = ctx.uri.clone();
        with_timeout(ctx.timeout, self.round_trip(request, &uri)).await
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.shutdown("websocket closed");
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            conn.shutdown("websocket transport dropped");
        }
    }
}
