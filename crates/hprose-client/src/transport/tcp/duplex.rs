use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use hprose_common::{HproseError, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{connect, encode_duplex_frame, map_io_error, receive_duplex_frame};
use crate::config::TcpConfig;
use crate::context::Context;
use crate::transport::{with_timeout, Transport};

type Waiter = oneshot::Sender<Result<Vec<u8>>>;

/// One pipelined connection and the requests waiting on it.
struct DuplexConnection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Mutex<HashMap<u32, Waiter>>,
    in_flight: AtomicUsize,
    /// Bumped whenever the connection goes idle; a stale idle timer sees a
    /// different value and leaves the connection alone.
    idle_epoch: AtomicU64,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DuplexConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn register(&self, id: u32) -> oneshot::Receiver<Result<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        rx
    }

    fn take(&self, id: u32) -> Option<Waiter> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Marks the connection dead and fails every waiting request.
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

    fn shutdown(&self, reason: &str) {
        self.shutdown_with(HproseError::Transport(reason.to_string()));
    }

    fn shutdown_with(&self, error: HproseError) {
        self.fail_all(error);
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

async fn read_loop(conn: Arc<DuplexConnection>, mut reader: OwnedReadHalf) {
    let error = loop {
        match receive_duplex_frame(&mut reader).await {
            Ok((id, payload)) => match conn.take(id) {
                Some(waiter) => {
                    let _ = waiter.send(Ok(payload));
                }
                None => warn!(id, "Dropping response for unknown request id"),
            },
            Err(e) => break e,
        }
    };
    debug!(error = %error, "Full-duplex connection closed");
    conn.fail_all(error);
}

/// Pipelined connections to one endpoint.
struct DuplexPool {
    uri: String,
    config: TcpConfig,
    slots: Semaphore,
    next_id: AtomicU32,
    connections: tokio::sync::Mutex<Vec<Arc<DuplexConnection>>>,
}

impl DuplexPool {
    fn new(uri: &str, config: TcpConfig) -> Self {
        let capacity = config.max_connections.max(1) * config.max_in_flight.max(1);
        Self {
            uri: uri.to_string(),
            slots: Semaphore::new(capacity),
            next_id: AtomicU32::new(0),
            config,
            connections: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff
    }

    /// Picks the least loaded open connection with a free slot, opening a
    /// new one while under `max_connections`. The returned connection has
    /// already counted the caller as in flight.
    async fn checkout(&self) -> Result<Arc<DuplexConnection>> {
        let mut connections = self.connections.lock().await;
        connections.retain(|conn| !conn.is_closed());

        let max_in_flight = self.config.max_in_flight.max(1);
        let least_loaded = connections
            .iter()
            .filter(|conn| conn.in_flight.load(Ordering::Acquire) < max_in_flight)
            .min_by_key(|conn| conn.in_flight.load(Ordering::Acquire))
            .cloned();

        let conn = match least_loaded {
            Some(conn) if conn.in_flight.load(Ordering::Acquire) == 0 => conn,
            Some(conn) if connections.len() >= self.config.max_connections.max(1) => conn,
            _ => {
                debug!(uri = %self.uri, "Opening full-duplex connection");
                let stream = connect(&self.uri, self.config.no_delay).await?;
                let (read_half, write_half) = stream.into_split();
                let conn = Arc::new(DuplexConnection {
                    writer: tokio::sync::Mutex::new(write_half),
                    pending: Mutex::new(HashMap::new()),
                    in_flight: AtomicUsize::new(0),
                    idle_epoch: AtomicU64::new(0),
                    closed: AtomicBool::new(false),
                    reader: Mutex::new(None),
                });
                let handle = tokio::spawn(read_loop(conn.clone(), read_half));
                *conn.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                connections.push(conn.clone());
                conn
            }
        };
        conn.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(conn)
    }

    async fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| HproseError::Transport("connection pool closed".into()))?;
        let conn = self.checkout().await?;
        let id = self.next_id();
        let rx = conn.register(id);
        let _guard = InFlight {
            conn: conn.clone(),
            id,
            idle_timeout: self.config.idle_timeout,
        };
        // A connection that failed before the waiter was registered never
        // drained it.
        if conn.is_closed() {
            return Err(HproseError::Transport("connection closed".into()));
        }

        let frame = encode_duplex_frame(id, request)?;
        {
            let mut writer = conn.writer.lock().await;
            if conn.is_closed() {
                return Err(HproseError::Transport("connection closed".into()));
            }
            let torn = TornWrite(conn.as_ref());
            let written = match writer.write_all(&frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            torn.disarm();
            if let Err(e) = written {
                let error = map_io_error(e, "writing frame");
                conn.shutdown_with(error.clone());
                return Err(error);
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(HproseError::Transport("connection closed".into())),
        }
    }

    async fn close(&self) {
        for conn in self.connections.lock().await.drain(..) {
            conn.shutdown("transport closed");
        }
    }
}

impl Drop for DuplexPool {
    fn drop(&mut self) {
        // Reader tasks keep their connection alive until aborted.
        for conn in self.connections.get_mut().drain(..) {
            conn.shutdown("transport dropped");
        }
    }
}

/// Shuts a connection down if a frame write is abandoned part way, since
/// the peer would read the next frame's bytes as the rest of this one.
struct TornWrite<'a>(&'a DuplexConnection);

impl TornWrite<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for TornWrite<'_> {
    fn drop(&mut self) {
        debug!("Frame write interrupted, closing full-duplex connection");
        self.0.shutdown("frame write interrupted");
    }
}

/// Releases a request's slot on its connection, including when the request
/// is dropped by a timeout.
struct InFlight {
    conn: Arc<DuplexConnection>,
    id: u32,
    idle_timeout: std::time::Duration,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.conn.take(self.id);
        if self.conn.in_flight.fetch_sub(1, Ordering::AcqRel) != 1 || self.idle_timeout.is_zero() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let epoch = self.conn.idle_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let conn = self.conn.clone();
        let idle_timeout = self.idle_timeout;
        runtime.spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if conn.idle_epoch.load(Ordering::Acquire) == epoch
                && conn.in_flight.load(Ordering::Acquire) == 0
            {
                debug!("Closing idle full-duplex connection");
                conn.shutdown("idle timeout");
            }
        });
    }
}

/// Full-duplex TCP: each connection pipelines up to `max_in_flight`
/// requests, matched to their responses by id.
pub struct FullDuplexTransport {
    config: TcpConfig,
    pools: Mutex<HashMap<String, Arc<DuplexPool>>>,
}

impl FullDuplexTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool(&self, uri: &str) -> Arc<DuplexPool> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(DuplexPool::new(uri, self.config.clone())))
            .clone()
    }
}

#[async_trait]
impl Transport for FullDuplexTransport {
    async fn send_and_receive(&self, request: Vec<u8>, ctx: &mut Context) -> Result<Vec<u8>> {
        let pool = self.pool(&ctx.uri);
        with_timeout(ctx.timeout, pool.round_trip(&request)).await
    }

    async fn close(&self) {
        let pools: Vec<Arc<DuplexPool>> = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn ctx(uri: &str) -> Context {
        let mut ctx = Context::new("echo", &crate::ClientConfig::default());
        ctx.uri = uri.to_string();
        ctx.timeout = Duration::from_secs(5);
        ctx
    }

    /// Reads `batch` frames, then answers them in reverse order.
    async fn reversing_server(batch: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("tcp://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, mut write_half) = stream.into_split();
            loop {
                let mut frames = Vec::new();
                for _ in 0..batch {
                    match receive_duplex_frame(&mut read_half).await {
                        Ok(frame) => frames.push(frame),
                        Err(_) => return,
                    }
                }
                for (id, payload) in frames.into_iter().rev() {
                    let frame = encode_duplex_frame(id, &payload).unwrap();
                    write_half.write_all(&frame).await.unwrap();
                }
            }
        });
        uri
    }

    #[tokio::test]
    async fn test_responses_matched_by_id_out_of_order() {
        let uri = reversing_server(2).await;
        let transport = Arc::new(FullDuplexTransport::new(TcpConfig {
            full_duplex: true,
            max_connections: 1,
            ..TcpConfig::default()
        }));

        let first = {
            let transport = transport.clone();
            let uri = uri.clone();
            tokio::spawn(async move { transport.send_and_receive(b"first".to_vec(), &mut ctx(&uri)).await })
        };
        let second = {
            let transport = transport.clone();
            let uri = uri.clone();
            tokio::spawn(async move { transport.send_and_receive(b"second".to_vec(), &mut ctx(&uri)).await })
        };
        assert_eq!(first.await.unwrap().unwrap(), b"first");
        assert_eq!(second.await.unwrap().unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_server_close_fails_pending_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("tcp://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = receive_duplex_frame(&mut stream).await;
            drop(stream);
        });

        let transport = FullDuplexTransport::new(TcpConfig::default());
        let result = transport.send_and_receive(b"x".to_vec(), &mut ctx(&uri)).await;
        assert!(matches!(result, Err(HproseError::Transport(_))));
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("tcp://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, mut write_half) = stream.into_split();
            // Swallow the first request, echo the rest.
            let _ = receive_duplex_frame(&mut read_half).await;
            while let Ok((id, payload)) = receive_duplex_frame(&mut read_half).await {
                let frame = encode_duplex_frame(id, &payload).unwrap();
                write_half.write_all(&frame).await.unwrap();
            }
        });

        let transport = FullDuplexTransport::new(TcpConfig {
            max_connections: 1,
            max_in_flight: 1,
            ..TcpConfig::default()
        });
        let mut short = ctx(&uri);
        short.timeout = Duration::from_millis(50);
        assert!(matches!(
            transport.send_and_receive(b"lost".to_vec(), &mut short).await,
            Err(HproseError::Timeout(50))
        ));
        assert_eq!(
            transport.send_and_receive(b"next".to_vec(), &mut ctx(&uri)).await.unwrap(),
            b"next"
        );
    }

    #[tokio::test]
    async fn test_interrupted_write_retires_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("tcp://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            // The first connection is never read, so a large frame stalls.
            let (stalled, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let (stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let (mut read_half, mut write_half) = stream.into_split();
            while let Ok((id, payload)) = receive_duplex_frame(&mut read_half).await {
                let frame = encode_duplex_frame(id, &payload).unwrap();
                write_half.write_all(&frame).await.unwrap();
            }
            drop(stalled);
        });

        let transport = FullDuplexTransport::new(TcpConfig {
            max_connections: 1,
            ..TcpConfig::default()
        });
        let mut short = ctx(&uri);
        short.timeout = Duration::from_millis(200);
        let huge = vec![b'x'; 64 * 1024 * 1024];
        assert!(matches!(
            transport.send_and_receive(huge, &mut short).await,
            Err(HproseError::Timeout(200))
        ));

        assert_eq!(
            transport.send_and_receive(b"after".to_vec(), &mut ctx(&uri)).await.unwrap(),
            b"after"
        );
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }
}
