use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;

use async_trait::async_trait;
use hprose_common::{HproseError, Result};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{connect, receive_message, send_message};
use crate::config::TcpConfig;
use crate::context::Context;
use crate::transport::{with_timeout, Transport};

/// Idle connection waiting in the pool.
struct IdleConnection {
    stream: TcpStream,
    since: Instant,
}

/// Connections to one endpoint.
///
/// # Architecture
///
/// - At most `max_connections` connections exist at once; a semaphore permit
///   is held for the whole round trip, so extra requests queue for a permit
/// - Idle connections are reused LIFO for better cache locality
/// - Idle connections older than `idle_timeout` are closed by a reaper task
/// - A connection that fails or times out mid-request is dropped, never
///   returned to the pool
struct ConnectionPool {
    uri: String,
    config: TcpConfig,
    permits: Semaphore,
    idle: Mutex<Vec<IdleConnection>>,
}

impl ConnectionPool {
    fn new(uri: &str, config: TcpConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            uri: uri.to_string(),
            permits: Semaphore::new(config.max_connections.max(1)),
            config,
            idle: Mutex::new(Vec::new()),
        });
        spawn_reaper(Arc::downgrade(&pool), pool.config.idle_timeout);
        pool
    }

    fn take_idle(&self) -> Option<TcpStream> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(conn) = idle.pop() {
            if conn.since.elapsed() < self.config.idle_timeout {
                return Some(conn.stream);
            }
            debug!(uri = %self.uri, "Dropping expired idle connection");
        }
        None
    }

    fn put_idle(&self, stream: TcpStream) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.push(IdleConnection {
            stream,
            since: Instant::now(),
        });
    }

    /// Closes idle connections past their timeout.
    fn evict_expired(&self) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let before = idle.len();
        idle.retain(|conn| conn.since.elapsed() < self.config.idle_timeout);
        if idle.len() < before {
            debug!(uri = %self.uri, closed = before - idle.len(), "Closed idle connections");
        }
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| HproseError::Transport("connection pool closed".into()))?;

        let mut stream = match self.take_idle() {
            Some(stream) => stream,
            None => {
                debug!(uri = %self.uri, "Opening connection");
                connect(&self.uri, self.config.no_delay).await?
            }
        };
        send_message(&mut stream, request).await?;
        let response = receive_message(&mut stream).await?;
        self.put_idle(stream);
        Ok(response)
    }
}

fn spawn_reaper(pool: Weak<ConnectionPool>, idle_timeout: std::time::Duration) {
    if idle_timeout.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(idle_timeout);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(pool) = pool.upgrade() else { break };
            pool.evict_expired();
        }
    });
}

/// Half-duplex TCP: each connection carries one request at a time.
pub struct HalfDuplexTransport {
    config: TcpConfig,
    pools: Mutex<HashMap<String, Arc<ConnectionPool>>>,
}

impl HalfDuplexTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool(&self, uri: &str) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools
            .entry(uri.to_string())
            .or_insert_with(|| ConnectionPool::new(uri, self.config.clone()))
            .clone()
    }

    /// Number of idle pooled connections to `uri`.
    pub fn idle_connections(&self, uri: &str) -> usize {
        let pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools.get(uri).map(|pool| pool.idle_count()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for HalfDuplexTransport {
    async fn send_and_receive(&self, request: Vec<u8>, ctx: &mut Context) -> Result<Vec<u8>> {
        let pool = self.pool(&ctx.uri);
        // A timeout drops the round trip, and with it the connection.
        with_timeout(ctx.timeout, pool.round_trip(&request)).await
    }

    async fn close(&self) {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Echo server counting accepted connections.
    async fn echo_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("tcp://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    while let Ok(msg) = receive_message(&mut stream).await {
                        if send_message(&mut stream, &msg).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (uri, accepted)
    }

    fn ctx(uri: &str, timeout: Duration) -> Context {
        let mut ctx = Context::new("echo", &crate::ClientConfig::default());
        ctx.uri = uri.to_string();
        ctx.timeout = timeout;
        ctx
    }

    #[tokio::test]
    async fn test_sequential_requests_reuse_one_connection() {
        let (uri, accepted) = echo_server().await;
        let transport = HalfDuplexTransport::new(TcpConfig::default());
        for i in 0..3u8 {
            let reply = transport
                .send_and_receive(vec![b'0' + i], &mut ctx(&uri, Duration::from_secs(5)))
                .await
                .unwrap();
            assert_eq!(reply, vec![b'0' + i]);
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(transport.idle_connections(&uri), 1);
    }

    #[tokio::test]
    async fn test_pool_is_bounded() {
        let (uri, accepted) = echo_server().await;
        let config = TcpConfig {
            max_connections: 2,
            ..TcpConfig::default()
        };
        let transport = Arc::new(HalfDuplexTransport::new(config));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let transport = transport.clone();
            let uri = uri.clone();
            handles.push(tokio::spawn(async move {
                transport
                    .send_and_receive(b"ping".to_vec(), &mut ctx(&uri, Duration::from_secs(5)))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), b"ping");
        }
        assert!(accepted.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_discards_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("tcp://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            // Accept and never answer.
            let _conn = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let transport = HalfDuplexTransport::new(TcpConfig::default());
        let result = transport
            .send_and_receive(b"ping".to_vec(), &mut ctx(&uri, Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(HproseError::Timeout(50))));
        assert_eq!(transport.idle_connections(&uri), 0);
    }

    #[tokio::test]
    async fn test_expired_idle_connections_are_evicted() {
        let (uri, _) = echo_server().await;
        let config = TcpConfig {
            idle_timeout: Duration::from_millis(20),
            ..TcpConfig::default()
        };
        let transport = HalfDuplexTransport::new(config);
        transport
            .send_and_receive(b"x".to_vec(), &mut ctx(&uri, Duration::from_secs(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.idle_connections(&uri), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_a_transport_error() {
        let transport = HalfDuplexTransport::new(TcpConfig::default());
        let result = transport
            .send_and_receive(b"x".to_vec(), &mut ctx("tcp://127.0.0.1:1", Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(HproseError::Transport(_))));
    }
}
