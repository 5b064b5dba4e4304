//! WebSocket Client Integration Tests

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use hprose_client::{Client, ClientConfig, InvokeSettings};
use hprose_common::{HproseError, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

struct WsServer {
    addr: String,
    accepted: Arc<AtomicUsize>,
}

impl WsServer {
    /// Serves every request concurrently. With `drop_first` the first
    /// connection is closed as soon as its first message arrives.
    async fn start(drop_first: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, drop_first && n == 0));
            }
        });

        Self { addr, accepted }
    }

    fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }
}

async fn serve(stream: tokio::net::TcpStream, close_on_first: bool) {
    let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    let (mut sink, mut stream) = ws.split();

    if close_on_first {
        let _ = stream.next().await;
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if sink.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        if let Message::Binary(data) = message {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut reply = data[..4].to_vec();
                reply.extend(common::handle(&data[4..]).await);
                let _ = tx.send(reply);
            });
        }
    }
}

#[tokio::test]
async fn test_websocket_call() {
    let server = WsServer::start(false).await;
    let client = Client::new([server.url()]).unwrap();
    let result = client
        .invoke("sum", vec![Value::Integer(4), Value::Integer(5)], InvokeSettings::new())
        .await
        .unwrap();
    assert_eq!(result, Value::Integer(9));

    let names = client.functions().await.unwrap();
    assert_eq!(names, common::FUNCTIONS);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_responses_matched_out_of_order() {
    let server = WsServer::start(false).await;
    let client = Client::new([server.url()]).unwrap();

    let slow = client.invoke("sleep", vec![Value::Integer(200)], InvokeSettings::new());
    let fast = client.invoke("echo", vec![Value::from("quick")], InvokeSettings::new());
    let ((slow, slow_at), (fast, fast_at)) = tokio::join!(
        async { (slow.await, Instant::now()) },
        async { (fast.await, Instant::now()) },
    );

    assert_eq!(slow.unwrap(), Value::Integer(200));
    assert_eq!(fast.unwrap(), Value::from("quick"));
    assert!(fast_at < slow_at);
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_close_fails_pending_then_reconnects() {
    let server = WsServer::start(true).await;
    let client = Client::new([server.url()]).unwrap();

    let result = client.invoke("echo", vec![Value::Null], InvokeSettings::new()).await;
    assert!(matches!(result, Err(HproseError::Transport(_))));

    let result = client
        .invoke("echo", vec![Value::from("again")], InvokeSettings::new())
        .await
        .unwrap();
    assert_eq!(result, Value::from("again"));
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_without_keep_alive_each_call_reconnects() {
    let server = WsServer::start(false).await;
    let mut config = ClientConfig::default();
    config.websocket.keep_alive = false;
    let client = Client::with_config([server.url()], config).unwrap();

    for i in 0..2 {
        let result = client
            .invoke("echo", vec![Value::Integer(i)], InvokeSettings::new())
            .await
            .unwrap();
        assert_eq!(result, Value::Integer(i));
    }
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_socket_closed_at_handshake_fails_untimed_call() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                let _ = ws.close(None).await;
            }
        }
    });
    let client = Client::new([url]).unwrap();

    let call = client.invoke(
        "echo",
        vec![Value::Null],
        InvokeSettings::new().timeout(Duration::ZERO),
    );
    let result = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("call on a closed socket never finished");
    assert!(matches!(result, Err(HproseError::Transport(_))));
}
