//! HTTP Client Integration Tests
//!
//! Runs the client against an in-process hyper server speaking hprose (and,
//! for the filter test, JSON-RPC) on `127.0.0.1`.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hprose_client::{Client, ClientConfig, InvokeSettings, JsonRpcFilter};
use hprose_common::{HproseError, Value};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

type Handler = Arc<dyn Fn(Request<()>, Bytes) -> Response<Full<Bytes>> + Send + Sync>;

/// Test server that runs on a separate task
struct TestServer {
    addr: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn new(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { continue };
                        let io = TokioIo::new(stream);
                        let handler = handler.clone();
                        let counter = counter.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req: Request<Incoming>| {
                                let handler = handler.clone();
                                counter.fetch_add(1, Ordering::SeqCst);
                                async move {
                                    let (parts, body) = req.into_parts();
                                    let body = body.collect().await?.to_bytes();
                                    let response = handler(Request::from_parts(parts, ()), body.clone());
                                    // `sleep` delays are honored for hprose bodies only.
                                    let delay = common::delay_of(&common::parse(&body));
                                    if !delay.is_zero() {
                                        tokio::time::sleep(delay).await;
                                    }
                                    Ok::<_, hyper::Error>(response)
                                }
                            });
                            let _ = http1::Builder::new().serve_connection(io, service).await;
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    async fn hprose() -> Self {
        Self::new(Arc::new(|_: Request<()>, body: Bytes| hprose_response(&body))).await
    }

    fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn hprose_response(body: &[u8]) -> Response<Full<Bytes>> {
    let reply = common::respond(&common::parse(body));
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/hprose")
        .body(Full::new(Bytes::from(reply)))
        .unwrap()
}

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().map(|v| Value::Integer(*v)).collect()
}

#[tokio::test]
async fn test_basic_call() {
    let server = TestServer::hprose().await;
    let client = Client::new([server.url()]).unwrap();
    let result = client
        .invoke("sum", ints(&[1, 2, 3]), InvokeSettings::new())
        .await
        .unwrap();
    assert_eq!(result, Value::Integer(6));
}

#[tokio::test]
async fn test_remote_error_is_not_retried() {
    let server = TestServer::hprose().await;
    let client = Client::new([server.url()]).unwrap();
    let settings = InvokeSettings::new().idempotent(true).retry(5);
    let result = client.invoke("fail", Vec::<Value>::new(), settings).await;
    assert!(matches!(result, Err(HproseError::Remote(m)) if m == "boom"));
    assert_eq!(server.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_functions() {
    let server = TestServer::hprose().await;
    let client = Client::new([server.url()]).unwrap();
    let names = client.functions().await.unwrap();
    assert_eq!(names, common::FUNCTIONS);
}

#[tokio::test]
async fn test_byref_call() {
    let server = TestServer::hprose().await;
    let client = Client::new([server.url()]).unwrap();
    let args = common::args(ints(&[41]));
    client
        .invoke("inc", args.clone(), InvokeSettings::new().byref(true))
        .await
        .unwrap();
    assert_eq!(args.get(0), Some(Value::Integer(42)));
}

#[tokio::test]
async fn test_batch_results_in_call_order() {
    let server = TestServer::hprose().await;
    let client = Client::new([server.url()]).unwrap();

    client.begin_batch();
    let a = client.invoke("sum", ints(&[1, 1]), InvokeSettings::new());
    let b = client.invoke("fail", Vec::<Value>::new(), InvokeSettings::new());
    let c = client.invoke("echo", vec![Value::from("c")], InvokeSettings::new());
    client.end_batch(InvokeSettings::new()).await.unwrap();

    assert_eq!(a.await.unwrap(), Value::Integer(2));
    assert!(matches!(b.await, Err(HproseError::Remote(_))));
    assert_eq!(c.await.unwrap(), Value::from("c"));
    assert_eq!(server.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http_status_error() {
    let server = TestServer::new(Arc::new(|_: Request<()>, _: Bytes| {
        Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Full::new(Bytes::from("down for maintenance")))
            .unwrap()
    }))
    .await;
    let client = Client::new([server.url()]).unwrap();
    let result = client.invoke("sum", ints(&[1]), InvokeSettings::new()).await;
    match result {
        Err(HproseError::Http { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "down for maintenance");
        }
        other => panic!("expected an HTTP error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cookies_and_headers() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let server = TestServer::new(Arc::new(move |req: Request<()>, body: Bytes| {
        let cookie = req
            .headers()
            .get("cookie")
            .map(|v| v.to_str().unwrap().to_string());
        let token = req
            .headers()
            .get("x-token")
            .map(|v| v.to_str().unwrap().to_string());
        recorder.lock().unwrap().push((cookie, token));
        let mut response = hprose_response(&body);
        response
            .headers_mut()
            .insert("set-cookie", "session=s1; Path=/".parse().unwrap());
        response
    }))
    .await;

    let mut config = ClientConfig::default();
    config.http.headers.push(("X-Token".into(), "secret".into()));
    let client = Client::with_config([server.url()], config).unwrap();
    for _ in 0..2 {
        client
            .invoke("echo", vec![Value::Null], InvokeSettings::new())
            .await
            .unwrap();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], (None, Some("secret".to_string())));
    assert_eq!(
        seen[1],
        (Some("session=s1".to_string()), Some("secret".to_string()))
    );
}

#[tokio::test]
async fn test_timeout() {
    let server = TestServer::hprose().await;
    let client = Client::new([server.url()]).unwrap();
    let settings = InvokeSettings::new().timeout(Duration::from_millis(50));
    let result = client.invoke("sleep", ints(&[1000]), settings).await;
    assert!(matches!(result, Err(HproseError::Timeout(50))));
}

#[tokio::test]
async fn test_failover_to_live_endpoint() {
    let server = TestServer::hprose().await;
    // Nothing listens on the first endpoint.
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}/", listener.local_addr().unwrap())
    };
    let client = Client::new([dead, server.url()]).unwrap();
    let settings = InvokeSettings::new().idempotent(true).failswitch(true);
    let result = client
        .invoke("sum", ints(&[2, 3]), settings)
        .await
        .unwrap();
    assert_eq!(result, Value::Integer(5));
    assert_eq!(client.uri(), server.url());
}

#[tokio::test]
async fn test_jsonrpc_filter() {
    let server = TestServer::new(Arc::new(|_: Request<()>, body: Bytes| {
        let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let reply = serde_json::json!({
            "jsonrpc": "2.0",
            "result": request["params"].clone(),
            "id": request["id"].clone(),
        });
        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(serde_json::to_vec(&reply).unwrap())))
            .unwrap()
    }))
    .await;

    let client = Client::new([server.url()]).unwrap();
    client.add_filter(Arc::new(JsonRpcFilter::new()));
    let result = client
        .invoke("echo", vec![Value::from("x"), Value::Integer(2)], InvokeSettings::new())
        .await
        .unwrap();
    assert_eq!(result, Value::from(vec![Value::from("x"), Value::Integer(2)]));
}
