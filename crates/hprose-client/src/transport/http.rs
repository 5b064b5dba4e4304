//! HTTP transport: every call is one `POST` to the endpoint.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use hprose_common::{HproseError, Result};
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, CONNECTION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use super::{with_timeout, Transport};
use crate::config::HttpConfig;
use crate::context::Context;

const CONTENT_TYPE_HPROSE: &str = "application/hprose";

/// Sends each request frame as the body of an HTTP `POST`.
///
/// Connections are pooled by hyper unless `keep_alive` is off. Cookies set by
/// a host are replayed on later requests to the same host, and the response
/// headers of the last attempt are copied into the call's context.
pub struct HttpTransport {
    config: HttpConfig,
    client: Client<HttpConnector, Full<Bytes>>,
    /// Host -> cookie name/value pairs
    cookies: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            config,
            client,
            cookies: Mutex::new(HashMap::new()),
        }
    }

    fn cookie_header(&self, host: &str) -> Option<String> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        let jar = cookies.get(host).filter(|jar| !jar.is_empty())?;
        Some(
            jar.iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn store_cookies(&self, host: &str, headers: &HeaderMap) {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        for header in headers.get_all(SET_COOKIE) {
            let Ok(header) = header.to_str() else { continue };
            let Some((name, value, expired)) = parse_set_cookie(header) else {
                continue;
            };
            let jar = cookies.entry(host.to_string()).or_default();
            jar.retain(|(existing, _)| *existing != name);
            if !expired {
                jar.push((name, value));
            }
        }
    }
}

/// Extracts the name and value of a `Set-Cookie` header, and whether it
/// deletes the cookie (`Max-Age=0` or an empty value).
fn parse_set_cookie(header: &str) -> Option<(String, String, bool)> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim();
    let expired = value.is_empty()
        || parts.any(|attr| {
            attr.split_once('=').is_some_and(|(k, v)| {
                k.trim().eq_ignore_ascii_case("max-age") && v.trim().parse::<i64>().is_ok_and(|age| age <= 0)
            })
        });
    Some((name.to_string(), value.to_string(), expired))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_and_receive(&self, request: Vec<u8>, ctx: &mut Context) -> Result<Vec<u8>> {
        let uri: Uri = ctx
            .uri
            .parse()
            .map_err(|e| HproseError::Configuration(format!("invalid uri '{}': {}", ctx.uri, e)))?;
        let host = uri.authority().map(|a| a.to_string()).unwrap_or_default();

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, CONTENT_TYPE_HPROSE);
        if !self.config.keep_alive {
            builder = builder.header(CONNECTION, "close");
        }
        for (name, value) in &self.config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = self.cookie_header(&host) {
            builder = builder.header(COOKIE, cookie);
        }
        let http_request = builder
            .body(Full::new(Bytes::from(request)))
            .map_err(|e| HproseError::Configuration(format!("invalid HTTP request: {}", e)))?;

        let client = self.client.clone();
        let (parts, body) = with_timeout(ctx.timeout, async move {
            let response = client
                .request(http_request)
                .await
                .map_err(|e| HproseError::Transport(format!("HTTP request failed: {}", e)))?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| HproseError::Transport(format!("failed to read HTTP response: {}", e)))?
                .to_bytes();
            Ok((parts, body))
        })
        .await?;

        debug!(uri = %ctx.uri, status = %parts.status, bytes = body.len(), "HTTP response");
        ctx.response_headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        self.store_cookies(&host, &parts.headers);

        if !parts.status.is_success() {
            return Err(HproseError::Http {
                status: parts.status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body.to_vec())
    }
}
