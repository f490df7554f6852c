//! HTTP transport boundary
//!
//! The client never talks to hyper directly; every operation goes through the
//! [`Transport`] trait so tests can substitute a fake serving canned
//! responses. The production implementation wraps a tuned hyper client:
//! HTTP/1.1, TCP_NODELAY, pooled idle connections, native-tls.
//!
//! Cancellation is cooperative: dropping the future returned by `send`
//! aborts the in-flight call.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http_body_util::{BodyStream, Full};
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Byte-level completion callback, called with a ratio in [0.0, 1.0].
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// One outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

/// One complete HTTP response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

/// Transport-level failures, below the S3 protocol.
#[derive(Error, Debug)]
pub enum TransportError {
    /// DNS failure, connection refused, no route, timeout
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// The peer answered but the HTTP exchange was malformed
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Asynchronous HTTP transport with cancellation and download progress.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        req: TransportRequest,
        progress: Option<ProgressFn>,
    ) -> Result<TransportResponse, TransportError>;
}

/// hyper-based production transport.
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

impl HyperTransport {
    /// Create a transport with tuned HTTP settings:
    /// - HTTP/1.1 with pooled connections (90s idle timeout)
    /// - TCP_NODELAY, 10s connect timeout, 90s keepalive
    pub fn new(timeout: Duration) -> Self {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = TlsConnector::new().expect("failed to build TLS connector");
        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .retry_canceled_requests(true)
            .set_host(true)
            .build(https);

        Self { client, timeout }
    }

    async fn send_inner(
        &self,
        req: TransportRequest,
        progress: Option<ProgressFn>,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = Request::builder().method(req.method).uri(&req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(req.body))
            .map_err(|e| TransportError::Protocol(format!("request build error: {}", e)))?;

        let response = self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                TransportError::Unreachable(e.to_string())
            } else {
                TransportError::Protocol(e.to_string())
            }
        })?;

        let status = response.status();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let total: Option<u64> = headers.get("content-length").and_then(|v| v.parse().ok());

        // Stream body frames so byte-level progress can be reported against
        // Content-Length when the server provides one.
        let mut body = BodyStream::new(response.into_body());
        let mut buf = BytesMut::with_capacity(total.unwrap_or(8 * 1024) as usize);
        while let Some(frame) = body.next().await {
            let frame =
                frame.map_err(|e| TransportError::Protocol(format!("body error: {}", e)))?;
            if let Some(chunk) = frame.data_ref() {
                buf.extend_from_slice(chunk);
                if let (Some(cb), Some(total)) = (&progress, total) {
                    if total > 0 {
                        cb((buf.len() as f64 / total as f64).min(1.0));
                    }
                }
            }
        }
        if let Some(cb) = &progress {
            cb(1.0);
        }

        Ok(TransportResponse {
            status,
            headers,
            body: buf.freeze(),
        })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(
        &self,
        req: TransportRequest,
        progress: Option<ProgressFn>,
    ) -> Result<TransportResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.send_inner(req, progress)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Unreachable("request timed out".to_string())),
        }
    }
}
