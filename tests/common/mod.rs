//! Shared test harness: a scriptable in-memory transport.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;
use s4::{
    Credentials, ProgressFn, S4, S4Config, Transport, TransportError, TransportRequest,
    TransportResponse,
};

type Handler =
    dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

/// Transport serving canned responses from a handler closure.
///
/// Records every request for later inspection and can insert an artificial
/// delay ahead of each response, so cancellation races are reproducible.
pub struct FakeTransport {
    handler: Box<Handler>,
    delay: Option<Duration>,
    log: Mutex<Vec<TransportRequest>>,
}

impl FakeTransport {
    pub fn new<H>(handler: H) -> Arc<Self>
    where
        H: Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay: None,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn with_delay<H>(delay: Duration, handler: H) -> Arc<Self>
    where
        H: Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay: Some(delay),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        req: TransportRequest,
        progress: Option<ProgressFn>,
    ) -> Result<TransportResponse, TransportError> {
        self.log.lock().unwrap().push(req.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.handler)(&req);
        if result.is_ok() {
            if let Some(cb) = &progress {
                cb(1.0);
            }
        }
        result
    }
}

/// A client wired to the given transport with fixed test credentials.
pub fn client(transport: Arc<FakeTransport>) -> S4 {
    let credentials = Credentials::new("AKIDTEST", "secret").unwrap();
    let config = S4Config {
        endpoint: "https://s3.test".to_string(),
        timeout_secs: 5,
    };
    S4::with_transport(credentials, config, transport)
}

pub fn ok_xml(body: &str) -> TransportResponse {
    TransportResponse {
        status: StatusCode::OK,
        headers: BTreeMap::new(),
        body: Bytes::from(body.to_string()),
    }
}

pub fn ok_bytes(body: &'static [u8]) -> TransportResponse {
    let mut headers = BTreeMap::new();
    headers.insert("content-length".to_string(), body.len().to_string());
    TransportResponse {
        status: StatusCode::OK,
        headers,
        body: Bytes::from_static(body),
    }
}

pub fn status_with_body(status: u16, body: &str) -> TransportResponse {
    TransportResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: BTreeMap::new(),
        body: Bytes::from(body.to_string()),
    }
}

/// Extract a query parameter from a request URL, percent-decoded just enough
/// for the values these tests use.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            return Some(v.replace("%2F", "/").replace("%20", " "));
        }
    }
    None
}

/// Build a ListBucketResult page.
pub fn list_page_xml(
    objects: &[(&str, u64)],
    prefixes: &[&str],
    next_marker: Option<&str>,
) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListBucketResult>",
    );
    for (key, size) in objects {
        xml.push_str(&format!(
            "<Contents><Key>{}</Key><Size>{}</Size><LastModified>2024-01-01T00:00:00.000Z</LastModified></Contents>",
            key, size
        ));
    }
    for prefix in prefixes {
        xml.push_str(&format!(
            "<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
            prefix
        ));
    }
    match next_marker {
        Some(marker) => xml.push_str(&format!(
            "<IsTruncated>true</IsTruncated><NextMarker>{}</NextMarker>",
            marker
        )),
        None => xml.push_str("<IsTruncated>false</IsTruncated>"),
    }
    xml.push_str("</ListBucketResult>");
    xml
}

pub const BUCKETS_XML: &str = "<ListAllMyBucketsResult><Buckets>\
<Bucket><Name>alpha</Name><CreationDate>2023-01-01T00:00:00.000Z</CreationDate></Bucket>\
<Bucket><Name>beta</Name></Bucket>\
</Buckets></ListAllMyBucketsResult>";

pub const NO_SUCH_BUCKET_XML: &str = "<Error><Code>NoSuchBucket</Code>\
<Message>The specified bucket does not exist</Message></Error>";

pub const ACCESS_DENIED_XML: &str =
    "<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>";
