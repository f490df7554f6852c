//! S3 operations: one signed HTTP exchange each
//!
//! An [`Op`] owns everything needed for a single request/response cycle:
//! method, target, optional body, and the result shape it expects back.
//! Executing it builds the path-style URL and canonical resource, stamps and
//! signs the request, submits it to the transport, and parses the response
//! into a typed [`OpOutput`] or a classified [`S4Error`].
//!
//! Every executing op is tracked in a process-wide registry for
//! introspection; entries are added when execution starts and removed by a
//! drop guard, which covers both normal completion and cancellation (the
//! future being dropped mid-flight).

use bytes::Bytes;
use chrono::Utc;
use hyper::Method;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ErrorCode, Result, S4Error};
use crate::signer::{canonical_resource, uri_encode, Signer};
use crate::transport::{ProgressFn, Transport, TransportError, TransportRequest};
use crate::types::{BucketInfo, Credentials, Entry, ListPage};

/// Context an op executes in: transport, credentials, endpoint, and an
/// optional progress sink. Cheap to clone.
#[derive(Clone)]
pub(crate) struct OpContext {
    pub transport: Arc<dyn Transport>,
    pub credentials: Credentials,
    pub endpoint: String,
    pub progress: Option<ProgressFn>,
}

/// Result shape an op expects from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    /// Raw object bytes (GET object)
    Bytes,
    /// Response header map (HEAD object)
    Head,
    /// One listing page (GET bucket)
    Page,
    /// Bucket list (GET service)
    Buckets,
    /// Nothing (PUT object)
    Empty,
}

/// Typed result of a completed op.
pub(crate) enum OpOutput {
    Bytes(Bytes),
    Head(BTreeMap<String, String>),
    Page(ListPage),
    Buckets(Vec<BucketInfo>),
    Empty,
}

/// Snapshot of one currently executing op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveOp {
    pub id: u64,
    pub method: String,
    pub bucket: Option<String>,
    pub uri: String,
}

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);
static ACTIVE_OPS: Lazy<Mutex<BTreeMap<u64, ActiveOp>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Snapshot the process-wide registry of in-flight ops.
pub fn active_ops() -> Vec<ActiveOp> {
    ACTIVE_OPS.lock().unwrap().values().cloned().collect()
}

/// Removes the registry entry when execution ends, however it ends.
struct OpGuard {
    id: u64,
}

impl OpGuard {
    fn register(op: &Op) -> Self {
        let id = NEXT_OP_ID.fetch_add(1, Ordering::Relaxed);
        let entry = ActiveOp {
            id,
            method: op.method.to_string(),
            bucket: op.bucket.clone(),
            uri: op.uri.clone(),
        };
        ACTIVE_OPS.lock().unwrap().insert(id, entry);
        Self { id }
    }
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        ACTIVE_OPS.lock().unwrap().remove(&self.id);
    }
}

/// One HTTP exchange against S3.
pub(crate) struct Op {
    method: Method,
    bucket: Option<String>,
    /// Object key, empty for bucket/service level calls
    uri: String,
    /// Query parameters in alphabetical order
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    expect: Expect,
}

impl Op {
    pub(crate) fn get_service() -> Self {
        Self {
            method: Method::GET,
            bucket: None,
            uri: String::new(),
            query: Vec::new(),
            body: None,
            expect: Expect::Buckets,
        }
    }

    pub(crate) fn get_object(bucket: String, key: String) -> Self {
        Self {
            method: Method::GET,
            bucket: Some(bucket),
            uri: key,
            query: Vec::new(),
            body: None,
            expect: Expect::Bytes,
        }
    }

    pub(crate) fn head_object(bucket: String, key: String) -> Self {
        Self {
            method: Method::HEAD,
            bucket: Some(bucket),
            uri: key,
            query: Vec::new(),
            body: None,
            expect: Expect::Head,
        }
    }

    pub(crate) fn put_object(bucket: String, key: String, body: Bytes) -> Self {
        Self {
            method: Method::PUT,
            bucket: Some(bucket),
            uri: key,
            query: Vec::new(),
            body: Some(body),
            expect: Expect::Empty,
        }
    }

    /// One page of a delimiter-based listing.
    pub(crate) fn list_page(bucket: String, prefix: &str, marker: Option<&str>) -> Self {
        // Alphabetical parameter order so signing and URL agree
        let mut query = vec![("delimiter".to_string(), "/".to_string())];
        if let Some(marker) = marker {
            query.push(("marker".to_string(), marker.to_string()));
        }
        if !prefix.is_empty() {
            query.push(("prefix".to_string(), prefix.to_string()));
        }
        Self {
            method: Method::GET,
            bucket: Some(bucket),
            uri: String::new(),
            query,
            body: None,
            expect: Expect::Page,
        }
    }

    /// Execute this op: sign, submit, parse, classify.
    ///
    /// Completion is only observable by awaiting the returned future; the
    /// caller (a task driver) decides what context it resumes on, so there is
    /// no synchronous re-entrancy into caller code.
    pub(crate) async fn execute(self, ctx: &OpContext) -> Result<OpOutput> {
        let _guard = OpGuard::register(&self);

        let encoded_key = if self.uri.is_empty() {
            None
        } else {
            Some(uri_encode(&self.uri, false))
        };
        let url = self.build_url(&ctx.endpoint, encoded_key.as_deref());
        let resource = canonical_resource(
            self.bucket.as_deref(),
            encoded_key.as_deref(),
            &self.query,
        );

        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut headers = BTreeMap::new();
        headers.insert("date".to_string(), date.clone());
        if let Some(body) = &self.body {
            headers.insert("content-length".to_string(), body.len().to_string());
            headers.insert(
                "content-type".to_string(),
                "application/octet-stream".to_string(),
            );
        }

        let signer = Signer::new(&ctx.credentials);
        let authorization = signer.authorization(self.method.as_str(), &resource, &headers, &date);
        headers.insert("authorization".to_string(), authorization);

        tracing::debug!(method = %self.method, url = %url, "dispatching op");

        let request = TransportRequest {
            method: self.method.clone(),
            url,
            headers,
            body: self.body.clone().unwrap_or_default(),
        };

        let response = ctx
            .transport
            .send(request, ctx.progress.clone())
            .await
            .map_err(|e| match e {
                TransportError::Unreachable(msg) => S4Error::network(msg),
                TransportError::Protocol(msg) => S4Error::bad_response(msg),
            })?;

        if !response.status.is_success() {
            return Err(self.classify_error(response.status.as_u16(), &response.body));
        }

        match self.expect {
            Expect::Bytes => Ok(OpOutput::Bytes(response.body)),
            Expect::Head => Ok(OpOutput::Head(response.headers)),
            Expect::Page => parse_list_page(&response.body).map(OpOutput::Page),
            Expect::Buckets => parse_bucket_list(&response.body).map(OpOutput::Buckets),
            Expect::Empty => Ok(OpOutput::Empty),
        }
    }

    /// Path-style URL: endpoint/bucket/key?query
    fn build_url(&self, endpoint: &str, encoded_key: Option<&str>) -> String {
        let endpoint = endpoint.trim_end_matches('/');
        let mut url = String::with_capacity(endpoint.len() + 64);
        url.push_str(endpoint);
        url.push('/');
        if let Some(bucket) = &self.bucket {
            url.push_str(bucket);
            if let Some(key) = encoded_key {
                url.push('/');
                url.push_str(key);
            }
        }
        for (i, (name, value)) in self.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(name);
            url.push('=');
            url.push_str(&uri_encode(value, true));
        }
        url
    }

    /// Map a non-2xx response into the error domain.
    ///
    /// Prefers the S3 `<Error>` body when present; falls back on a
    /// status-derived code otherwise. The bucket and key names are appended
    /// to the detail message so callers can tell which resource failed.
    fn classify_error(&self, status: u16, body: &[u8]) -> S4Error {
        let bucket_scope = matches!(self.expect, Expect::Page | Expect::Buckets);

        let (code, message) = match parse_error_body(body) {
            Some((s3_code, s3_message)) => {
                let code = ErrorCode::from_s3_code(&s3_code);
                let message = if s3_message.is_empty() { s3_code } else { s3_message };
                (code, message)
            }
            None => (
                ErrorCode::from_status(status, bucket_scope),
                format!("HTTP {}", status),
            ),
        };

        let mut detail = message;
        if let Some(bucket) = &self.bucket {
            if self.uri.is_empty() {
                detail = format!("{} (bucket {})", detail, bucket);
            } else {
                detail = format!("{} (bucket {}, key {})", detail, bucket, self.uri);
            }
        }

        tracing::warn!(
            method = %self.method,
            status = status,
            code = ?code,
            "op failed: {}",
            detail
        );
        S4Error::new(code, detail)
    }
}

/// Parse a GET Bucket (ListBucketResult) page.
///
/// Byte-slice tag matching and `std::mem::take` text moves keep per-entry
/// allocation down on large pages.
pub(crate) fn parse_list_page(xml_data: &[u8]) -> Result<ListPage> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut page = ListPage::default();
    let mut current_object: Option<Entry> = None;
    let mut current_text = String::with_capacity(256);
    let mut in_common_prefixes = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"Contents" => {
                    current_object = Some(Entry::object(String::new(), 0, None));
                }
                b"CommonPrefixes" => {
                    in_common_prefixes = true;
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut obj) = current_object {
                            obj.key = std::mem::take(&mut current_text);
                        }
                    }
                    b"Size" => {
                        if let Some(ref mut obj) = current_object {
                            obj.size = current_text.parse().unwrap_or(0);
                        }
                    }
                    b"LastModified" => {
                        if let Some(ref mut obj) = current_object {
                            obj.last_modified = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Contents" => {
                        if let Some(obj) = current_object.take() {
                            page.objects.push(obj);
                        }
                    }
                    b"CommonPrefixes" => {
                        in_common_prefixes = false;
                    }
                    b"Prefix" => {
                        if in_common_prefixes {
                            page.prefixes.push(std::mem::take(&mut current_text));
                        }
                    }
                    b"IsTruncated" => {
                        page.is_truncated = current_text == "true";
                    }
                    b"NextMarker" => {
                        page.next_marker = Some(std::mem::take(&mut current_text));
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    Ok(page)
}

/// Parse a GET Service (ListAllMyBucketsResult) response.
pub(crate) fn parse_bucket_list(xml_data: &[u8]) -> Result<Vec<BucketInfo>> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut buckets = Vec::new();
    let mut current: Option<BucketInfo> = None;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Bucket" {
                    current = Some(BucketInfo {
                        name: String::new(),
                        creation_date: None,
                    });
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Name" => {
                        if let Some(ref mut bucket) = current {
                            bucket.name = std::mem::take(&mut current_text);
                        }
                    }
                    b"CreationDate" => {
                        if let Some(ref mut bucket) = current {
                            bucket.creation_date = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Bucket" => {
                        if let Some(bucket) = current.take() {
                            if !bucket.name.is_empty() {
                                buckets.push(bucket);
                            }
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    Ok(buckets)
}

/// Parse an S3 `<Error>` body into (code, message). Returns None when the
/// body is not well-formed XML or carries no `<Code>`.
fn parse_error_body(xml_data: &[u8]) -> Option<(String, String)> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut code = String::new();
    let mut message = String::new();
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => code = std::mem::take(&mut current_text),
                    b"Message" => message = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if code.is_empty() {
        None
    } else {
        Some((code, message))
    }
}

fn xml_error(err: quick_xml::Error) -> S4Error {
    S4Error::bad_response(format!("XML parse error: {}", err))
}
