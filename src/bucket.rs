//! Per-bucket operations: get, head, list, deep list, put
//!
//! A [`Bucket`] is a lightweight handle created by [`crate::S4::bucket`]; it
//! holds a
//! weak reference to the client, so a bucket handle never keeps a released
//! client alive. Operations requested after the client is gone come back as
//! already-cancelled tasks.
//!
//! Argument validation failures are reported asynchronously through the
//! task's error callback, never as panics or synchronous returns, so callers
//! have one error path for everything.

use std::sync::Weak;

use bytes::Bytes;

use crate::client::S4Inner;
use crate::error::{Result, S4Error};
use crate::list;
use crate::op::{Op, OpOutput};
use crate::task::{GetTask, HeadTask, ListTask, PutTask, Task};

// S3 bucket naming rules (the DNS-compatible subset)
const BUCKET_NAME_MIN: usize = 3;
const BUCKET_NAME_MAX: usize = 63;
const KEY_MAX_BYTES: usize = 1024;

/// Validate a bucket name against the DNS-compatible naming rules:
/// 3 to 63 characters of lowercase alphanumerics, `-` and `.`, starting and
/// ending with an alphanumeric.
pub(crate) fn validate_bucket_name(name: &str) -> Result<()> {
    let len = name.len();
    if !(BUCKET_NAME_MIN..=BUCKET_NAME_MAX).contains(&len) {
        return Err(S4Error::bad_parameter(format!(
            "bucket name must be {} to {} characters: {:?}",
            BUCKET_NAME_MIN, BUCKET_NAME_MAX, name
        )));
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[len - 1]) {
        return Err(S4Error::bad_parameter(format!(
            "bucket name must start and end with a lowercase letter or digit: {:?}",
            name
        )));
    }
    if !bytes.iter().all(|&b| alnum(b) || b == b'-' || b == b'.') {
        return Err(S4Error::bad_parameter(format!(
            "bucket name contains invalid characters: {:?}",
            name
        )));
    }
    Ok(())
}

/// Validate an object key: non-empty, at most 1024 bytes, no leading slash.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(S4Error::bad_parameter("object key must not be empty"));
    }
    if key.len() > KEY_MAX_BYTES {
        return Err(S4Error::bad_parameter(format!(
            "object key exceeds {} bytes",
            KEY_MAX_BYTES
        )));
    }
    if key.starts_with('/') {
        return Err(S4Error::bad_parameter(format!(
            "object key must not start with '/': {:?}",
            key
        )));
    }
    Ok(())
}

/// Validate a listing prefix: same rules as a key, except empty is allowed
/// (the bucket root).
fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_key(prefix)
}

/// Handle for operations on one bucket.
///
/// Created by [`crate::S4::bucket`]; see there for lifetime semantics.
#[derive(Clone)]
pub struct Bucket {
    inner: Weak<S4Inner>,
    name: String,
}

impl Bucket {
    pub(crate) fn new(inner: Weak<S4Inner>, name: String) -> Self {
        Self { inner, name }
    }

    /// The bucket name this handle addresses.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Download an object's bytes.
    ///
    /// Progress callbacks report download completion against Content-Length
    /// when the service provides one.
    pub fn get(&self, key: impl Into<String>) -> GetTask {
        let key = key.into();
        if let Err(err) = self.check_args(Some(&key)) {
            return Task::failed("get", err);
        }
        let Some(inner) = self.inner.upgrade() else {
            return Task::cancelled("get");
        };
        let bucket = self.name.clone();
        let ctx = inner.op_context(None);
        Task::spawn("get", &inner.token(), move |task| async move {
            let mut ctx = ctx;
            ctx.progress = Some(task.progress_fn());
            match Op::get_object(bucket, key).execute(&ctx).await? {
                OpOutput::Bytes(bytes) => Ok(bytes),
                _ => unreachable!("get op yields bytes"),
            }
        })
    }

    /// Fetch an object's metadata without its body.
    ///
    /// Resolves to the response header map with lowercase names
    /// (content-length, content-type, etag, last-modified, ...).
    pub fn head(&self, key: impl Into<String>) -> HeadTask {
        let key = key.into();
        if let Err(err) = self.check_args(Some(&key)) {
            return Task::failed("head", err);
        }
        let Some(inner) = self.inner.upgrade() else {
            return Task::cancelled("head");
        };
        let bucket = self.name.clone();
        let ctx = inner.op_context(None);
        Task::spawn("head", &inner.token(), move |_task| async move {
            match Op::head_object(bucket, key).execute(&ctx).await? {
                OpOutput::Head(headers) => Ok(headers),
                _ => unreachable!("head op yields headers"),
            }
        })
    }

    /// List one level under `prefix` with the `/` delimiter.
    ///
    /// Follows truncated pages to completion; the result interleaves objects
    /// and directory entries in key order. Pass `""` for the bucket root.
    pub fn list(&self, prefix: impl Into<String>) -> ListTask {
        let prefix = prefix.into();
        if let Err(err) = validate_prefix(&prefix).and_then(|_| validate_bucket_name(&self.name)) {
            return Task::failed("list", err);
        }
        let Some(inner) = self.inner.upgrade() else {
            return Task::cancelled("list");
        };
        let bucket = self.name.clone();
        let ctx = inner.op_context(None);
        Task::spawn("list", &inner.token(), move |_task| async move {
            list::list_flat(&ctx, &bucket, &prefix).await
        })
    }

    /// Recursively list everything under `prefix`.
    ///
    /// Directories at each level are descended concurrently; each directory
    /// entry is immediately followed by its contents in the result. The
    /// first error aborts the whole walk.
    pub fn list_deep(&self, prefix: impl Into<String>) -> ListTask {
        let prefix = prefix.into();
        if let Err(err) = validate_prefix(&prefix).and_then(|_| validate_bucket_name(&self.name)) {
            return Task::failed("list_deep", err);
        }
        let Some(inner) = self.inner.upgrade() else {
            return Task::cancelled("list_deep");
        };
        let bucket = self.name.clone();
        let ctx = inner.op_context(None);
        Task::spawn("list_deep", &inner.token(), move |_task| async move {
            list::list_deep(ctx, bucket, prefix).await
        })
    }

    /// Upload an object.
    ///
    /// Progress callbacks report upload completion; the final 1.0 arrives
    /// once the service has acknowledged the request.
    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) -> PutTask {
        let key = key.into();
        let data = data.into();
        if let Err(err) = self.check_args(Some(&key)) {
            return Task::failed("put", err);
        }
        let Some(inner) = self.inner.upgrade() else {
            return Task::cancelled("put");
        };
        let bucket = self.name.clone();
        let ctx = inner.op_context(None);
        Task::spawn("put", &inner.token(), move |task| async move {
            let mut ctx = ctx;
            ctx.progress = Some(task.progress_fn());
            match Op::put_object(bucket, key, data).execute(&ctx).await? {
                OpOutput::Empty => Ok(()),
                _ => unreachable!("put op yields no body"),
            }
        })
    }

    fn check_args(&self, key: Option<&str>) -> Result<()> {
        validate_bucket_name(&self.name)?;
        if let Some(key) = key {
            validate_key(key)?;
        }
        Ok(())
    }
}
