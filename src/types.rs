//! Shared data types: credentials, listing entries, bucket metadata, config

use serde::{Deserialize, Serialize};

use crate::error::{Result, S4Error};

/// Immutable access/secret key pair.
///
/// Owned by the client and shared read-only with every signer invocation.
/// Never mutated after construction.
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    /// Create credentials. Empty keys are a caller contract violation.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(S4Error::bad_parameter("credentials must not be empty"));
        }
        Ok(Self {
            access_key,
            secret_key,
        })
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret never appears in logs
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Authorization state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthorized,
    Authorized,
    Failed,
}

/// One listing entry.
///
/// Object entries carry size and last-modified; directory entries
/// (`is_prefix == true`) represent a common prefix under the `/` delimiter
/// and always end with the delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Object key, or the common prefix for directory entries
    pub key: String,
    /// Object size in bytes (0 for directory entries)
    pub size: u64,
    /// Last modified timestamp as returned by the service
    pub last_modified: Option<String>,
    /// True when this entry is a common prefix ("directory")
    pub is_prefix: bool,
}

impl Entry {
    /// Create an object entry.
    pub fn object(key: String, size: u64, last_modified: Option<String>) -> Self {
        Self {
            key,
            size,
            last_modified,
            is_prefix: false,
        }
    }

    /// Create a directory entry from a common prefix.
    pub fn prefix(key: String) -> Self {
        Self {
            key,
            size: 0,
            last_modified: None,
            is_prefix: true,
        }
    }
}

/// Bucket metadata from a GET Service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: Option<String>,
}

/// One parsed page of a GET Bucket (list) response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPage {
    /// Object entries in service order (lexicographic by key)
    pub objects: Vec<Entry>,
    /// Common prefixes in service order
    pub prefixes: Vec<String>,
    /// Whether more entries exist beyond this page
    pub is_truncated: bool,
    /// Marker to resume from, present when truncated with a delimiter
    pub next_marker: Option<String>,
}

impl ListPage {
    /// The marker to use for the continuation request: NextMarker when the
    /// service provided one, otherwise the last key seen on this page.
    pub fn continuation_marker(&self) -> Option<String> {
        if let Some(marker) = &self.next_marker {
            return Some(marker.clone());
        }
        let last_object = self.objects.last().map(|e| e.key.as_str());
        let last_prefix = self.prefixes.last().map(|p| p.as_str());
        match (last_object, last_prefix) {
            (Some(o), Some(p)) => Some(o.max(p).to_string()),
            (Some(o), None) => Some(o.to_string()),
            (None, Some(p)) => Some(p.to_string()),
            (None, None) => None,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S4Config {
    /// Service endpoint, path-style addressing
    pub endpoint: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for S4Config {
    fn default() -> Self {
        Self {
            endpoint: "https://s3.amazonaws.com".to_string(),
            timeout_secs: 300,
        }
    }
}
