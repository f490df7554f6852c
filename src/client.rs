//! The S4 client: credentials, configuration, and service-level operations
//!
//! An [`S4`] handle is cheap to clone; all clones share one inner state. When
//! the last handle is dropped the client's cancellation token fires and every
//! outstanding task is cancelled. Task drivers therefore hold only a weak
//! reference back to the client, plus owned clones of the transport and
//! credentials, so in-flight work never keeps a released client alive.

use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bucket::Bucket;
use crate::error::{ErrorCode, Result, S4Error};
use crate::op::{Op, OpContext, OpOutput};
use crate::task::{AuthorizeTask, GetBucketsTask, Task};
use crate::transport::{HyperTransport, Transport};
use crate::types::{AuthState, BucketInfo, Credentials, S4Config};

pub(crate) struct S4Inner {
    credentials: Credentials,
    config: S4Config,
    transport: Arc<dyn Transport>,
    auth: Mutex<AuthState>,
    /// Cached bucket list, replaced wholesale on refresh
    buckets: RwLock<Option<Arc<Vec<BucketInfo>>>>,
    /// Parent of every task token; rotated by `cancel_all`
    token: RwLock<CancellationToken>,
}

impl Drop for S4Inner {
    fn drop(&mut self) {
        // Outstanding tasks observe this and finish as Cancelled
        self.token.read().unwrap().cancel();
    }
}

/// Asynchronous S3 client.
#[derive(Clone)]
pub struct S4 {
    inner: Arc<S4Inner>,
}

impl S4 {
    /// Create a client with the default endpoint and timeout.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let credentials = Credentials::new(access_key, secret_key)?;
        Ok(Self::with_config(credentials, S4Config::default()))
    }

    /// Create a client with explicit configuration.
    pub fn with_config(credentials: Credentials, config: S4Config) -> Self {
        let transport = Arc::new(HyperTransport::new(Duration::from_secs(config.timeout_secs)));
        Self::with_transport(credentials, config, transport)
    }

    /// Create a client over an arbitrary transport. This is the seam tests
    /// use to serve canned responses.
    pub fn with_transport(
        credentials: Credentials,
        config: S4Config,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(S4Inner {
                credentials,
                config,
                transport,
                auth: Mutex::new(AuthState::Unauthorized),
                buckets: RwLock::new(None),
                token: RwLock::new(CancellationToken::new()),
            }),
        }
    }

    /// Verify the credentials against the service.
    ///
    /// Issues a GET Service call; success moves the client to Authorized and
    /// primes the bucket cache, failure moves it to Failed. Either way the
    /// client remains usable and `authorize` may be retried.
    pub fn authorize(&self) -> AuthorizeTask {
        let ctx = self.op_context(None);
        let weak = Arc::downgrade(&self.inner);
        Task::spawn("authorize", &self.inner.token(), move |_task| async move {
            let result = fetch_buckets(&ctx).await;
            if let Some(inner) = weak.upgrade() {
                match &result {
                    Ok(buckets) => {
                        *inner.buckets.write().unwrap() = Some(Arc::new(buckets.clone()));
                        *inner.auth.lock().unwrap() = AuthState::Authorized;
                        tracing::info!(buckets = buckets.len(), "authorized");
                    }
                    Err(err) => {
                        *inner.auth.lock().unwrap() = AuthState::Failed;
                        tracing::warn!(code = ?err.code, "authorization failed");
                    }
                }
            }
            result.map(|_| ())
        })
    }

    /// List the names of all buckets owned by these credentials.
    ///
    /// Served from the cache when a previous call (or `authorize`) already
    /// fetched the list; pass through [`S4::refresh_buckets`] to force a
    /// round trip.
    pub fn get_buckets(&self) -> GetBucketsTask {
        if let Some(cached) = self.inner.buckets.read().unwrap().clone() {
            return Task::spawn("get_buckets", &self.inner.token(), move |_task| async move {
                Ok(cached.iter().map(|b| b.name.clone()).collect())
            });
        }
        self.fetch_buckets_task()
    }

    /// Re-fetch the bucket list, bypassing and replacing the cache.
    pub fn refresh_buckets(&self) -> GetBucketsTask {
        self.fetch_buckets_task()
    }

    fn fetch_buckets_task(&self) -> GetBucketsTask {
        let ctx = self.op_context(None);
        let weak = Arc::downgrade(&self.inner);
        Task::spawn("get_buckets", &self.inner.token(), move |_task| async move {
            // First use authorizes implicitly: a service round trip proves or
            // disproves the credentials just like an explicit authorize
            let result = fetch_buckets(&ctx).await;
            if let Some(inner) = weak.upgrade() {
                match &result {
                    Ok(buckets) => {
                        *inner.buckets.write().unwrap() = Some(Arc::new(buckets.clone()));
                        *inner.auth.lock().unwrap() = AuthState::Authorized;
                    }
                    Err(_) => {
                        *inner.auth.lock().unwrap() = AuthState::Failed;
                    }
                }
            }
            Ok(result?.iter().map(|b| b.name.clone()).collect())
        })
    }

    /// A handle for operations on one bucket. Does not touch the network.
    pub fn bucket(&self, name: impl Into<String>) -> Bucket {
        Bucket::new(self.weak(), name.into())
    }

    /// Current authorization state.
    pub fn auth_state(&self) -> AuthState {
        *self.inner.auth.lock().unwrap()
    }

    /// Cancel every outstanding task spawned by this client.
    ///
    /// Tasks created after this call are unaffected.
    pub fn cancel_all(&self) {
        let mut token = self.inner.token.write().unwrap();
        token.cancel();
        *token = CancellationToken::new();
    }

    pub(crate) fn weak(&self) -> Weak<S4Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn op_context(&self, progress: Option<crate::transport::ProgressFn>) -> OpContext {
        OpContext {
            transport: Arc::clone(&self.inner.transport),
            credentials: self.inner.credentials.clone(),
            endpoint: self.inner.config.endpoint.clone(),
            progress,
        }
    }
}

impl S4Inner {
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.read().unwrap().clone()
    }

    pub(crate) fn op_context(&self, progress: Option<crate::transport::ProgressFn>) -> OpContext {
        OpContext {
            transport: Arc::clone(&self.transport),
            credentials: self.credentials.clone(),
            endpoint: self.config.endpoint.clone(),
            progress,
        }
    }
}

async fn fetch_buckets(ctx: &OpContext) -> Result<Vec<BucketInfo>> {
    match Op::get_service().execute(ctx).await? {
        OpOutput::Buckets(buckets) => Ok(buckets),
        _ => Err(S4Error::new(
            ErrorCode::BadServerResponse,
            "unexpected response to service listing",
        )),
    }
}
