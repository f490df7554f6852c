//! s4 - Asynchronous Amazon S3 client
//!
//! Every operation returns a [`Task`] immediately; completion, failure,
//! cancellation, and progress are delivered through callbacks or awaited via
//! [`Task::wait`]. Listings flatten S3's paginated, delimiter-based protocol
//! into ordered entry sequences, including a recursive deep walk.
//!
//! ```no_run
//! use s4::S4;
//!
//! # async fn demo() -> s4::Result<()> {
//! let client = S4::new("ACCESS_KEY", "SECRET_KEY")?;
//! let bucket = client.bucket("photos");
//! if let Some(result) = bucket.list("2024/").wait().await {
//!     for entry in result? {
//!         println!("{} {}", entry.key, entry.size);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod client;
pub mod error;
mod list;
pub mod op;
pub mod signer;
pub mod task;
pub mod transport;
pub mod types;

pub use bucket::Bucket;
pub use client::S4;
pub use error::{ErrorCode, Result, S4Error};
pub use op::{active_ops, ActiveOp};
pub use task::{
    AuthorizeTask, GetBucketsTask, GetTask, HeadTask, ListTask, PutTask, Task, TaskState,
};
pub use transport::{
    HyperTransport, ProgressFn, Transport, TransportError, TransportRequest, TransportResponse,
};
pub use types::{AuthState, BucketInfo, Credentials, Entry, ListPage, S4Config};
