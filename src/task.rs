//! Asynchronous task handles with latched outcomes
//!
//! Every client operation returns a [`Task`] immediately; the work runs on a
//! spawned driver. The handle is a latched promise: once the task reaches a
//! terminal state the outcome is stored, so a callback attached after
//! completion still fires (immediately, from the attaching call). Exactly one
//! terminal callback runs per task, and all callback slots are released at
//! the terminal transition so captured resources do not outlive the task.
//!
//! Cancellation is cooperative through a `CancellationToken` child of the
//! owning client's token. A cancelled task never reports Done or Errored,
//! even if the underlying work races to completion.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::S4Error;
use crate::transport::ProgressFn;
use crate::types::Entry;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, driver not yet running
    Pending,
    /// Driver is executing
    Running,
    /// Finished with a value
    Done,
    /// Finished with an error
    Errored,
    /// Cancelled before a value or error was latched
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }
}

type DoneFn<T> = Box<dyn FnOnce(&T) + Send>;
type ErrorFn = Box<dyn FnOnce(&S4Error) + Send>;
type CancelFn = Box<dyn FnOnce() + Send>;
type UpdateFn = Box<dyn FnMut(f64) + Send>;

/// Callback slots. All are dropped at the terminal transition.
struct Slots<T> {
    on_done: Option<DoneFn<T>>,
    on_error: Option<ErrorFn>,
    on_cancel: Option<CancelFn>,
    on_update: Option<UpdateFn>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self {
            on_done: None,
            on_error: None,
            on_cancel: None,
            on_update: None,
        }
    }
}

struct Inner<T> {
    state: TaskState,
    /// Latched outcome, set exactly once at Done or Errored
    outcome: Option<Result<T, S4Error>>,
    progress: f64,
    slots: Slots<T>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    token: CancellationToken,
    label: &'static str,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn new(label: &'static str, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: TaskState::Pending,
                outcome: None,
                progress: 0.0,
                slots: Slots::default(),
            }),
            notify: Notify::new(),
            token,
            label,
        })
    }

    fn set_running(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == TaskState::Pending {
            inner.state = TaskState::Running;
        }
    }

    /// Latch the outcome and fire the matching terminal callback.
    ///
    /// A no-op when the task is already terminal, so a completion racing a
    /// cancel is silently dropped.
    fn complete(&self, result: Result<T, S4Error>) {
        let (slots, result) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = if result.is_ok() {
                TaskState::Done
            } else {
                TaskState::Errored
            };
            inner.progress = 1.0;
            inner.outcome = Some(result);
            (
                std::mem::take(&mut inner.slots),
                inner.outcome.as_ref().map(|r| r.clone()),
            )
        };
        // Callbacks run outside the lock
        match result {
            Some(Ok(value)) => {
                tracing::debug!(task = self.label, "task done");
                if let Some(cb) = slots.on_done {
                    cb(&value);
                }
            }
            Some(Err(err)) => {
                tracing::debug!(task = self.label, code = ?err.code, "task errored");
                if let Some(cb) = slots.on_error {
                    cb(&err);
                }
            }
            None => unreachable!("outcome was just latched"),
        }
        self.notify.notify_waiters();
    }

    fn cancel(&self) {
        self.token.cancel();
        let slots = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = TaskState::Cancelled;
            std::mem::take(&mut inner.slots)
        };
        tracing::debug!(task = self.label, "task cancelled");
        if let Some(cb) = slots.on_cancel {
            cb();
        }
        self.notify.notify_waiters();
    }

    /// Report a progress ratio. Ignored once the task is terminal.
    ///
    /// The update slot is taken out for the duration of the call and put
    /// back only if the task is still live, so a terminal transition during
    /// the callback releases it.
    fn update(&self, progress: f64) {
        let progress = progress.clamp(0.0, 1.0);
        let mut cb = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            inner.progress = progress;
            inner.slots.on_update.take()
        };
        if let Some(cb) = cb.as_mut() {
            cb(progress);
        }
        if let Some(cb) = cb {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.is_terminal() {
                inner.slots.on_update = Some(cb);
            }
        }
    }
}

/// Handle to an in-flight or finished operation.
///
/// Cloning yields another handle to the same task. Dropping all handles does
/// not cancel the work; call [`Task::cancel`] for that.
pub struct Task<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Spawn a driver for `make`'s future and return the handle.
    ///
    /// The future is raced against a child of `parent`, so cancelling either
    /// the task or the owning client stops the work at its next await point.
    pub(crate) fn spawn<F, Fut>(label: &'static str, parent: &CancellationToken, make: F) -> Self
    where
        F: FnOnce(TaskCtx<T>) -> Fut,
        Fut: Future<Output = Result<T, S4Error>> + Send + 'static,
    {
        let shared = Shared::new(label, parent.child_token());
        let ctx = TaskCtx {
            shared: Arc::downgrade(&shared),
        };
        let fut = make(ctx);
        let driver = Arc::clone(&shared);
        tokio::spawn(async move {
            driver.set_running();
            tokio::select! {
                _ = driver.token.cancelled() => {
                    driver.cancel();
                }
                result = fut => {
                    driver.complete(result);
                }
            }
        });
        Self { shared }
    }

    /// A task that reports `err` asynchronously.
    ///
    /// Used for argument validation failures so the caller always observes
    /// them through the same callback path as service errors.
    pub(crate) fn failed(label: &'static str, err: S4Error) -> Self {
        let shared = Shared::new(label, CancellationToken::new());
        let driver = Arc::clone(&shared);
        tokio::spawn(async move {
            driver.complete(Err(err));
        });
        Self { shared }
    }

    /// A task that is born cancelled, for work requested through a client
    /// that has already been released.
    pub(crate) fn cancelled(label: &'static str) -> Self {
        let shared = Shared::new(label, CancellationToken::new());
        shared.cancel();
        Self { shared }
    }

    /// Attach the success callback. If the task is already Done it fires
    /// immediately, on the calling task.
    pub fn on_done<F>(&self, cb: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let fire = {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                TaskState::Done => true,
                TaskState::Errored | TaskState::Cancelled => false,
                _ => {
                    inner.slots.on_done = Some(Box::new(cb));
                    return self;
                }
            }
        };
        if fire {
            let inner = self.shared.inner.lock().unwrap();
            if let Some(Ok(value)) = inner.outcome.as_ref() {
                let value = value.clone();
                drop(inner);
                cb(&value);
            }
        }
        self
    }

    /// Attach the error callback. Fires immediately when already Errored.
    pub fn on_error<F>(&self, cb: F) -> &Self
    where
        F: FnOnce(&S4Error) + Send + 'static,
    {
        let latched = {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                TaskState::Errored => match inner.outcome.as_ref() {
                    Some(Err(err)) => Some(err.clone()),
                    _ => None,
                },
                TaskState::Done | TaskState::Cancelled => None,
                _ => {
                    inner.slots.on_error = Some(Box::new(cb));
                    return self;
                }
            }
        };
        if let Some(err) = latched {
            cb(&err);
        }
        self
    }

    /// Attach the cancellation callback. Fires immediately when already
    /// Cancelled.
    pub fn on_cancel<F>(&self, cb: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                TaskState::Cancelled => {}
                TaskState::Done | TaskState::Errored => return self,
                _ => {
                    inner.slots.on_cancel = Some(Box::new(cb));
                    return self;
                }
            }
        }
        cb();
        self
    }

    /// Attach the progress callback. May be called many times with ratios in
    /// [0.0, 1.0]; never called after a terminal state.
    pub fn on_update<F>(&self, cb: F) -> &Self
    where
        F: FnMut(f64) + Send + 'static,
    {
        let mut inner = self.shared.inner.lock().unwrap();
        if !inner.state.is_terminal() {
            inner.slots.on_update = Some(Box::new(cb));
        }
        self
    }

    /// Request cancellation. Idempotent; a no-op once terminal.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.shared.inner.lock().unwrap().state
    }

    /// Last reported progress ratio, 1.0 once terminal via Done or Errored.
    pub fn progress(&self) -> f64 {
        self.shared.inner.lock().unwrap().progress
    }

    /// Wait for the terminal state.
    ///
    /// Returns `None` when the task was cancelled, otherwise the latched
    /// outcome. Safe to call from multiple handles concurrently.
    pub async fn wait(&self) -> Option<Result<T, S4Error>> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let inner = self.shared.inner.lock().unwrap();
                match inner.state {
                    TaskState::Cancelled => return None,
                    TaskState::Done | TaskState::Errored => {
                        return inner.outcome.as_ref().map(|r| r.clone());
                    }
                    _ => {}
                }
            }
            notified.await;
        }
    }
}

/// Driver-side view of a task: progress reporting and the cancellation
/// token, without keeping the task alive.
pub(crate) struct TaskCtx<T> {
    shared: Weak<Shared<T>>,
}

impl<T: Clone + Send + 'static> TaskCtx<T> {
    /// A progress sink suitable for handing to the transport layer.
    pub(crate) fn progress_fn(&self) -> ProgressFn {
        let shared = self.shared.clone();
        Arc::new(move |p| {
            if let Some(shared) = shared.upgrade() {
                shared.update(p);
            }
        })
    }
}

/// Authorization task.
pub type AuthorizeTask = Task<()>;
/// Bucket-name listing task.
pub type GetBucketsTask = Task<Vec<String>>;
/// Object download task.
pub type GetTask = Task<Bytes>;
/// Object metadata task (lowercase response headers).
pub type HeadTask = Task<BTreeMap<String, String>>;
/// Listing task, flat or deep.
pub type ListTask = Task<Vec<Entry>>;
/// Object upload task.
pub type PutTask = Task<()>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test]
    async fn test_done_callback_fires_once() {
        let root = CancellationToken::new();
        let hits = counter();
        let task = Task::spawn("test", &root, |_ctx| async { Ok(42u32) });
        let h = Arc::clone(&hits);
        task.on_done(move |v| {
            assert_eq!(*v, 42);
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(task.wait().await, Some(Ok(42)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Done);
    }

    #[tokio::test]
    async fn test_late_attached_callback_still_fires() {
        let root = CancellationToken::new();
        let task = Task::spawn("test", &root, |_ctx| async { Ok("value".to_string()) });
        // Let the driver finish before anything is attached
        assert_eq!(task.wait().await, Some(Ok("value".to_string())));

        let hits = counter();
        let h = Arc::clone(&hits);
        task.on_done(move |v| {
            assert_eq!(v, "value");
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_path() {
        let root = CancellationToken::new();
        let task: Task<u32> = Task::spawn("test", &root, |_ctx| async {
            Err(S4Error::new(ErrorCode::NoSuchKey, "missing"))
        });
        let result = task.wait().await.unwrap();
        assert_eq!(result.unwrap_err().code, ErrorCode::NoSuchKey);
        assert_eq!(task.state(), TaskState::Errored);
        assert_eq!(task.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_completion() {
        let root = CancellationToken::new();
        let done = counter();
        let cancelled = counter();
        let task = Task::spawn("test", &root, |_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1u32)
        });
        let d = Arc::clone(&done);
        let c = Arc::clone(&cancelled);
        task.on_done(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        task.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        assert_eq!(task.wait().await, None);
        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let root = CancellationToken::new();
        let task = Task::spawn("test", &root, |_ctx| async { Ok(7u32) });
        assert_eq!(task.wait().await, Some(Ok(7)));
        task.cancel();
        // The latched outcome survives
        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(task.wait().await, Some(Ok(7)));
    }

    #[tokio::test]
    async fn test_parent_token_cancels_child_tasks() {
        let root = CancellationToken::new();
        let task = Task::spawn("test", &root, |_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1u32)
        });
        root.cancel();
        assert_eq!(task.wait().await, None);
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_task_reports_asynchronously() {
        let task: Task<u32> = Task::failed("test", S4Error::bad_parameter("empty key"));
        let hits = counter();
        let h = Arc::clone(&hits);
        task.on_error(move |err| {
            assert_eq!(err.code, ErrorCode::BadParameter);
            h.fetch_add(1, Ordering::SeqCst);
        });
        let result = task.wait().await.unwrap();
        assert_eq!(result.unwrap_err().code, ErrorCode::BadParameter);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_updates() {
        let root = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = Task::spawn("test", &root, |ctx| async move {
            let progress = ctx.progress_fn();
            progress(0.25);
            progress(0.5);
            Ok(())
        });
        let s = Arc::clone(&seen);
        task.on_update(move |p| {
            s.lock().unwrap().push(p);
        });
        assert_eq!(task.wait().await, Some(Ok(())));
        let seen = seen.lock().unwrap();
        // Updates that arrive before the callback is attached are not
        // replayed, so only require what did arrive to be in order
        for pair in seen.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(task.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_slots_released_on_terminal() {
        struct DropFlag(Arc<AtomicU32>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let root = CancellationToken::new();
        let drops = counter();
        let task = Task::spawn("test", &root, |_ctx| async { Ok(1u32) });
        let flag = DropFlag(Arc::clone(&drops));
        task.on_error(move |_| {
            let _ = &flag;
        });
        assert_eq!(task.wait().await, Some(Ok(1)));
        // The unfired error slot was dropped at the terminal transition
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
