//! Connection Lifecycle
//!
//! State machine and worker bookkeeping shared by feed adapters.
//!
//! An adapter owns one [`ConnectionLifecycle`]. `start` moves it from
//! `DISCONNECTED` to `CONNECTING` and spawns the worker for a new epoch;
//! the worker moves it to `CONNECTED`, delivers `on_connected` and then
//! runs the adapter's emission loop with an [`EpochContext`]. `stop`
//! cancels the epoch, joins the worker for a bounded grace period and
//! delivers the single `on_disconnected`.
//!
//! Every callback of an epoch except the final `on_disconnected` comes
//! from the worker task. A panic escaping a callback is fatal to the
//! epoch: the worker tears it down itself and reports the reason.
//!
//! While `on_disconnected` runs the adapter reads as `DISCONNECTED` but
//! `start` is still rejected, so the next epoch's `on_connected` can never
//! overlap or precede it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectionState, FeedError, RawMessage, SharedFeedEventHandler};

/// How long `stop` waits for the worker before aborting it.
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Reason passed to `on_disconnected` for a requested disconnect.
pub const DISCONNECT_REASON: &str = "Disconnect requested";

const STREAM_ENDED_REASON: &str = "Feed stream ended";

/// Internal state while the final `on_disconnected` is being delivered.
/// Reported as `DISCONNECTED`; `start` only accepts the real value.
const TEARING_DOWN: u8 = u8::MAX;

struct Epoch {
    number: u64,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    handler: SharedFeedEventHandler,
}

/// Connection state, sequence counter and current epoch of one adapter.
pub struct ConnectionLifecycle {
    adapter_id: String,
    grace: Duration,
    state: AtomicU8,
    sequence: AtomicU64,
    epochs: AtomicU64,
    current: Mutex<Option<Epoch>>,
}

impl ConnectionLifecycle {
    /// Create a lifecycle with the default disconnect grace period.
    #[must_use]
    pub fn new(adapter_id: impl Into<String>) -> Arc<Self> {
        Self::with_grace(adapter_id, DISCONNECT_GRACE)
    }

    /// Create a lifecycle with a custom disconnect grace period.
    #[must_use]
    pub fn with_grace(adapter_id: impl Into<String>, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            adapter_id: adapter_id.into(),
            grace,
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            sequence: AtomicU64::new(0),
            epochs: AtomicU64::new(0),
            current: Mutex::new(None),
        })
    }

    /// Adapter id used in every callback.
    #[must_use]
    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the adapter is `CONNECTED`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of epochs started so far.
    #[must_use]
    pub fn epoch_count(&self) -> u64 {
        self.epochs.load(Ordering::SeqCst)
    }

    /// Fail unless the adapter is `CONNECTED`.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::NotConnected` in any other state.
    pub fn ensure_connected(&self) -> Result<(), FeedError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(FeedError::NotConnected(self.adapter_id.clone()))
        }
    }

    /// Start a new epoch running `run` on the current Tokio runtime.
    ///
    /// The sequence counter restarts at 0.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::NoRuntime` outside a Tokio runtime and
    /// `FeedError::AlreadyConnected` unless the adapter is `DISCONNECTED`.
    pub fn start<F, Fut>(
        self: &Arc<Self>,
        handler: SharedFeedEventHandler,
        run: F,
    ) -> Result<(), FeedError>
    where
        F: FnOnce(EpochContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime =
            Handle::try_current().map_err(|_| FeedError::NoRuntime(self.adapter_id.clone()))?;

        let mut current = self.current.lock();
        self.state
            .compare_exchange(
                ConnectionState::Disconnected.as_u8(),
                ConnectionState::Connecting.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| FeedError::AlreadyConnected(self.adapter_id.clone()))?;

        self.sequence.store(0, Ordering::SeqCst);
        let number = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let body = run(EpochContext {
            lifecycle: Arc::clone(self),
            handler: Arc::clone(&handler),
            cancel: cancel.clone(),
        });

        let worker = {
            let lifecycle = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            runtime.spawn(async move { lifecycle.drive(number, cancel, handler, body).await })
        };

        *current = Some(Epoch {
            number,
            cancel,
            worker,
            handler,
        });
        drop(current);

        tracing::debug!(adapter_id = %self.adapter_id, epoch = number, "Feed epoch started");
        Ok(())
    }

    /// End the current epoch. No-op when there is none.
    ///
    /// Delivers `on_disconnected` after the worker has finished or been
    /// aborted.
    pub async fn stop(&self) {
        let epoch = self.current.lock().take();
        let Some(epoch) = epoch else {
            return;
        };

        epoch.cancel.cancel();
        let mut worker = epoch.worker;
        if tokio::time::timeout(self.grace, &mut worker).await.is_err() {
            tracing::warn!(
                adapter_id = %self.adapter_id,
                grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                "Feed worker did not stop in time, aborting"
            );
            worker.abort();
            // An aborted worker keeps running until its next yield point.
            let _ = worker.await;
        }

        let _teardown = Teardown::begin(&self.state);
        tracing::info!(adapter_id = %self.adapter_id, epoch = epoch.number, "Feed disconnected");
        epoch
            .handler
            .on_disconnected(&self.adapter_id, DISCONNECT_REASON);
    }

    async fn drive<Fut>(
        self: Arc<Self>,
        number: u64,
        cancel: CancellationToken,
        handler: SharedFeedEventHandler,
        body: Fut,
    ) where
        Fut: Future<Output = ()> + Send,
    {
        if cancel.is_cancelled() {
            return;
        }
        if self
            .state
            .compare_exchange(
                ConnectionState::Connecting.as_u8(),
                ConnectionState::Connected.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        tracing::info!(adapter_id = %self.adapter_id, epoch = number, "Feed connected");

        let outcome = AssertUnwindSafe(async {
            handler.on_connected(&self.adapter_id);
            body.await;
        })
        .catch_unwind()
        .await;

        let reason = match outcome {
            Ok(()) if cancel.is_cancelled() => return,
            Ok(()) => STREAM_ENDED_REASON.to_string(),
            Err(panic) => format!("Feed handler panicked: {}", panic_message(panic.as_ref())),
        };
        self.fail(number, &reason);
    }

    fn fail(&self, number: u64, reason: &str) {
        let epoch = {
            let mut current = self.current.lock();
            if current.as_ref().is_some_and(|e| e.number == number) {
                current.take()
            } else {
                None
            }
        };
        // A concurrent `stop` owns the teardown.
        let Some(epoch) = epoch else {
            return;
        };

        epoch.cancel.cancel();
        let _teardown = Teardown::begin(&self.state);
        tracing::error!(adapter_id = %self.adapter_id, epoch = number, reason, "Feed epoch failed");
        epoch.handler.on_disconnected(&self.adapter_id, reason);
    }
}

/// Holds the state at [`TEARING_DOWN`] until dropped, then releases it as
/// `DISCONNECTED`, also when `on_disconnected` panics.
struct Teardown<'a>(&'a AtomicU8);

impl<'a> Teardown<'a> {
    fn begin(state: &'a AtomicU8) -> Self {
        state.store(TEARING_DOWN, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.0
            .store(ConnectionState::Disconnected.as_u8(), Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ConnectionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLifecycle")
            .field("adapter_id", &self.adapter_id)
            .field("state", &self.state())
            .field("epochs", &self.epoch_count())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// =============================================================================
// Epoch Context
// =============================================================================

/// Worker-side handle for one epoch.
///
/// Every emitting method is a no-op returning `false` once the epoch is
/// cancelled.
pub struct EpochContext {
    lifecycle: Arc<ConnectionLifecycle>,
    handler: SharedFeedEventHandler,
    cancel: CancellationToken,
}

impl EpochContext {
    /// Adapter id.
    #[must_use]
    pub fn adapter_id(&self) -> &str {
        self.lifecycle.adapter_id()
    }

    /// Cancellation token of this epoch.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the epoch has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver `payload` with the next sequence number.
    pub fn emit(&self, payload: Vec<u8>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let sequence = self.lifecycle.sequence.fetch_add(1, Ordering::SeqCst);
        self.handler.on_message(
            self.adapter_id(),
            RawMessage::new(payload, Utc::now(), sequence),
        );
        true
    }

    /// Report a non-fatal error.
    pub fn report_error(&self, error: &FeedError) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.handler.on_error(self.adapter_id(), error);
        true
    }

    /// Report an unanswered heartbeat.
    pub fn report_heartbeat_timeout(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.handler.on_heartbeat_timeout(self.adapter_id());
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
