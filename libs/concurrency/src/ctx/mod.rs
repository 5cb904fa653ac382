//! Cancellation-aware execution context, modeled after the golang Context
//! (https://pkg.go.dev/context).
//!
//! Context is essentially a cancellation token with a deadline, which should be passed
//! down the call stack and awaited together with every blocking call:
//! instead of "awaiting for the next line from the client", you "await for the next line
//! OR for the context to get canceled". This way shutdown, inbound read deadlines and
//! outbound RPC deadlines are all handled the same way.
//!
//! It is NOT possible to extend the context provided by the caller, who defines
//! how long it allows the function call to execute.
use crate::time;
use std::{fmt, future::Future, sync::Arc};
use tokio::sync::watch;


/// Contexts are composed into a tree via `_parent` link.
/// We maintain an invariant `_parent.deadline >= deadline`.
/// If a parent gets canceled, the child also gets canceled immediately afterwards,
/// although not atomically. If deadline passes the context also gets canceled.
///
/// The cascade cancellation is implemented by spawning a tokio task awaiting
/// for the parent to be canceled (or the deadline to pass) and canceling the child afterwards.
/// The task also awaits the child itself, so that it terminates once the child is dropped.
pub struct Ctx(Arc<Inner>);

struct Inner {
    /// Holds `true` once this context is canceled.
    canceled: Arc<watch::Sender<bool>>,
    /// Deadline after which the context will be automatically canceled.
    deadline: time::Deadline,
    /// Parent context.
    _parent: Option<Arc<Inner>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Wakes the task propagating the parent cancellation, so that it doesn't leak.
        self.canceled.send_replace(true);
    }
}

/// Error returned when the blocking operation was interrupted
/// due to context getting canceled.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("canceled")]
pub struct Canceled;

/// Wraps result with `Canceled` as an error.
pub type OrCanceled<T> = std::result::Result<T, Canceled>;

/// Awaits until `canceled` holds `true`. Cancel-safe.
async fn recv_canceled(canceled: &watch::Sender<bool>) {
    let mut recv = canceled.subscribe();
    // `recv` fails only if the sender is dropped, but we hold a reference to it.
    let _ = recv.wait_for(|canceled| *canceled).await;
}

/// Constructs a top-level context.
/// Should be called only at the start of the `main()` function of the binary.
pub fn root() -> Ctx {
    Ctx(Arc::new(Inner {
        canceled: Arc::new(watch::Sender::new(false)),
        deadline: time::Deadline::Infinite,
        _parent: None,
    }))
}

impl fmt::Debug for Ctx {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Ctx")
            .field("deadline", &self.0.deadline)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Ctx {
    /// Constructs a new child context.
    /// Has to be called within a tokio runtime.
    fn child(&self, deadline: time::Deadline) -> Self {
        let deadline = std::cmp::min(self.0.deadline, deadline);
        let parent_canceled = self.0.canceled.clone();
        let child_canceled = Arc::new(watch::Sender::new(!self.is_active()));
        let child = Self(Arc::new(Inner {
            canceled: child_canceled.clone(),
            deadline,
            _parent: Some(self.0.clone()),
        }));
        // The task holds only the `canceled` senders, not the contexts themselves,
        // to avoid a reference loop: the child is canceled when dropped, which
        // guarantees that this task eventually completes.
        tokio::spawn(async move {
            tokio::select! {
                () = time::sleep_until(deadline) => {
                    child_canceled.send_replace(true);
                }
                () = recv_canceled(&parent_canceled) => {
                    child_canceled.send_replace(true);
                }
                () = recv_canceled(&child_canceled) => {}
            }
        });
        child
    }

    /// Cascade cancels this context and all the descendants.
    pub fn cancel(&self) {
        self.0.canceled.send_replace(true);
    }

    /// Awaits until this context gets canceled.
    pub async fn canceled(&self) {
        recv_canceled(&self.0.canceled).await
    }

    /// Checks if this context is still active (i.e., not canceled).
    pub fn is_active(&self) -> bool {
        !*self.0.canceled.borrow()
    }

    /// The time at which this context will be canceled.
    /// Remember that this is just a hint, because the context
    /// may get canceled before the deadline.
    pub fn deadline(&self) -> time::Deadline {
        self.0.deadline
    }

    /// Constructs a sub-context with deadline `d`.
    /// Use `Deadline::Infinite` to get an owned child with the deadline of this context,
    /// e.g. for a spawned task.
    pub fn with_deadline(&self, d: time::Deadline) -> Self {
        self.child(d)
    }

    /// Constructs a sub-context with deadline `now() + d`.
    pub fn with_timeout(&self, d: time::Duration) -> Self {
        self.child(time::Deadline::after(time::now(), d))
    }

    /// Awaits until the provided future `fut` completes, or the context gets canceled.
    /// `fut` is required to be cancel-safe: it is dropped at an arbitrary suspension
    /// point on cancellation.
    pub async fn wait<F: Future>(&self, fut: F) -> OrCanceled<F::Output> {
        // Check first, so that an already canceled context never polls `fut`.
        if !self.is_active() {
            return Err(Canceled);
        }
        tokio::select! {
            output = fut => Ok(output),
            () = recv_canceled(&self.0.canceled) => Err(Canceled),
        }
    }

    /// Waits for a specific time.
    pub async fn sleep(&self, d: time::Duration) -> OrCanceled<()> {
        self.wait(tokio::time::sleep(time::to_std(d))).await
    }
}

/// anyhow::Error + "canceled" variant.
/// Useful for working with concurrent code which doesn't need structured errors,
/// but needs to handle cancelation explicitly.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Context has been canceled before call completion.
    #[error(transparent)]
    Canceled(#[from] Canceled),
    /// Other error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result with `ctx::Error`.
pub type Result<T> = std::result::Result<T, Error>;
