//! The per-call context that carries an ambient transaction and lock intent.
//!
//! A [`TxContext`] is an immutable value. Every `with_*` method returns a
//! derived child and leaves `self` untouched, so a callee can never change
//! what its caller sees. Nested functions take `&TxContext<DB>` and resolve
//! everything they need (executor, lock strength, remaining time) from it.

use std::future::Future;
use std::time::Duration;

use ambit_data::{DataError, LockIntent};
use sqlx::Database;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::tx::TxHandle;

/// Deadline and cancellation signal of a context.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: CancellationToken,
}

impl Deadline {
    fn unbounded(cancel: CancellationToken) -> Self {
        Self { at: None, cancel }
    }

    pub fn at(&self) -> Option<Instant> {
        self.at
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut`, giving up with `DataError::Timeout` once the deadline
    /// passes or the token is cancelled. `fut` is dropped in that case.
    pub async fn bound<T, F>(&self, op: &str, fut: F) -> Result<T, DataError>
    where
        F: Future<Output = Result<T, DataError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(DataError::Timeout(format!("{op}: context cancelled")));
        }
        let timed = async {
            match self.at {
                Some(at) => match tokio::time::timeout_at(at, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(DataError::Timeout(format!("{op}: deadline exceeded"))),
                },
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DataError::Timeout(format!("{op}: context cancelled"))),
            result = timed => result,
        }
    }
}

/// Ambient context for one unit of work.
///
/// Holds at most one transaction handle and one lock intent. Cloning is
/// cheap (a few reference counts).
pub struct TxContext<DB: Database> {
    deadline: Deadline,
    tx: Option<TxHandle<DB>>,
    lock: LockIntent,
}

impl<DB: Database> TxContext<DB> {
    /// A root context: no deadline, no transaction, no lock intent.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// A root context cancelled together with `cancel` (e.g. a shutdown or
    /// client-disconnect token).
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            deadline: Deadline::unbounded(cancel),
            tx: None,
            lock: LockIntent::None,
        }
    }

    /// Child whose deadline is `timeout` from now, or the parent's if earlier.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child whose deadline is `at`, or the parent's if earlier.
    pub fn with_deadline(&self, at: Instant) -> Self {
        let mut child = self.clone();
        child.deadline.at = Some(match self.deadline.at {
            Some(parent) => parent.min(at),
            None => at,
        });
        child
    }

    /// Child with its own cancellation token. Cancelling the parent cancels
    /// the child; cancelling the returned token leaves the parent running.
    pub fn cancellable(&self) -> (Self, CancellationToken) {
        let token = self.deadline.cancel.child_token();
        let mut child = self.clone();
        child.deadline.cancel = token.clone();
        (child, token)
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.deadline.is_cancelled()
    }

    /// The ambient transaction bound to this context, if any.
    pub fn transaction(&self) -> Option<&TxHandle<DB>> {
        self.tx.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub(crate) fn with_transaction(&self, handle: TxHandle<DB>) -> Self {
        let mut child = self.clone();
        child.tx = Some(handle);
        child
    }

    // ── Lock intent channel ──────────────────────────────────────────────

    /// Child carrying `intent`. The innermost setting wins; passing
    /// `LockIntent::None` clears an inherited intent for the child's callees.
    pub fn with_lock_intent(&self, intent: LockIntent) -> Self {
        let mut child = self.clone();
        child.lock = intent;
        child
    }

    /// Shorthand for `with_lock_intent(LockIntent::ForUpdate)`.
    pub fn for_update(&self) -> Self {
        self.with_lock_intent(LockIntent::ForUpdate)
    }

    /// Shorthand for `with_lock_intent(LockIntent::ForShare)`.
    pub fn for_share(&self) -> Self {
        self.with_lock_intent(LockIntent::ForShare)
    }

    /// `LockIntent::None` unless some ancestor set one.
    pub fn lock_intent(&self) -> LockIntent {
        self.lock
    }
}

impl<DB: Database> Clone for TxContext<DB> {
    fn clone(&self) -> Self {
        Self {
            deadline: self.deadline.clone(),
            tx: self.tx.clone(),
            lock: self.lock,
        }
    }
}

impl<DB: Database> Default for TxContext<DB> {
    fn default() -> Self {
        Self::background()
    }
}

/// Two contexts are equal when they bind the same transaction (by identity),
/// the same lock intent and the same deadline. Cancellation tokens are not
/// comparable and are ignored.
impl<DB: Database> PartialEq for TxContext<DB> {
    fn eq(&self, other: &Self) -> bool {
        let same_tx = match (&self.tx, &other.tx) {
            (Some(a), Some(b)) => a.same_as(b),
            (None, None) => true,
            _ => false,
        };
        same_tx && self.lock == other.lock && self.deadline.at == other.deadline.at
    }
}

impl<DB: Database> std::fmt::Debug for TxContext<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("tx", &self.tx.as_ref().map(TxHandle::id))
            .field("lock", &self.lock)
            .field("remaining", &self.deadline.remaining())
            .field("cancelled", &self.deadline.is_cancelled())
            .finish()
    }
}
