//! Ambient transactions: begin-or-join and the closure helper.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ambit_data::DataError;
use futures_util::FutureExt;
use sqlx::{Database, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::context::{Deadline, TxContext};
use crate::error::SqlxErrorExt;
use crate::executor::Executor;
use crate::pool::ConnectionPool;
use crate::scope::TxScope;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type TxSlot<DB> = Option<Transaction<'static, DB>>;

/// Shared handle to one open transaction.
///
/// Every context derived from the originating `begin` holds a clone. The
/// slot is emptied once the transaction is committed or rolled back, after
/// which acquiring it fails with `DataError::Transaction`.
pub struct TxHandle<DB: Database> {
    id: u64,
    slot: Arc<Mutex<TxSlot<DB>>>,
}

impl<DB: Database> TxHandle<DB> {
    fn new(tx: Transaction<'static, DB>) -> Self {
        Self {
            id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Process-unique id, used in logs and to tell units of work apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether both handles refer to the same transaction.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Wait for exclusive use of the transaction's connection.
    pub(crate) async fn lock(
        &self,
        deadline: &Deadline,
        op: &str,
    ) -> Result<OwnedMutexGuard<TxSlot<DB>>, DataError> {
        let slot = Arc::clone(&self.slot);
        deadline.bound(op, async move { Ok::<_, DataError>(slot.lock_owned().await) }).await
    }

    /// Remove the transaction from the slot, leaving it finished for every
    /// other holder of this handle.
    pub(crate) async fn take(
        &self,
        deadline: &Deadline,
        op: &str,
    ) -> Result<Option<Transaction<'static, DB>>, DataError> {
        let mut guard = self.lock(deadline, op).await?;
        Ok(guard.take())
    }

    /// Non-blocking `take` for use from `Drop`. `None` if the slot is busy
    /// or already empty.
    pub(crate) fn try_take(&self) -> Option<Transaction<'static, DB>> {
        self.slot.try_lock().ok().and_then(|mut guard| guard.take())
    }
}

impl<DB: Database> Clone for TxHandle<DB> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<DB: Database> std::fmt::Debug for TxHandle<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle").field("id", &self.id).finish()
    }
}

/// Entry point of the transaction layer.
///
/// Holds the pool and hands out scopes and executors for a [`TxContext`].
///
/// ```ignore
/// let scope = manager.begin(&ctx).await?;
/// repo.save(scope.context(), &book).await?;
/// scope.finalize().await?;
/// ```
pub struct TxManager<DB: Database> {
    pool: ConnectionPool<DB>,
}

impl<DB: Database> Clone for TxManager<DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<DB: Database> TxManager<DB> {
    pub fn new(pool: ConnectionPool<DB>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool<DB> {
        &self.pool
    }

    /// Start a unit of work, or join the one already bound to `ctx`.
    ///
    /// The returned scope's context carries the transaction. Only the scope
    /// that actually opened the transaction commits or rolls it back; a
    /// joining scope leaves that to the originator.
    ///
    /// When the context has a deadline, that deadline alone bounds the wait
    /// for a pooled connection: an acquire timeout that fires first is
    /// retried. Without one, the pool's acquire timeout applies and surfaces
    /// as `DataError::PoolExhausted`.
    pub async fn begin(&self, ctx: &TxContext<DB>) -> Result<TxScope<DB>, DataError> {
        if let Some(handle) = ctx.transaction() {
            debug!(tx_id = handle.id(), "joining ambient transaction");
            return Ok(TxScope::joined(ctx.clone(), handle.clone()));
        }

        let pool = self.pool.inner().clone();
        let has_deadline = ctx.deadline().at().is_some();
        let tx = ctx
            .deadline()
            .bound("begin", async move {
                loop {
                    match pool.begin().await {
                        Ok(tx) => return Ok::<_, DataError>(tx),
                        Err(sqlx::Error::PoolTimedOut) if has_deadline => {
                            debug!("pool still saturated, waiting until the context deadline");
                        }
                        Err(e) => return Err(e.into_tx_error("begin")),
                    }
                }
            })
            .await?;

        let handle = TxHandle::new(tx);
        debug!(tx_id = handle.id(), "transaction started");
        Ok(TxScope::originator(ctx.with_transaction(handle.clone()), handle))
    }

    /// Executor for `ctx`: its ambient transaction if there is one,
    /// otherwise the pool in autocommit mode.
    pub fn executor(&self, ctx: &TxContext<DB>) -> Executor<DB> {
        Executor::resolve(ctx, self.pool.inner())
    }

    /// Run `f` inside a unit of work.
    ///
    /// - `Ok` commits (when this call opened the transaction).
    /// - `Err` rolls back and returns the error unchanged.
    /// - A panic rolls back, then resumes unwinding with the original payload.
    ///
    /// Called with a context that already carries a transaction, `f` joins
    /// it and the outermost call decides the outcome.
    pub async fn in_transaction<T, E, F, Fut>(&self, ctx: &TxContext<DB>, f: F) -> Result<T, E>
    where
        F: FnOnce(TxContext<DB>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        let scope = self.begin(ctx).await?;
        let inner = scope.context().clone();
        let outcome = AssertUnwindSafe(async move { f(inner).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                scope.finalize().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                let tx_id = scope.transaction_id();
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(tx_id, error = %rollback_err, "rollback after failed unit of work did not complete");
                }
                Err(err)
            }
            Err(payload) => {
                let tx_id = scope.transaction_id();
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(tx_id, error = %rollback_err, "rollback after panic did not complete");
                }
                std::panic::resume_unwind(payload)
            }
        }
    }

    /// Close the underlying pool. A later `begin` fails with `Transaction`;
    /// autocommit statements fail with `Connection`.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
