use ambit_data::DataError;
use sqlx::Database;
use tracing::{debug, trace, warn};

use crate::context::TxContext;
use crate::error::SqlxErrorExt;
use crate::executor::Executor;
use crate::tx::TxHandle;

/// The scoped finalizer returned by [`TxManager::begin`](crate::TxManager::begin).
///
/// Exactly one of [`finalize`](Self::finalize) or [`rollback`](Self::rollback)
/// should end an originating scope. Both consume the scope. A scope dropped
/// without either (an early `?` return, a panic unwinding through it, a
/// cancelled task) rolls its transaction back.
///
/// Joining scopes never commit or roll back; they exist so that every layer
/// of a call chain can follow the same begin/finalize shape.
#[must_use = "a transaction scope rolls back when dropped without `finalize`"]
pub struct TxScope<DB: Database> {
    ctx: TxContext<DB>,
    handle: TxHandle<DB>,
    originator: bool,
    done: bool,
}

impl<DB: Database> TxScope<DB> {
    pub(crate) fn originator(ctx: TxContext<DB>, handle: TxHandle<DB>) -> Self {
        Self {
            ctx,
            handle,
            originator: true,
            done: false,
        }
    }

    pub(crate) fn joined(ctx: TxContext<DB>, handle: TxHandle<DB>) -> Self {
        Self {
            ctx,
            handle,
            originator: false,
            done: false,
        }
    }

    /// The context bound to this unit of work. Pass it (or contexts derived
    /// from it) to every callee that should take part.
    pub fn context(&self) -> &TxContext<DB> {
        &self.ctx
    }

    /// Executor bound to the scope's transaction.
    pub fn executor(&self) -> Executor<DB> {
        Executor::for_transaction(&self.handle, &self.ctx)
    }

    /// `true` if this scope opened the transaction and owns its outcome.
    pub fn is_originator(&self) -> bool {
        self.originator
    }

    pub fn transaction_id(&self) -> u64 {
        self.handle.id()
    }

    /// Commit the transaction if this scope opened it.
    ///
    /// A joining scope returns `Ok(())` without touching the transaction.
    /// A commit that is rejected by a lock or serialization conflict returns
    /// `DataError::Conflict`; the transaction is gone either way.
    pub async fn finalize(mut self) -> Result<(), DataError> {
        let tx_id = self.handle.id();
        if !self.originator {
            trace!(tx_id, "joined scope finalized, outcome left to originator");
            self.done = true;
            return Ok(());
        }

        let Some(tx) = self.handle.take(self.ctx.deadline(), "commit").await? else {
            self.done = true;
            return Err(DataError::Transaction(format!(
                "transaction {tx_id} already finished"
            )));
        };
        self.done = true;

        let result = self
            .ctx
            .deadline()
            .bound("commit", async move {
                tx.commit().await.map_err(|e| e.into_tx_error("commit"))
            })
            .await;
        match &result {
            Ok(()) => debug!(tx_id, "transaction committed"),
            Err(err) => warn!(tx_id, error = %err, "commit failed"),
        }
        result
    }

    /// Roll the transaction back if this scope opened it.
    pub async fn rollback(mut self) -> Result<(), DataError> {
        let tx_id = self.handle.id();
        if !self.originator {
            trace!(tx_id, "joined scope rollback ignored, outcome left to originator");
            self.done = true;
            return Ok(());
        }

        let taken = self.handle.take(self.ctx.deadline(), "rollback").await?;
        self.done = true;
        let Some(tx) = taken else {
            return Ok(());
        };

        self.ctx
            .deadline()
            .bound("rollback", async move {
                tx.rollback().await.map_err(|e| e.into_tx_error("rollback"))
            })
            .await?;
        debug!(tx_id, "transaction rolled back");
        Ok(())
    }
}

impl<DB: Database> Drop for TxScope<DB> {
    fn drop(&mut self) {
        if !self.originator || self.done {
            return;
        }
        let tx_id = self.handle.id();
        match self.handle.try_take() {
            // Dropping an open sqlx transaction queues a ROLLBACK that runs
            // before the connection is handed out again.
            Some(tx) => {
                warn!(tx_id, "transaction scope dropped without finalize, rolling back");
                drop(tx);
            }
            None => {
                warn!(tx_id, "transaction scope dropped while its connection was in use, rollback deferred to release");
            }
        }
    }
}

impl<DB: Database> std::fmt::Debug for TxScope<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxScope")
            .field("tx_id", &self.handle.id())
            .field("originator", &self.originator)
            .field("done", &self.done)
            .finish()
    }
}
