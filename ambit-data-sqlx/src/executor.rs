//! Resolving where a statement runs.
//!
//! An [`Executor`] is resolved from a context: the ambient transaction when
//! the context carries one, the pool otherwise. Repositories never need to
//! know which.
//!
//! ```ignore
//! let exec = manager.executor(&ctx);
//! let mut conn = exec.acquire().await?;
//! sqlx::query("UPDATE books SET title = $1 WHERE id = $2")
//!     .bind(title)
//!     .bind(id)
//!     .execute(&mut *conn)
//!     .await
//!     .map_err(|e| e.into_data_error())?;
//! ```

use std::ops::{Deref, DerefMut};

use ambit_data::DataError;
use sqlx::pool::PoolConnection;
use sqlx::{Database, Pool};
use tokio::sync::OwnedMutexGuard;

use crate::context::{Deadline, TxContext};
use crate::error::SqlxErrorExt;
use crate::tx::{TxHandle, TxSlot};

enum Target<DB: Database> {
    Transaction(TxHandle<DB>),
    Pool(Pool<DB>),
}

/// Where statements for one context are sent.
pub struct Executor<DB: Database> {
    target: Target<DB>,
    deadline: Deadline,
}

impl<DB: Database> Executor<DB> {
    pub(crate) fn resolve(ctx: &TxContext<DB>, pool: &Pool<DB>) -> Self {
        match ctx.transaction() {
            Some(handle) => Self::for_transaction(handle, ctx),
            None => Self {
                target: Target::Pool(pool.clone()),
                deadline: ctx.deadline().clone(),
            },
        }
    }

    pub(crate) fn for_transaction(handle: &TxHandle<DB>, ctx: &TxContext<DB>) -> Self {
        Self {
            target: Target::Transaction(handle.clone()),
            deadline: ctx.deadline().clone(),
        }
    }

    /// `true` when statements run inside an ambient transaction.
    pub fn is_transaction(&self) -> bool {
        matches!(self.target, Target::Transaction(_))
    }

    pub fn transaction_id(&self) -> Option<u64> {
        match &self.target {
            Target::Transaction(handle) => Some(handle.id()),
            Target::Pool(_) => None,
        }
    }

    /// Check out a connection to run statements on.
    ///
    /// Inside a transaction this waits for exclusive use of the transaction's
    /// single connection, so statements of one unit of work never overlap.
    /// Drop the returned connection before acquiring again from the same
    /// unit of work. Outside a transaction a pooled connection is checked
    /// out in autocommit mode.
    ///
    /// Both waits are bounded by the context deadline.
    pub async fn acquire(&self) -> Result<ExecutorConn<DB>, DataError> {
        match &self.target {
            Target::Transaction(handle) => {
                let guard = handle.lock(&self.deadline, "acquire").await?;
                if guard.is_none() {
                    return Err(DataError::Transaction(format!(
                        "transaction {} already finished",
                        handle.id()
                    )));
                }
                Ok(ExecutorConn {
                    inner: ConnInner::Transaction(guard),
                })
            }
            Target::Pool(pool) => {
                let pool = pool.clone();
                let conn = self
                    .deadline
                    .bound("acquire", async move {
                        pool.acquire().await.map_err(|e| e.into_data_error())
                    })
                    .await?;
                Ok(ExecutorConn {
                    inner: ConnInner::Pool(conn),
                })
            }
        }
    }
}

impl<DB: Database> Clone for Executor<DB> {
    fn clone(&self) -> Self {
        let target = match &self.target {
            Target::Transaction(handle) => Target::Transaction(handle.clone()),
            Target::Pool(pool) => Target::Pool(pool.clone()),
        };
        Self {
            target,
            deadline: self.deadline.clone(),
        }
    }
}

impl<DB: Database> std::fmt::Debug for Executor<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Target::Transaction(handle) => f
                .debug_struct("Executor")
                .field("transaction", &handle.id())
                .finish(),
            Target::Pool(_) => f.debug_struct("Executor").field("transaction", &"none").finish(),
        }
    }
}

enum ConnInner<DB: Database> {
    Transaction(OwnedMutexGuard<TxSlot<DB>>),
    Pool(PoolConnection<DB>),
}

/// A connection checked out through an [`Executor`].
///
/// Dereferences to the driver connection, so `&mut *conn` can be passed to
/// any sqlx query. Dropping it releases the transaction for the next
/// statement, or returns a pooled connection to the pool.
pub struct ExecutorConn<DB: Database> {
    inner: ConnInner<DB>,
}

impl<DB: Database> ExecutorConn<DB> {
    pub fn is_transaction(&self) -> bool {
        matches!(self.inner, ConnInner::Transaction(_))
    }
}

impl<DB: Database> std::fmt::Debug for ExecutorConn<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConn")
            .field("transaction", &self.is_transaction())
            .finish()
    }
}

impl<DB: Database> Deref for ExecutorConn<DB> {
    type Target = DB::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.inner {
            ConnInner::Transaction(guard) => match guard.as_deref() {
                Some(conn) => conn,
                None => unreachable!("executor connection outlived its transaction"),
            },
            ConnInner::Pool(conn) => conn,
        }
    }
}

impl<DB: Database> DerefMut for ExecutorConn<DB> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.inner {
            ConnInner::Transaction(guard) => match guard.as_deref_mut() {
                Some(conn) => conn,
                None => unreachable!("executor connection outlived its transaction"),
            },
            ConnInner::Pool(conn) => conn,
        }
    }
}
