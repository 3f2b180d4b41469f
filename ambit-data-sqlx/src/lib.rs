//! # ambit-data-sqlx
//!
//! Ambient transactions over a [SQLx](https://github.com/launchbadge/sqlx)
//! pool. Business code opens a unit of work once; every repository it calls
//! receives the same [`TxContext`] and runs its statements on the same
//! transaction without any parameter threading beyond the context itself.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionPool`] | Process-wide pool with startup probe and [`ping`](ConnectionPool::ping) |
//! | [`PoolConfig`] | Pool sizing, loadable from `app.database.*` configuration |
//! | [`TxContext`] | Immutable per-call context: deadline, cancellation, transaction, lock intent |
//! | [`TxManager`] | `begin` (start or join), `executor`, `in_transaction` |
//! | [`TxScope`] | Scoped finalizer: commit on `finalize`, rollback on `rollback` or drop |
//! | [`Executor`] | Transaction connection if one is bound, pooled connection otherwise |
//! | [`PoolHealth`] | `HealthIndicator` named `db` |
//! | [`SqlxErrorExt`] | `sqlx::Error` → `DataError` classification |
//!
//! # Feature flags
//!
//! | Feature    | Driver |
//! |------------|--------|
//! | `sqlite`   | SQLite via `sqlx/sqlite` |
//! | `postgres` | PostgreSQL via `sqlx/postgres` |
//! | `mysql`    | MySQL via `sqlx/mysql` |
//!
//! # Example
//!
//! ```ignore
//! use ambit_data_sqlx::prelude::*;
//! use sqlx::Postgres;
//!
//! async fn transfer(tx: &TxManager<Postgres>, ctx: &TxContext<Postgres>) -> Result<(), DataError> {
//!     tx.in_transaction(ctx, |ctx| async move {
//!         let from = accounts.load(&ctx.for_update(), 1).await?;
//!         accounts.debit(&ctx, &from, 100).await?;
//!         ledger.record(&ctx, 1, -100).await
//!     })
//!     .await
//! }
//! ```
//!
//! The scope form gives the caller explicit control:
//!
//! ```ignore
//! let scope = tx.begin(&ctx).await?;
//! repo.save(scope.context(), &book).await?; // an early `?` return rolls back
//! scope.finalize().await?;
//! ```

pub mod context;
pub mod error;
pub mod executor;
pub mod pool;
pub mod scope;
pub mod tx;

pub use context::{Deadline, TxContext};
pub use error::{SqlxErrorExt, SqlxResult};
pub use executor::{Executor, ExecutorConn};
pub use pool::{ConnectionPool, PoolConfig, PoolHealth, PoolSizing, PING_TIMEOUT};
pub use scope::TxScope;
pub use tx::{TxHandle, TxManager};

/// Re-exports of the most commonly used types from both `ambit-data` and this crate.
pub mod prelude {
    pub use crate::{
        ConnectionPool, Executor, PoolConfig, SqlxErrorExt, TxContext, TxManager, TxScope,
    };
    pub use ambit_data::prelude::*;
}
