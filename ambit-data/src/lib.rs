//! # ambit-data
//!
//! Backend-neutral pieces of the ambit data layer: the [`DataError`]
//! classification, the [`LockIntent`] carried from business code to query
//! construction, a lock-aware [`QueryBuilder`] and pagination types.
//! Driver-specific code lives in `ambit-data-sqlx`.

pub mod error;
pub mod lock;
pub mod page;
pub mod query;

pub use error::DataError;
pub use lock::LockIntent;
pub use page::{Page, Pageable};
pub use query::{Dialect, QueryBuilder, QueryError};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::{DataError, Dialect, LockIntent, Page, Pageable, QueryBuilder};
}
