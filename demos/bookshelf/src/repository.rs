//! Data access. Every method takes the caller's context and runs on
//! whatever executor it resolves to, so the same code serves both
//! autocommit reads and multi-statement units of work.

use ambit_data::{DataError, Dialect, Page, Pageable, QueryBuilder};
use ambit_data_sqlx::{SqlxErrorExt, TxContext, TxManager};
use sqlx::Postgres;

use crate::models::{AuditEntry, Book, BOOK_COLUMNS};

pub type Ctx = TxContext<Postgres>;

#[derive(Clone)]
pub struct AuditRepository {
    tx: TxManager<Postgres>,
}

impl AuditRepository {
    pub fn new(tx: TxManager<Postgres>) -> Self {
        Self { tx }
    }

    pub async fn record(&self, ctx: &Ctx, book_id: i64, action: &str) -> Result<(), DataError> {
        let exec = self.tx.executor(ctx);
        let mut conn = exec.acquire().await?;
        sqlx::query("INSERT INTO book_audit (book_id, action) VALUES ($1, $2)")
            .bind(book_id)
            .bind(action)
            .execute(&mut *conn)
            .await
            .map_err(|e| e.into_data_error())?;
        tracing::debug!(book_id, action, tx_id = ?exec.transaction_id(), "audit recorded");
        Ok(())
    }

    pub async fn history(&self, ctx: &Ctx, book_id: i64) -> Result<Vec<AuditEntry>, DataError> {
        let exec = self.tx.executor(ctx);
        let mut conn = exec.acquire().await?;
        sqlx::query_as::<_, AuditEntry>(
            "SELECT id, book_id, action FROM book_audit WHERE book_id = $1 ORDER BY id",
        )
        .bind(book_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| e.into_data_error())
    }
}

#[derive(Clone)]
pub struct BookRepository {
    tx: TxManager<Postgres>,
}

impl BookRepository {
    pub fn new(tx: TxManager<Postgres>) -> Self {
        Self { tx }
    }

    /// Load one book, locking the row when the context asks for it.
    pub async fn find(&self, ctx: &Ctx, id: i64) -> Result<Book, DataError> {
        // Bind values come back as text; bind the typed id instead.
        let (sql, _) = QueryBuilder::new("books", Dialect::Postgres)
            .where_eq("id", &id.to_string())
            .lock(ctx.lock_intent())
            .build_select(BOOK_COLUMNS)?;

        let exec = self.tx.executor(ctx);
        let mut conn = exec.acquire().await?;
        sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| e.into_data_error())?
            .ok_or_else(|| DataError::NotFound(format!("book {id} not found")))
    }

    pub async fn list(&self, ctx: &Ctx, pageable: &Pageable) -> Result<Page<Book>, DataError> {
        let mut query = QueryBuilder::new("books", Dialect::Postgres)
            .limit(pageable.size())
            .offset(pageable.offset());
        query = match pageable.sort_order() {
            Some((column, ascending)) => query.order_by(column, ascending),
            None => query.order_by("id", true),
        };
        let (sql, _) = query.build_select(BOOK_COLUMNS)?;
        let (count_sql, _) = query.build_count()?;

        let exec = self.tx.executor(ctx);
        let mut conn = exec.acquire().await?;
        let total: i64 = sqlx::query_scalar(&count_sql)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| e.into_data_error())?;
        let books = sqlx::query_as::<_, Book>(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| e.into_data_error())?;

        Ok(Page::new(books, pageable, total.max(0) as u64))
    }

    pub async fn insert(&self, ctx: &Ctx, title: &str, author: &str, copies: i32) -> Result<Book, DataError> {
        let exec = self.tx.executor(ctx);
        let mut conn = exec.acquire().await?;
        sqlx::query_as::<_, Book>(
            "INSERT INTO books (title, author, copies) VALUES ($1, $2, $3) \
             RETURNING id, title, author, copies",
        )
        .bind(title)
        .bind(author)
        .bind(copies)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| e.into_data_error())
    }

    pub async fn set_copies(&self, ctx: &Ctx, id: i64, copies: i32) -> Result<Book, DataError> {
        let exec = self.tx.executor(ctx);
        let mut conn = exec.acquire().await?;
        sqlx::query_as::<_, Book>(
            "UPDATE books SET copies = $1 WHERE id = $2 RETURNING id, title, author, copies",
        )
        .bind(copies)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| e.into_data_error())?
        .ok_or_else(|| DataError::NotFound(format!("book {id} not found")))
    }

    pub async fn delete(&self, ctx: &Ctx, id: i64) -> Result<(), DataError> {
        let exec = self.tx.executor(ctx);
        let mut conn = exec.acquire().await?;
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| e.into_data_error())?;
        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(format!("book {id} not found")));
        }
        Ok(())
    }
}
