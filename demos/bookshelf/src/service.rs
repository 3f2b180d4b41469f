use ambit_data::{DataError, Page, Pageable};
use ambit_data_sqlx::TxManager;
use sqlx::Postgres;

use crate::models::{AuditEntry, Book, CreateBookRequest};
use crate::repository::{AuditRepository, BookRepository, Ctx};

/// Use cases. Each mutating operation is one unit of work; the
/// repositories it calls join it through the context.
#[derive(Clone)]
pub struct LibraryService {
    tx: TxManager<Postgres>,
    books: BookRepository,
    audit: AuditRepository,
}

impl LibraryService {
    pub fn new(tx: TxManager<Postgres>) -> Self {
        Self {
            books: BookRepository::new(tx.clone()),
            audit: AuditRepository::new(tx.clone()),
            tx,
        }
    }

    pub async fn list(&self, ctx: &Ctx, pageable: &Pageable) -> Result<Page<Book>, DataError> {
        self.books.list(ctx, pageable).await
    }

    pub async fn get(&self, ctx: &Ctx, id: i64) -> Result<Book, DataError> {
        self.books.find(ctx, id).await
    }

    pub async fn history(&self, ctx: &Ctx, id: i64) -> Result<Vec<AuditEntry>, DataError> {
        self.books.find(ctx, id).await?;
        self.audit.history(ctx, id).await
    }

    pub async fn add(&self, ctx: &Ctx, req: &CreateBookRequest) -> Result<Book, DataError> {
        self.tx
            .in_transaction(ctx, |ctx| async move {
                let book = self.books.insert(&ctx, &req.title, &req.author, req.copies).await?;
                self.audit.record(&ctx, book.id, "added").await?;
                Ok::<_, DataError>(book)
            })
            .await
    }

    /// Take one copy off the shelf. The row stays locked until the unit of
    /// work ends, so two concurrent loans cannot both see the last copy.
    pub async fn lend(&self, ctx: &Ctx, id: i64) -> Result<Book, DataError> {
        let scope = self.tx.begin(ctx).await?;
        let ctx = scope.context();

        let book = self.books.find(&ctx.for_update(), id).await?;
        if book.copies <= 0 {
            scope.rollback().await?;
            return Err(DataError::Conflict(format!("no copies of book {id} left")));
        }
        let book = self.books.set_copies(ctx, id, book.copies - 1).await?;
        self.audit.record(ctx, id, "lent").await?;

        scope.finalize().await?;
        Ok(book)
    }

    pub async fn give_back(&self, ctx: &Ctx, id: i64) -> Result<Book, DataError> {
        self.tx
            .in_transaction(ctx, |ctx| async move {
                let book = self.books.find(&ctx.for_update(), id).await?;
                let book = self.books.set_copies(&ctx, id, book.copies + 1).await?;
                self.audit.record(&ctx, id, "returned").await?;
                Ok::<_, DataError>(book)
            })
            .await
    }

    pub async fn remove(&self, ctx: &Ctx, id: i64) -> Result<(), DataError> {
        self.tx
            .in_transaction(ctx, |ctx| async move {
                self.audit.record(&ctx, id, "removed").await?;
                self.books.delete(&ctx, id).await
            })
            .await
    }
}
