use ambit_data::Pageable;
use serde::{Deserialize, Serialize};

pub const BOOK_COLUMNS: &str = "id, title, author, copies";
pub const SORTABLE_COLUMNS: &[&str] = &["id", "title", "author", "copies"];

/// Reject a `?sort=` naming anything but a book column.
pub fn check_sort(pageable: &Pageable) -> Result<(), String> {
    match pageable.sort_order() {
        Some((column, _)) if !SORTABLE_COLUMNS.contains(&column) => Err(format!(
            "cannot sort by `{column}`; expected one of {}",
            SORTABLE_COLUMNS.join(", ")
        )),
        _ => Ok(()),
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub copies: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    #[serde(default = "one")]
    pub copies: i32,
}

fn one() -> i32 {
    1
}

impl CreateBookRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() || self.title.len() > 200 {
            return Err("title must be 1 to 200 characters".into());
        }
        if self.author.trim().is_empty() {
            return Err("author must not be empty".into());
        }
        if self.copies < 0 {
            return Err("copies must not be negative".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub book_id: i64,
    pub action: String,
}
