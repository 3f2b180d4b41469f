use serde::{Deserialize, Serialize};

/// Pagination parameters, deserializable from query strings.
///
/// `page` is zero-based. `size` is clamped to `1..=MAX_PAGE_SIZE` by [`Pageable::size`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pageable {
    pub page: u64,
    pub size: u64,
    /// `column` or `column,desc`.
    pub sort: Option<String>,
}

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: None,
        }
    }
}

impl Pageable {
    pub fn size(&self) -> u64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size())
    }

    /// Parsed sort as `(column, ascending)`.
    pub fn sort_order(&self) -> Option<(&str, bool)> {
        let sort = self.sort.as_deref()?.trim();
        if sort.is_empty() {
            return None;
        }
        match sort.split_once(',') {
            Some((col, dir)) => Some((col.trim(), !dir.trim().eq_ignore_ascii_case("desc"))),
            None => Some((sort, true)),
        }
    }
}

/// A page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, pageable: &Pageable, total_elements: u64) -> Self {
        let size = pageable.size();
        Self {
            content,
            page: pageable.page,
            size,
            total_elements,
            total_pages: total_elements.div_ceil(size),
        }
    }
}
