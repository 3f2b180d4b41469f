//! SELECT construction that honours the caller's [`LockIntent`].
//!
//! ```ignore
//! let (sql, params) = QueryBuilder::new("books", Dialect::Postgres)
//!     .where_eq("id", &id)
//!     .lock(ctx.lock_intent())
//!     .build_select("id, title, author")?;
//! // SELECT id, title, author FROM books WHERE id = $1 FOR UPDATE
//! ```

use crate::lock::LockIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `?` placeholders, standard locking clauses.
    Generic,
    /// `?` placeholders. SQLite has no row locks; lock intent is dropped.
    Sqlite,
    /// `?` placeholders, backtick quoting.
    MySql,
    /// `$1, $2, ...` placeholders.
    Postgres,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    /// The locking suffix this dialect understands for `intent`, if any.
    pub fn lock_clause(self, intent: LockIntent) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Generic | Dialect::MySql | Dialect::Postgres => intent.clause(),
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(String, String),
    NotEq(String, String),
    Like(String, String),
    In(String, Vec<String>),
    IsNull(String),
}

impl Condition {
    fn column(&self) -> &str {
        match self {
            Condition::Eq(col, _)
            | Condition::NotEq(col, _)
            | Condition::Like(col, _)
            | Condition::In(col, _)
            | Condition::IsNull(col) => col,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    dialect: Dialect,
    conditions: Vec<Condition>,
    order: Vec<(String, bool)>,
    limit_val: Option<u64>,
    offset_val: Option<u64>,
    lock: LockIntent,
}

impl QueryBuilder {
    pub fn new(table: &str, dialect: Dialect) -> Self {
        Self {
            table: table.to_string(),
            dialect,
            conditions: Vec::new(),
            order: Vec::new(),
            limit_val: None,
            offset_val: None,
            lock: LockIntent::None,
        }
    }

    pub fn where_eq(mut self, column: &str, value: &str) -> Self {
        self.conditions.push(Condition::Eq(column.to_string(), value.to_string()));
        self
    }

    pub fn where_not_eq(mut self, column: &str, value: &str) -> Self {
        self.conditions.push(Condition::NotEq(column.to_string(), value.to_string()));
        self
    }

    pub fn where_like(mut self, column: &str, pattern: &str) -> Self {
        self.conditions.push(Condition::Like(column.to_string(), pattern.to_string()));
        self
    }

    pub fn where_in(mut self, column: &str, values: &[&str]) -> Self {
        self.conditions.push(Condition::In(
            column.to_string(),
            values.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull(column.to_string()));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit_val = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset_val = Some(offset);
        self
    }

    /// Request row locks on the selected rows. Replaces any earlier intent.
    pub fn lock(mut self, intent: LockIntent) -> Self {
        self.lock = intent;
        self
    }

    /// Build a SELECT returning `(sql, bind_values)`.
    ///
    /// Every identifier (table, columns, condition and order columns) must be
    /// a plain or dotted SQL identifier; `*` is accepted as a column.
    pub fn build_select(&self, columns: &str) -> Result<(String, Vec<String>), QueryError> {
        check_identifier(&self.table, false, "table")?;
        for col in columns.split(',').map(str::trim) {
            check_identifier(col, true, "column")?;
        }

        let mut sql = format!("SELECT {columns} FROM {}", self.table);
        let params = self.append_where(&mut sql)?;

        if !self.order.is_empty() {
            let mut clauses = Vec::with_capacity(self.order.len());
            for (col, asc) in &self.order {
                check_identifier(col, false, "order column")?;
                clauses.push(format!("{col} {}", if *asc { "ASC" } else { "DESC" }));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }
        if let Some(limit) = self.limit_val {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset_val {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        if let Some(clause) = self.dialect.lock_clause(self.lock) {
            sql.push(' ');
            sql.push_str(clause);
        }
        Ok((sql, params))
    }

    /// Build a COUNT query. Locking, ordering and paging do not apply.
    pub fn build_count(&self) -> Result<(String, Vec<String>), QueryError> {
        check_identifier(&self.table, false, "table")?;
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let params = self.append_where(&mut sql)?;
        Ok((sql, params))
    }

    fn append_where(&self, sql: &mut String) -> Result<Vec<String>, QueryError> {
        let mut params = Vec::new();
        if self.conditions.is_empty() {
            return Ok(params);
        }
        let mut next = 1usize;
        let mut placeholder = || {
            let p = self.dialect.placeholder(next);
            next += 1;
            p
        };

        let mut clauses = Vec::with_capacity(self.conditions.len());
        for cond in &self.conditions {
            check_identifier(cond.column(), false, "column")?;
            let clause = match cond {
                Condition::Eq(col, val) => {
                    params.push(val.clone());
                    format!("{col} = {}", placeholder())
                }
                Condition::NotEq(col, val) => {
                    params.push(val.clone());
                    format!("{col} != {}", placeholder())
                }
                Condition::Like(col, pat) => {
                    params.push(pat.clone());
                    format!("{col} LIKE {}", placeholder())
                }
                Condition::In(col, vals) => {
                    params.extend(vals.iter().cloned());
                    let list: Vec<_> = vals.iter().map(|_| placeholder()).collect();
                    format!("{col} IN ({})", list.join(", "))
                }
                Condition::IsNull(col) => format!("{col} IS NULL"),
            };
            clauses.push(clause);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    InvalidIdentifier { kind: &'static str, ident: String },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::InvalidIdentifier { kind, ident } => {
                write!(f, "Invalid {kind} identifier: {ident}")
            }
        }
    }
}

impl std::error::Error for QueryError {}

impl From<QueryError> for crate::DataError {
    fn from(err: QueryError) -> Self {
        crate::DataError::Other(err.to_string())
    }
}

fn check_identifier(ident: &str, allow_star: bool, kind: &'static str) -> Result<(), QueryError> {
    let invalid = || QueryError::InvalidIdentifier {
        kind,
        ident: ident.to_string(),
    };
    if allow_star && ident == "*" {
        return Ok(());
    }
    if ident.is_empty() {
        return Err(invalid());
    }
    for segment in ident.split('.') {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return Err(invalid()),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
    }
    Ok(())
}
