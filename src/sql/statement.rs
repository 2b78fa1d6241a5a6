//! Engine-neutral statements. Queries and sessions build these; each engine executes them.

use serde_json::Value;
use std::fmt;

use crate::row::Row;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Select {
    pub table: String,
    /// Exact-match filters, ANDed. A null value matches null.
    pub filters: Vec<(String, Value)>,
    pub order_by: Vec<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Return a single `count` column instead of rows.
    pub count_only: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(Select),
    /// Rows may carry different columns; missing columns take the column default.
    Insert { table: String, rows: Vec<Row> },
    Update {
        table: String,
        key: Vec<(String, Value)>,
        set: Vec<(String, Value)>,
    },
    Delete { table: String, key: Vec<(String, Value)> },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Select(s) => &s.table,
            Statement::Insert { table, .. } | Statement::Update { table, .. } | Statement::Delete { table, .. } => table,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(s) => {
                write!(f, "SELECT {} FROM {}", if s.count_only { "COUNT(*)" } else { "*" }, s.table)?;
                if !s.filters.is_empty() {
                    let cols: Vec<&str> = s.filters.iter().map(|(k, _)| k.as_str()).collect();
                    write!(f, " WHERE {}", cols.join(", "))?;
                }
                if let Some(n) = s.limit {
                    write!(f, " LIMIT {}", n)?;
                }
                Ok(())
            }
            Statement::Insert { table, rows } => write!(f, "INSERT INTO {} ({} rows)", table, rows.len()),
            Statement::Update { table, set, .. } => {
                let cols: Vec<&str> = set.iter().map(|(k, _)| k.as_str()).collect();
                write!(f, "UPDATE {} SET {}", table, cols.join(", "))
            }
            Statement::Delete { table, .. } => write!(f, "DELETE FROM {}", table),
        }
    }
}
