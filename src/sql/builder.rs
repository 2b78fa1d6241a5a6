//! Renders statements to parameterized PostgreSQL.

use crate::sql::{Select, Statement};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from entity metadata).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Table name, optionally schema-qualified as `schema.table`.
pub(crate) fn qualified_table(table: &str) -> String {
    table.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// `"col" = $n`, or `"col" IS NULL` for a null value.
    fn condition(&mut self, col: &str, val: &Value) -> String {
        if val.is_null() {
            format!("{} IS NULL", quoted(col))
        } else {
            let n = self.push_param(val.clone());
            format!("{} = ${}", quoted(col), n)
        }
    }

    fn where_clause(&mut self, filters: &[(String, Value)]) -> String {
        if filters.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = filters.iter().map(|(k, v)| self.condition(k, v)).collect();
        format!(" WHERE {}", parts.join(" AND "))
    }
}

pub fn render(stmt: &Statement) -> QueryBuf {
    match stmt {
        Statement::Select(s) => select(s),
        Statement::Insert { table, rows } => insert(table, rows),
        Statement::Update { table, key, set } => update(table, key, set),
        Statement::Delete { table, key } => delete(table, key),
    }
}

/// SELECT with exact-match filters, optional ORDER BY, LIMIT, OFFSET.
fn select(s: &Select) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&s.table);
    let where_clause = q.where_clause(&s.filters);
    if s.count_only {
        q.sql = format!("SELECT COUNT(*) AS \"count\" FROM {}{}", table, where_clause);
        return q;
    }
    let order_clause = if s.order_by.is_empty() {
        String::new()
    } else {
        format!(
            " ORDER BY {}",
            s.order_by.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ")
        )
    };
    let limit_clause = s.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = s.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT * FROM {}{}{}{}{}",
        table, where_clause, order_clause, limit_clause, offset_clause
    );
    q
}

/// Multi-row INSERT over the union of all row columns (first-seen order).
/// A row that lacks a column gets DEFAULT for it.
fn insert(table: &str, rows: &[crate::row::Row]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(table);
    let mut cols: Vec<&str> = Vec::new();
    for row in rows {
        for k in row.keys() {
            if !cols.contains(&k) {
                cols.push(k);
            }
        }
    }
    if cols.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES", table);
        return q;
    }
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let values: Vec<String> = cols
            .iter()
            .map(|c| match row.get(c) {
                Some(v) => format!("${}", q.push_param(v.clone())),
                None => "DEFAULT".to_string(),
            })
            .collect();
        tuples.push(format!("({})", values.join(", ")));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        cols.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", "),
        tuples.join(", ")
    );
    q
}

/// UPDATE by key: SET only the given columns.
fn update(table: &str, key: &[(String, Value)], set: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(table);
    let sets: Vec<String> = set
        .iter()
        .map(|(k, v)| format!("{} = ${}", quoted(k), q.push_param(v.clone())))
        .collect();
    let where_clause = q.where_clause(key);
    q.sql = format!("UPDATE {} SET {}{}", table, sets.join(", "), where_clause);
    q
}

/// DELETE by key.
fn delete(table: &str, key: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(table);
    let where_clause = q.where_clause(key);
    q.sql = format!("DELETE FROM {}{}", table, where_clause);
    q
}
