//! In-process engine: tables held in memory, transactions buffered and replayed on commit.
//! Records every statement so callers can see which shard was touched.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{ConnectOptions, DatabaseConfig};
use crate::engine::{EngineFactory, ShardConnection, ShardEngine};
use crate::entity::ShardId;
use crate::error::{ConfigError, ShardError};
use crate::row::Row;
use crate::sql::{Select, Statement};

/// URL scheme accepted by [`MemoryEngineFactory`].
pub const MEMORY_URL_PREFIX: &str = "memory://";

#[derive(Clone, Debug, Default)]
struct MemTable {
    rows: Vec<Row>,
    /// Column sets that must be unique across rows.
    unique: Vec<Vec<String>>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, MemTable>,
    log: Vec<String>,
    begins: usize,
    fail_next_commit: bool,
}

pub struct MemoryEngine {
    shard: ShardId,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEngine {
    pub fn new(shard: impl Into<ShardId>) -> Self {
        MemoryEngine {
            shard: shard.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }

    /// Declare a table and its unique keys. Tables are also created implicitly on first insert.
    pub fn create_table(&self, table: &str, unique: &[&[&str]]) {
        let mut state = self.lock();
        let t = state.tables.entry(table.to_string()).or_default();
        t.unique = unique
            .iter()
            .map(|cols| cols.iter().map(|c| c.to_string()).collect())
            .collect();
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Executed statements, `BEGIN`, `COMMIT` and `ROLLBACK`, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Number of transactions opened on this engine.
    pub fn begins(&self) -> usize {
        self.lock().begins
    }

    /// Make the next commit on this engine fail.
    pub fn fail_next_commit(&self) {
        self.lock().fail_next_commit = true;
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl ShardEngine for MemoryEngine {
    fn shard_id(&self) -> &ShardId {
        &self.shard
    }

    async fn begin(&self) -> Result<Box<dyn ShardConnection>, ShardError> {
        {
            let mut state = self.lock();
            state.begins += 1;
            state.log.push("BEGIN".into());
        }
        Ok(Box::new(MemoryConnection {
            shard: self.shard.clone(),
            state: self.state.clone(),
            writes: Vec::new(),
            failed: false,
        }))
    }
}

struct MemoryConnection {
    shard: ShardId,
    state: Arc<Mutex<MemoryState>>,
    /// Writes accepted in this transaction, replayed over committed state.
    writes: Vec<Statement>,
    /// Set once a statement fails; the transaction then only accepts rollback.
    failed: bool,
}

impl MemoryConnection {
    /// Committed tables with this transaction's writes applied.
    fn view(&self, committed: &HashMap<String, MemTable>) -> Result<HashMap<String, MemTable>, ShardError> {
        let mut tables = committed.clone();
        for w in &self.writes {
            apply_write(&self.shard, &mut tables, w)?;
        }
        Ok(tables)
    }

    fn ensure_usable(&self) -> Result<(), ShardError> {
        if self.failed {
            return Err(ShardError::Transaction {
                shard: self.shard.clone(),
                message: "current transaction is aborted, commands ignored until end of transaction block".into(),
            });
        }
        Ok(())
    }

    /// Marks the transaction failed when `result` is an error.
    fn track<T>(&mut self, result: Result<T, ShardError>) -> Result<T, ShardError> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

#[async_trait]
impl ShardConnection for MemoryConnection {
    fn shard_id(&self) -> &ShardId {
        &self.shard
    }

    async fn has_table(&mut self, table: &str) -> Result<bool, ShardError> {
        self.ensure_usable()?;
        let committed = lock_state(&self.state).tables.contains_key(table);
        Ok(committed || self.writes.iter().any(|w| w.table() == table))
    }

    async fn fetch(&mut self, stmt: &Statement) -> Result<Vec<Row>, ShardError> {
        self.ensure_usable()?;
        let Statement::Select(select) = stmt else {
            return Err(ShardError::Entity(format!("fetch expects a select, got: {}", stmt)));
        };
        let result = {
            let mut state = lock_state(&self.state);
            state.log.push(stmt.to_string());
            self.view(&state.tables)
                .and_then(|tables| run_select(&self.shard, tables.get(&select.table), select))
        };
        self.track(result)
    }

    async fn execute(&mut self, stmt: &Statement) -> Result<u64, ShardError> {
        self.ensure_usable()?;
        if !stmt.is_write() {
            return Err(ShardError::Entity(format!("execute expects a write, got: {}", stmt)));
        }
        let result = {
            let mut state = lock_state(&self.state);
            state.log.push(stmt.to_string());
            self.view(&state.tables)
                .and_then(|mut tables| apply_write(&self.shard, &mut tables, stmt))
        };
        let affected = self.track(result)?;
        self.writes.push(stmt.clone());
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<(), ShardError> {
        let mut state = lock_state(&self.state);
        if self.failed {
            state.log.push("ROLLBACK".into());
            return Err(ShardError::Transaction {
                shard: self.shard.clone(),
                message: "transaction aborted by an earlier error, rolled back".into(),
            });
        }
        if state.fail_next_commit {
            state.fail_next_commit = false;
            state.log.push("ROLLBACK".into());
            return Err(ShardError::Transaction {
                shard: self.shard.clone(),
                message: "commit failed".into(),
            });
        }
        // Replay against current committed state: a concurrent commit may have taken a unique key.
        match self.view(&state.tables) {
            Ok(tables) => {
                state.tables = tables;
                state.log.push("COMMIT".into());
                Ok(())
            }
            Err(e) => {
                state.log.push("ROLLBACK".into());
                Err(e)
            }
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), ShardError> {
        lock_state(&self.state).log.push("ROLLBACK".into());
        Ok(())
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn undefined_table(shard: &ShardId, table: &str) -> ShardError {
    ShardError::UndefinedTable {
        shard: shard.clone(),
        table: table.to_string(),
    }
}

fn run_select(shard: &ShardId, table: Option<&MemTable>, select: &Select) -> Result<Vec<Row>, ShardError> {
    let table = table.ok_or_else(|| undefined_table(shard, &select.table))?;
    let mut rows: Vec<Row> = table.rows.iter().filter(|r| r.matches(&select.filters)).cloned().collect();
    if select.count_only {
        return Ok(vec![Row::new().with("count", rows.len() as i64)]);
    }
    if !select.order_by.is_empty() {
        rows.sort_by(|a, b| {
            select
                .order_by
                .iter()
                .map(|c| cmp_values(a.get(c).unwrap_or(&Value::Null), b.get(c).unwrap_or(&Value::Null)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
    let offset = select.offset.unwrap_or(0) as usize;
    let limit = select.limit.map(|n| n as usize).unwrap_or(usize::MAX);
    Ok(rows.into_iter().skip(offset).take(limit).collect())
}

/// Unique-key values of a row; `None` when any part is null or missing (nulls never collide).
fn key_of(row: &Row, cols: &[String]) -> Option<Vec<Value>> {
    cols.iter()
        .map(|c| row.get(c).filter(|v| !v.is_null()).cloned())
        .collect()
}

fn check_unique(shard: &ShardId, table_name: &str, table: &MemTable) -> Result<(), ShardError> {
    for cols in &table.unique {
        let mut seen: Vec<Vec<Value>> = Vec::new();
        for row in &table.rows {
            if let Some(key) = key_of(row, cols) {
                if seen.contains(&key) {
                    return Err(ShardError::ConstraintViolation {
                        shard: shard.clone(),
                        message: format!("duplicate key ({}) in {}", cols.join(", "), table_name),
                    });
                }
                seen.push(key);
            }
        }
    }
    Ok(())
}

/// Inserts create a missing table; updates and deletes require it.
fn apply_write(shard: &ShardId, tables: &mut HashMap<String, MemTable>, stmt: &Statement) -> Result<u64, ShardError> {
    let table_name = stmt.table().to_string();
    let table = match stmt {
        Statement::Insert { .. } => tables.entry(table_name.clone()).or_default(),
        _ => tables
            .get_mut(&table_name)
            .ok_or_else(|| undefined_table(shard, &table_name))?,
    };
    let affected = match stmt {
        Statement::Select(_) => return Err(ShardError::Entity(format!("execute expects a write, got: {}", stmt))),
        Statement::Insert { rows, .. } => {
            table.rows.extend(rows.iter().cloned());
            rows.len() as u64
        }
        Statement::Update { key, set, .. } => {
            let mut n = 0;
            for row in table.rows.iter_mut().filter(|r| r.matches(key)) {
                for (k, v) in set {
                    row.set(k.clone(), v.clone());
                }
                n += 1;
            }
            n
        }
        Statement::Delete { key, .. } => {
            let before = table.rows.len();
            table.rows.retain(|r| !r.matches(key));
            (before - table.rows.len()) as u64
        }
    };
    check_unique(shard, &table_name, table)?;
    Ok(affected)
}

/// Hands out one [`MemoryEngine`] per shard and keeps it, so tests can inspect the
/// same engine the registry routes to, across registry resets.
#[derive(Default)]
pub struct MemoryEngineFactory {
    engines: Mutex<HashMap<ShardId, Arc<MemoryEngine>>>,
}

impl MemoryEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine for `shard`, created if needed.
    pub fn engine(&self, shard: impl Into<ShardId>) -> Arc<MemoryEngine> {
        let shard = shard.into();
        let mut engines = match self.engines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        engines
            .entry(shard.clone())
            .or_insert_with(|| Arc::new(MemoryEngine::new(shard)))
            .clone()
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn build(&self, db: &DatabaseConfig, _options: &ConnectOptions) -> Result<Arc<dyn ShardEngine>, ConfigError> {
        if !db.url.starts_with(MEMORY_URL_PREFIX) {
            return Err(ConfigError::InvalidDatabaseUrl {
                shard: db.id.clone(),
                message: format!("expected {}<name>, got '{}'", MEMORY_URL_PREFIX, db.url),
            });
        }
        let engine: Arc<dyn ShardEngine> = self.engine(db.id.clone());
        Ok(engine)
    }
}
