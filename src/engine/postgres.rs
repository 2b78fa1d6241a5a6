//! PostgreSQL engine over a lazily-connecting sqlx pool.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConnectOptions, DatabaseConfig};
use crate::engine::{EngineFactory, ShardConnection, ShardEngine};
use crate::entity::ShardId;
use crate::error::{ConfigError, ShardError};
use crate::row::{self, Row};
use crate::sql::{qualified_table, render, PgBindValue, Statement};

pub struct PgEngineFactory;

impl EngineFactory for PgEngineFactory {
    fn build(&self, db: &DatabaseConfig, options: &ConnectOptions) -> Result<Arc<dyn ShardEngine>, ConfigError> {
        // sqlx speaks UTF-8 only.
        let charset = options.charset.to_ascii_uppercase();
        if charset != "UTF8" && charset != "UTF-8" {
            return Err(ConfigError::Validation(format!(
                "shard '{}': unsupported charset {}",
                db.id, options.charset
            )));
        }
        let mut connect = PgConnectOptions::from_str(&db.url).map_err(|e| ConfigError::InvalidDatabaseUrl {
            shard: db.id.clone(),
            message: e.to_string(),
        })?;
        if let Some(name) = &options.application_name {
            connect = connect.application_name(name);
        }
        let mut pool = PgPoolOptions::new()
            .max_connections(options.pool_size)
            .acquire_timeout(Duration::from_secs(options.acquire_timeout_secs));
        if let Some(idle) = options.idle_timeout_secs {
            pool = pool.idle_timeout(Duration::from_secs(idle));
        }
        Ok(Arc::new(PgEngine {
            shard: db.id.clone(),
            pool: pool.connect_lazy_with(connect),
        }))
    }
}

pub struct PgEngine {
    shard: ShardId,
    pool: PgPool,
}

#[async_trait]
impl ShardEngine for PgEngine {
    fn shard_id(&self) -> &ShardId {
        &self.shard
    }

    async fn begin(&self) -> Result<Box<dyn ShardConnection>, ShardError> {
        let tx = self.pool.begin().await.map_err(|e| map_db_error(&self.shard, e))?;
        Ok(Box::new(PgShardConnection {
            shard: self.shard.clone(),
            tx,
        }))
    }
}

struct PgShardConnection {
    shard: ShardId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ShardConnection for PgShardConnection {
    fn shard_id(&self) -> &ShardId {
        &self.shard
    }

    async fn has_table(&mut self, table: &str) -> Result<bool, ShardError> {
        // to_regclass yields NULL for a missing relation instead of raising 42P01.
        let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(qualified_table(table))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_db_error(&self.shard, e))?;
        Ok(found.is_some())
    }

    async fn fetch(&mut self, stmt: &Statement) -> Result<Vec<Row>, ShardError> {
        let q = render(stmt);
        tracing::debug!(shard = %self.shard, sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_statement_error(&self.shard, stmt, e))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&mut self, stmt: &Statement) -> Result<u64, ShardError> {
        if let Statement::Update { set, .. } = stmt {
            if set.is_empty() {
                return Ok(0);
            }
        }
        let q = render(stmt);
        tracing::debug!(shard = %self.shard, sql = %q.sql, params = ?q.params, "execute (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let result = query
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_statement_error(&self.shard, stmt, e))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), ShardError> {
        let shard = self.shard.clone();
        self.tx.commit().await.map_err(|e| match map_db_error(&shard, e) {
            violation @ ShardError::ConstraintViolation { .. } => violation,
            other => ShardError::Transaction {
                shard,
                message: other.to_string(),
            },
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), ShardError> {
        let shard = self.shard.clone();
        self.tx.rollback().await.map_err(|e| ShardError::Transaction {
            shard,
            message: e.to_string(),
        })
    }
}

const UNDEFINED_TABLE: &str = "42P01";

fn map_statement_error(shard: &ShardId, stmt: &Statement, e: sqlx::Error) -> ShardError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNDEFINED_TABLE) {
            return ShardError::UndefinedTable {
                shard: shard.clone(),
                table: stmt.table().to_string(),
            };
        }
    }
    map_db_error(shard, e)
}

/// Unique and foreign-key violations become `ConstraintViolation`; everything else stays a db error.
fn map_db_error(shard: &ShardId, e: sqlx::Error) -> ShardError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() || db.is_foreign_key_violation() {
            return ShardError::ConstraintViolation {
                shard: shard.clone(),
                message: db.message().to_string(),
            };
        }
    }
    ShardError::Db(e)
}

fn pg_row_to_row(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), cell_to_value(row, col.name())))
        .collect()
}

/// Try the column's Rust types in turn. `numeric` only comes back when selected as `::text`; see `row::decimal_value`.
fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return row::datetime_value(&d);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return row::naive_datetime_value(&d);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}
