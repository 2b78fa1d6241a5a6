//! Physical engines: one per shard, each owning its own connection pool.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{ConnectOptions, DatabaseConfig};
use crate::entity::ShardId;
use crate::error::{ConfigError, ShardError};
use crate::row::Row;
use crate::sql::Statement;

pub mod memory;
pub mod postgres;
mod registry;

pub use memory::{MemoryEngine, MemoryEngineFactory};
pub use postgres::{PgEngine, PgEngineFactory};
pub use registry::EngineRegistry;

/// A shard's database. Shared process-wide; must support concurrent `begin`.
#[async_trait]
pub trait ShardEngine: Send + Sync {
    fn shard_id(&self) -> &ShardId;

    /// Acquire a connection and open a transaction on it.
    async fn begin(&self) -> Result<Box<dyn ShardConnection>, ShardError>;
}

/// One open transaction on one shard. Statements run in call order.
#[async_trait]
pub trait ShardConnection: Send {
    fn shard_id(&self) -> &ShardId;

    /// Whether `table` exists on this shard. Must not abort the transaction when it doesn't.
    async fn has_table(&mut self, table: &str) -> Result<bool, ShardError>;

    async fn fetch(&mut self, stmt: &Statement) -> Result<Vec<Row>, ShardError>;

    /// Run a write; returns affected row count.
    async fn execute(&mut self, stmt: &Statement) -> Result<u64, ShardError>;

    async fn commit(self: Box<Self>) -> Result<(), ShardError>;

    async fn rollback(self: Box<Self>) -> Result<(), ShardError>;
}

/// Builds an engine from a shard's database config. Called lazily, once per shard.
pub trait EngineFactory: Send + Sync {
    fn build(&self, db: &DatabaseConfig, options: &ConnectOptions) -> Result<Arc<dyn ShardEngine>, ConfigError>;
}
