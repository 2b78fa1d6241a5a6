//! Typed errors for routing, configuration and engine I/O.

use crate::entity::ShardId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown shard: '{0}'")]
    UnknownShard(ShardId),
    #[error("invalid database url for shard '{shard}': {message}")]
    InvalidDatabaseUrl { shard: ShardId, message: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum ShardError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Entity types referenced together resolve to different shards.
    #[error("all entities in a query must live on the same shard, got {shards:?}")]
    ShardConflict { shards: Vec<ShardId> },
    #[error("transaction failed on shard '{shard}': {message}")]
    Transaction { shard: ShardId, message: String },
    #[error("constraint violation on shard '{shard}': {message}")]
    ConstraintViolation { shard: ShardId, message: String },
    /// The statement's table does not exist on this shard.
    #[error("table '{table}' does not exist on shard '{shard}'")]
    UndefinedTable { shard: ShardId, table: String },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("entity: {0}")]
    Entity(String),
    #[error("session is closed")]
    SessionClosed,
}

impl ShardError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, ShardError::ConstraintViolation { .. })
    }

    /// Shard the failure happened on, when the error carries one.
    pub fn shard(&self) -> Option<&ShardId> {
        match self {
            ShardError::Transaction { shard, .. }
            | ShardError::ConstraintViolation { shard, .. }
            | ShardError::UndefinedTable { shard, .. } => Some(shard),
            ShardError::Config(ConfigError::UnknownShard(shard))
            | ShardError::Config(ConfigError::InvalidDatabaseUrl { shard, .. }) => Some(shard),
            _ => None,
        }
    }
}
