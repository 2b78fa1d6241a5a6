//! Vertical shard routing: each entity type lives entirely on one named database, and
//! sessions, queries and model helpers route every statement to that database.

pub mod cache;
pub mod case;
pub mod config;
pub mod context;
pub mod engine;
pub mod entity;
pub mod error;
pub mod policy;
pub mod query;
pub mod row;
pub mod service;
pub mod session;
pub mod sql;

pub use cache::{entity_cache_key, Cache};
pub use config::{load_from_env, load_from_json, validate, ConnectOptions, DatabaseConfig, IdLookup, ShardConfig};
pub use context::RoutingContext;
pub use engine::{EngineFactory, EngineRegistry, MemoryEngine, MemoryEngineFactory, PgEngineFactory, ShardConnection, ShardEngine};
pub use entity::{EntityMeta, ShardId, ShardedEntity, DEFAULT_SHARD};
pub use error::{ConfigError, ShardError};
pub use policy::{ScanAllShardPolicy, ShardPolicy, StaticShardPolicy};
pub use query::ShardQuery;
pub use row::Row;
pub use service::ModelBase;
pub use session::{unit_of_work, ScopeKey, ScopedSessions, ShardSession, SharedSession, WorkFuture};
