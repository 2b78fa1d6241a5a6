//! Routing context: the engine registry and shard policy, built once and shared by every session.

use std::sync::Arc;

use crate::config::{validate, IdLookup, ShardConfig};
use crate::engine::{EngineFactory, EngineRegistry, PgEngineFactory};
use crate::error::ConfigError;
use crate::policy::{ScanAllShardPolicy, ShardPolicy, StaticShardPolicy};
use crate::session::ShardSession;

pub struct RoutingContext {
    registry: EngineRegistry,
    policy: Arc<dyn ShardPolicy>,
}

impl RoutingContext {
    pub fn new(registry: EngineRegistry, policy: Arc<dyn ShardPolicy>) -> Self {
        RoutingContext { registry, policy }
    }

    /// Validate `config` and pick the policy its `id_lookup` names. Engines are not built yet.
    pub fn from_config(config: &ShardConfig, factory: Arc<dyn EngineFactory>) -> Result<Self, ConfigError> {
        validate(config)?;
        let policy: Arc<dyn ShardPolicy> = match config.id_lookup {
            IdLookup::Static => Arc::new(StaticShardPolicy),
            IdLookup::ScanAll => Arc::new(ScanAllShardPolicy::new(config.shard_ids())),
        };
        tracing::info!(shards = ?config.shard_ids(), id_lookup = ?config.id_lookup, "routing context configured");
        Ok(RoutingContext::new(EngineRegistry::new(config, factory), policy))
    }

    /// Context over PostgreSQL shards.
    pub fn postgres(config: &ShardConfig) -> Result<Self, ConfigError> {
        Self::from_config(config, Arc::new(PgEngineFactory))
    }

    /// Replace the policy, keeping the registry.
    pub fn with_policy(self, policy: Arc<dyn ShardPolicy>) -> Self {
        RoutingContext {
            registry: self.registry,
            policy,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &dyn ShardPolicy {
        self.policy.as_ref()
    }

    /// A new session for one unit of work.
    pub fn session(self: &Arc<Self>) -> ShardSession {
        ShardSession::new(self.clone())
    }
}
