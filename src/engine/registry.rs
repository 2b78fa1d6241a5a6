//! Engine registry: shard id to engine, built on first use and cached.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::ShardConfig;
use crate::engine::{EngineFactory, ShardEngine};
use crate::entity::ShardId;
use crate::error::ConfigError;

pub struct EngineRegistry {
    /// Database order is preserved; scan-all lookups rely on it.
    config: ShardConfig,
    factory: Arc<dyn EngineFactory>,
    engines: RwLock<HashMap<ShardId, Arc<dyn ShardEngine>>>,
}

impl EngineRegistry {
    pub fn new(config: &ShardConfig, factory: Arc<dyn EngineFactory>) -> Self {
        EngineRegistry {
            config: config.clone(),
            factory,
            engines: RwLock::new(HashMap::new()),
        }
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.config.shard_ids()
    }

    pub fn contains(&self, shard: &ShardId) -> bool {
        self.config.database(shard).is_some()
    }

    /// Engine for `shard`, building it on first request. Unknown shards and bad URLs
    /// fail here, not when the registry is created.
    pub fn get_engine(&self, shard: &ShardId) -> Result<Arc<dyn ShardEngine>, ConfigError> {
        {
            let engines = self
                .engines
                .read()
                .map_err(|_| ConfigError::Load("engine registry lock poisoned".into()))?;
            if let Some(engine) = engines.get(shard) {
                return Ok(engine.clone());
            }
        }

        let db = self
            .config
            .database(shard)
            .ok_or_else(|| ConfigError::UnknownShard(shard.clone()))?;

        let mut engines = self
            .engines
            .write()
            .map_err(|_| ConfigError::Load("engine registry lock poisoned".into()))?;
        // Another caller may have built it while we waited for the write lock.
        if let Some(engine) = engines.get(shard) {
            return Ok(engine.clone());
        }
        let engine = self.factory.build(db, &self.config.options)?;
        tracing::info!(shard = %shard, "engine built");
        engines.insert(shard.clone(), engine.clone());
        Ok(engine)
    }

    /// Number of engines built so far.
    pub fn built(&self) -> usize {
        self.engines.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Drop every cached engine; the next `get_engine` rebuilds from config.
    pub fn reset(&self) {
        match self.engines.write() {
            Ok(mut engines) => engines.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        tracing::info!("engine registry reset");
    }
}
