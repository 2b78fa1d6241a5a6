//! Config validation: shard ids, urls and pool options.

use crate::config::ShardConfig;
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;

fn shard_id_pattern() -> Result<Regex, ConfigError> {
    Regex::new(r"^[A-Za-z0-9_\-]+$").map_err(|e| ConfigError::Validation(e.to_string()))
}

pub fn validate(config: &ShardConfig) -> Result<(), ConfigError> {
    if config.databases.is_empty() {
        return Err(ConfigError::Validation("at least one shard database required".into()));
    }
    let pattern = shard_id_pattern()?;
    let mut seen = HashSet::new();
    for db in &config.databases {
        if !pattern.is_match(db.id.as_str()) {
            return Err(ConfigError::Validation(format!("invalid shard id: '{}'", db.id)));
        }
        if !seen.insert(db.id.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate shard id: '{}'", db.id)));
        }
        if db.url.trim().is_empty() {
            return Err(ConfigError::InvalidDatabaseUrl {
                shard: db.id.clone(),
                message: "empty url".into(),
            });
        }
    }
    if config.options.pool_size == 0 {
        return Err(ConfigError::Validation("pool_size must be greater than 0".into()));
    }
    Ok(())
}
