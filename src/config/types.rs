//! Raw config types: shard databases and global connection options.

use crate::entity::ShardId;
use serde::{Deserialize, Serialize};

/// One configured shard: its id and the database URL its engine connects to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub id: ShardId,
    pub url: String,
}

/// Options applied to every engine the registry builds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectOptions {
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Client character set (PostgreSQL `client_encoding`).
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default)]
    pub application_name: Option<String>,
}

fn default_pool_size() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_charset() -> String {
    "UTF8".into()
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            pool_size: default_pool_size(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_timeout_secs: None,
            charset: default_charset(),
            application_name: None,
        }
    }
}

/// How primary-key lookups without a pinned shard pick candidate shards.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdLookup {
    /// Only the shard the entity type statically lives on.
    #[default]
    Static,
    /// Every configured shard, in registration order.
    ScanAll,
}

impl std::str::FromStr for IdLookup {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(IdLookup::Static),
            "scan_all" | "scan-all" => Ok(IdLookup::ScanAll),
            _ => Err(crate::error::ConfigError::Validation(format!(
                "invalid id lookup: {} (expected static or scan_all)",
                s
            ))),
        }
    }
}

/// Full routing configuration. Database order is the shard registration order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardConfig {
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub options: ConnectOptions,
    #[serde(default)]
    pub id_lookup: IdLookup,
}

impl ShardConfig {
    pub fn database(&self, shard: &ShardId) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|d| &d.id == shard)
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.databases.iter().map(|d| d.id.clone()).collect()
    }
}
