//! Key/value cache the application may wrap query results with. The routing layer never
//! caches on its own; implementations live outside this crate.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::entity::EntityMeta;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: Value, ttl: Duration);

    async fn delete(&self, key: &str);
}

/// `<shard>:<table>:<pk1>:<pk2>...`
pub fn entity_cache_key(entity: &EntityMeta, identity: &[Value]) -> String {
    let mut key = format!("{}:{}", entity.static_shard(), entity.table);
    for v in identity {
        key.push(':');
        match v {
            Value::String(s) => key.push_str(s),
            other => key.push_str(&other.to_string()),
        }
    }
    key
}
