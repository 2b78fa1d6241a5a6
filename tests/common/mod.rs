#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use vertical_shard::{
    DatabaseConfig, IdLookup, MemoryEngineFactory, Row, RoutingContext, ShardConfig, ShardError, ShardId,
    ShardedEntity,
};

/// Lives on shard `a`, unique by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl ShardedEntity for Tag {
    const NAME: &'static str = "Tag";

    fn shard_id() -> Option<ShardId> {
        Some("a".into())
    }

    fn to_ordered_map(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("name", self.name.clone())
            .with("color", self.color.clone())
    }

    fn from_row(row: Row) -> Result<Self, ShardError> {
        row.into_struct()
    }
}

/// No declared shard, so `default`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub total: i64,
}

impl ShardedEntity for Order {
    const NAME: &'static str = "Order";

    fn to_ordered_map(&self) -> Row {
        Row::new().with("id", self.id).with("total", self.total)
    }

    fn from_row(row: Row) -> Result<Self, ShardError> {
        row.into_struct()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ShardedEntity for Report {
    const NAME: &'static str = "Report";

    fn table() -> String {
        "reports".into()
    }

    fn shard_id() -> Option<ShardId> {
        Some("reporting".into())
    }

    fn time_columns() -> &'static [&'static str] {
        &["created_at"]
    }

    fn to_ordered_map(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("title", self.title.clone())
            .with("created_at", self.created_at.clone())
    }

    fn from_row(row: Row) -> Result<Self, ShardError> {
        row.into_struct()
    }
}

pub fn config(id_lookup: IdLookup) -> ShardConfig {
    ShardConfig {
        databases: ["default", "a", "b", "reporting"]
            .iter()
            .map(|id| DatabaseConfig {
                id: (*id).into(),
                url: format!("memory://{}", id),
            })
            .collect(),
        id_lookup,
        ..Default::default()
    }
}

pub fn context_with(id_lookup: IdLookup) -> (Arc<RoutingContext>, Arc<MemoryEngineFactory>) {
    let factory = Arc::new(MemoryEngineFactory::new());
    factory.engine("a").create_table("tags_tbl", &[&["id"], &["name"]]);
    let ctx = RoutingContext::from_config(&config(id_lookup), factory.clone()).expect("valid config");
    (Arc::new(ctx), factory)
}

pub fn context() -> (Arc<RoutingContext>, Arc<MemoryEngineFactory>) {
    context_with(IdLookup::Static)
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("vertical_shard=debug"))
        .with_test_writer()
        .try_init();
}
