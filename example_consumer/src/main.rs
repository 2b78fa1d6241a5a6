//! Example consumer: a separate Rust project that uses vertical-shard as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Needs `SHARD_DATABASES="default=postgres://...;tags=postgres://..."` (or `DATABASE_URL`)
//! and a `labels_tbl (id bigint primary key, name text unique)` table on the `tags` shard.

use serde_json::{json, Value};
use std::sync::Arc;
use vertical_shard::{load_from_env, ModelBase, Row, RoutingContext, ShardError, ShardId, ShardedEntity};

struct Label {
    id: i64,
    name: String,
}

impl ShardedEntity for Label {
    const NAME: &'static str = "Label";

    fn shard_id() -> Option<ShardId> {
        Some("tags".into())
    }

    fn to_ordered_map(&self) -> Row {
        Row::new().with("id", self.id).with("name", self.name.clone())
    }

    fn from_row(row: Row) -> Result<Self, ShardError> {
        let id = row.get("id").and_then(Value::as_i64);
        let name = row.get("name").and_then(Value::as_str);
        match (id, name) {
            (Some(id), Some(name)) => Ok(Label { id, name: name.to_string() }),
            _ => Err(ShardError::Entity(format!("not a label row: {}", row.to_json()))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vertical_shard=info")),
        )
        .init();

    let config = load_from_env()?;
    let ctx = Arc::new(RoutingContext::postgres(&config)?);

    let mut session = ctx.session();
    let filters = Row::new().with("name", "rust");
    let defaults = Row::new().with("id", json!(1));
    let (label, created) = ModelBase::create_or_get::<Label>(&mut session, &filters, &defaults).await?;
    tracing::info!(id = label.id, name = %label.name, created, "label ready");

    let count = ModelBase::query::<Label>(&session)?.count(&mut session).await?;
    tracing::info!(count, shard = %Label::meta().static_shard(), "labels on shard");
    session.close().await?;
    Ok(())
}
