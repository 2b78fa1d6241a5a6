//! Shard policies: which shard an entity, an identity lookup or an open query goes to.
//!
//! Policies are pure and deterministic; they never do I/O.

use serde_json::Value;

use crate::entity::{EntityMeta, ShardId};
use crate::query::ShardQuery;
use crate::row::Row;
use crate::sql::Statement;

pub trait ShardPolicy: Send + Sync {
    /// Shard for an entity type, optionally given the instance being written and the
    /// statement. The default ignores both and returns the type's static shard.
    fn shard_chooser(&self, entity: Option<&EntityMeta>, instance: Option<&Row>, clause: Option<&Statement>) -> ShardId {
        let _ = (instance, clause);
        entity.map(EntityMeta::static_shard).unwrap_or_default()
    }

    /// Candidate shards for a primary-key lookup on an unpinned query, tried in order.
    fn id_chooser(&self, query: &ShardQuery, identity: &[Value]) -> Vec<ShardId>;

    /// Shard for an unpinned query; `"default"` when the query references no entity type.
    fn query_chooser(&self, query: &ShardQuery) -> ShardId {
        self.shard_chooser(query.primary_entity(), None, None)
    }
}

/// Every entity type lives on its one static shard; identity lookups go there only.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticShardPolicy;

impl ShardPolicy for StaticShardPolicy {
    fn id_chooser(&self, query: &ShardQuery, _identity: &[Value]) -> Vec<ShardId> {
        vec![self.query_chooser(query)]
    }
}

/// Identity lookups try every configured shard in registration order.
#[derive(Clone, Debug)]
pub struct ScanAllShardPolicy {
    shards: Vec<ShardId>,
}

impl ScanAllShardPolicy {
    pub fn new(shards: Vec<ShardId>) -> Self {
        ScanAllShardPolicy { shards }
    }
}

impl ShardPolicy for ScanAllShardPolicy {
    fn id_chooser(&self, _query: &ShardQuery, _identity: &[Value]) -> Vec<ShardId> {
        self.shards.clone()
    }
}
