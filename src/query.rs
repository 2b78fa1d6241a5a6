//! Shard-aware query: pinned to exactly one shard, explicitly or by policy at execution time.

use serde_json::Value;

use crate::entity::{EntityMeta, ShardId, ShardedEntity};
use crate::error::ShardError;
use crate::policy::ShardPolicy;
use crate::row::Row;
use crate::session::ShardSession;
use crate::sql::{Select, Statement};

#[derive(Clone, Debug, PartialEq)]
pub struct ShardQuery {
    entities: Vec<EntityMeta>,
    shard: Option<ShardId>,
    filters: Vec<(String, Value)>,
    order_by: Vec<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl ShardQuery {
    /// Fails with `ShardConflict` unless every entity type resolves to the same shard.
    pub fn new(policy: &dyn ShardPolicy, entities: Vec<EntityMeta>) -> Result<Self, ShardError> {
        let shards: Vec<ShardId> = entities
            .iter()
            .map(|e| policy.shard_chooser(Some(e), None, None))
            .collect();
        if let Some(first) = shards.first() {
            if shards.iter().any(|s| s != first) {
                return Err(ShardError::ShardConflict { shards });
            }
        }
        Ok(ShardQuery {
            entities,
            shard: None,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        })
    }

    pub fn entities(&self) -> &[EntityMeta] {
        &self.entities
    }

    /// The entity type rows are selected from.
    pub fn primary_entity(&self) -> Option<&EntityMeta> {
        self.entities.first()
    }

    /// Pinned shard, if any.
    pub fn shard(&self) -> Option<&ShardId> {
        self.shard.as_ref()
    }

    /// A copy pinned to `shard`; every later operation on the copy runs there. `self` is untouched.
    pub fn set_shard(&self, shard: impl Into<ShardId>) -> Self {
        let mut q = self.clone();
        q.shard = Some(shard.into());
        q
    }

    pub fn filter_by(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Add every column of `row` as an exact-match filter.
    pub fn filter_by_row(mut self, row: &Row) -> Self {
        self.filters
            .extend(row.iter().map(|(k, v)| (k.to_string(), v.clone())));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u32) -> Self {
        self.offset = Some(n);
        self
    }

    /// Pinned shard, else whatever the policy's `query_chooser` says.
    pub fn target_shard(&self, policy: &dyn ShardPolicy) -> ShardId {
        match &self.shard {
            Some(shard) => shard.clone(),
            None => policy.query_chooser(self),
        }
    }

    fn entity(&self) -> Result<&EntityMeta, ShardError> {
        self.primary_entity()
            .ok_or_else(|| ShardError::Entity("query references no entity type".into()))
    }

    pub fn to_select(&self) -> Result<Select, ShardError> {
        Ok(Select {
            table: self.entity()?.table.clone(),
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            count_only: false,
        })
    }

    async fn run(&self, session: &mut ShardSession, select: Select) -> Result<Vec<Row>, ShardError> {
        let shard = self.target_shard(session.policy());
        let entity = self.entity()?.clone();
        session.fetch(&shard, Some(&entity), &Statement::Select(select)).await
    }

    pub async fn all(&self, session: &mut ShardSession) -> Result<Vec<Row>, ShardError> {
        let select = self.to_select()?;
        self.run(session, select).await
    }

    pub async fn first(&self, session: &mut ShardSession) -> Result<Option<Row>, ShardError> {
        let mut select = self.to_select()?;
        select.limit = Some(1);
        Ok(self.run(session, select).await?.into_iter().next())
    }

    pub async fn count(&self, session: &mut ShardSession) -> Result<u64, ShardError> {
        let mut select = self.to_select()?;
        select.count_only = true;
        select.limit = None;
        select.offset = None;
        let rows = self.run(session, select).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    pub async fn fetch_all<E: ShardedEntity>(&self, session: &mut ShardSession) -> Result<Vec<E>, ShardError> {
        self.all(session).await?.into_iter().map(E::from_row).collect()
    }

    pub async fn fetch_first<E: ShardedEntity>(&self, session: &mut ShardSession) -> Result<Option<E>, ShardError> {
        self.first(session).await?.map(E::from_row).transpose()
    }

    /// Primary-key lookup. Pinned: that shard only. Unpinned: each `id_chooser` candidate in
    /// order until one has the row. A shard without the entity's table counts as no row there.
    /// No row anywhere is `Ok(None)`.
    pub async fn get(&self, session: &mut ShardSession, identity: &[Value]) -> Result<Option<Row>, ShardError> {
        if let Some(shard) = &self.shard {
            return self.get_on_shard(session, shard, identity).await;
        }
        let candidates = session.policy().id_chooser(self, identity);
        for shard in &candidates {
            if let Some(row) = self.get_on_shard(session, shard, identity).await? {
                return Ok(Some(row));
            }
        }
        tracing::debug!(candidates = ?candidates, identity = ?identity, "identity not found on any candidate shard");
        Ok(None)
    }

    pub async fn get_entity<E: ShardedEntity>(
        &self,
        session: &mut ShardSession,
        identity: &[Value],
    ) -> Result<Option<E>, ShardError> {
        self.get(session, identity).await?.map(E::from_row).transpose()
    }

    async fn get_on_shard(
        &self,
        session: &mut ShardSession,
        shard: &ShardId,
        identity: &[Value],
    ) -> Result<Option<Row>, ShardError> {
        let entity = self.entity()?.clone();
        let select = Select {
            table: entity.table.clone(),
            filters: entity.identity_filters(identity)?,
            limit: Some(1),
            ..Default::default()
        };
        let rows = session
            .fetch_if_table(shard, Some(&entity), &Statement::Select(select))
            .await?;
        Ok(rows.and_then(|rows| rows.into_iter().next()))
    }
}
