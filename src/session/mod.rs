//! Shard-aware session: one unit of work, one transaction per shard it touches.
//!
//! Transactions on different shards are independent. `commit` commits them one after
//! another; a failure part way rolls back the ones not yet committed, but shards that
//! already committed stay committed. There is no cross-shard atomicity.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::RoutingContext;
use crate::engine::ShardConnection;
use crate::entity::{EntityMeta, ShardId, ShardedEntity};
use crate::error::ShardError;
use crate::policy::ShardPolicy;
use crate::query::ShardQuery;
use crate::row::Row;
use crate::sql::Statement;

mod scoped;

pub use scoped::{ScopeKey, ScopedSessions, SharedSession};

/// A write queued by `add`/`update`/`delete`, executed on `flush`.
#[derive(Clone, Debug)]
enum PendingWrite {
    Insert { entity: EntityMeta, row: Row },
    Update { entity: EntityMeta, instance: Row, set: Row },
    Delete { entity: EntityMeta, instance: Row },
}

impl PendingWrite {
    fn entity(&self) -> &EntityMeta {
        match self {
            PendingWrite::Insert { entity, .. } | PendingWrite::Update { entity, .. } | PendingWrite::Delete { entity, .. } => {
                entity
            }
        }
    }

    fn instance(&self) -> &Row {
        match self {
            PendingWrite::Insert { row, .. } => row,
            PendingWrite::Update { instance, .. } | PendingWrite::Delete { instance, .. } => instance,
        }
    }

    fn statement(&self) -> Result<Statement, ShardError> {
        Ok(match self {
            PendingWrite::Insert { entity, row } => Statement::Insert {
                table: entity.table.clone(),
                rows: vec![row.clone()],
            },
            PendingWrite::Update { entity, instance, set } => Statement::Update {
                table: entity.table.clone(),
                key: entity.identity_filters(&entity.identity_of(instance)?)?,
                set: set.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            },
            PendingWrite::Delete { entity, instance } => Statement::Delete {
                table: entity.table.clone(),
                key: entity.identity_filters(&entity.identity_of(instance)?)?,
            },
        })
    }
}

pub struct ShardSession {
    ctx: Arc<RoutingContext>,
    /// Open transactions in the order they were opened; at most one per shard.
    transactions: Vec<(ShardId, Box<dyn ShardConnection>)>,
    pending: Vec<PendingWrite>,
    closed: bool,
}

impl ShardSession {
    pub fn new(ctx: Arc<RoutingContext>) -> Self {
        ShardSession {
            ctx,
            transactions: Vec::new(),
            pending: Vec::new(),
            closed: false,
        }
    }

    pub fn context(&self) -> &Arc<RoutingContext> {
        &self.ctx
    }

    pub fn policy(&self) -> &dyn ShardPolicy {
        self.ctx.policy()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), ShardError> {
        if self.closed {
            return Err(ShardError::SessionClosed);
        }
        Ok(())
    }

    /// Shards with an open transaction, in the order they were opened.
    pub fn open_shards(&self) -> Vec<ShardId> {
        self.transactions.iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Query over `entities`, validated against this session's policy.
    pub fn query(&self, entities: Vec<EntityMeta>) -> Result<ShardQuery, ShardError> {
        ShardQuery::new(self.policy(), entities)
    }

    pub fn query_for<E: ShardedEntity>(&self) -> Result<ShardQuery, ShardError> {
        self.query(vec![E::meta()])
    }

    /// Transaction for the explicit shard, or the one `shard_chooser` picks. Reuses the open
    /// transaction on that shard; otherwise opens a new, independent one.
    pub async fn connection(
        &mut self,
        entity: Option<&EntityMeta>,
        instance: Option<&Row>,
        shard: Option<&ShardId>,
    ) -> Result<&mut (dyn ShardConnection + 'static), ShardError> {
        self.ensure_open()?;
        let shard = match shard {
            Some(s) => s.clone(),
            None => self.policy().shard_chooser(entity, instance, None),
        };
        let existing = self.transactions.iter().position(|(s, _)| *s == shard);
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let engine = self.ctx.registry().get_engine(&shard)?;
                let conn = engine.begin().await?;
                tracing::debug!(shard = %shard, "transaction opened");
                self.transactions.push((shard, conn));
                self.transactions.len() - 1
            }
        };
        Ok(self.transactions[idx].1.as_mut())
    }

    /// Run a select on `shard`. A failed statement rolls back the whole session, so the
    /// next call starts on fresh transactions.
    pub async fn fetch(
        &mut self,
        shard: &ShardId,
        entity: Option<&EntityMeta>,
        stmt: &Statement,
    ) -> Result<Vec<Row>, ShardError> {
        tracing::debug!(shard = %shard, statement = %stmt, "fetch");
        let result = self.connection(entity, None, Some(shard)).await?.fetch(stmt).await;
        self.rollback_on_error(result).await
    }

    /// Like `fetch`, but `Ok(None)` when the statement's table does not exist on `shard`.
    pub async fn fetch_if_table(
        &mut self,
        shard: &ShardId,
        entity: Option<&EntityMeta>,
        stmt: &Statement,
    ) -> Result<Option<Vec<Row>>, ShardError> {
        let conn = self.connection(entity, None, Some(shard)).await?;
        let exists = conn.has_table(stmt.table()).await;
        match self.rollback_on_error(exists).await? {
            true => self.fetch(shard, entity, stmt).await.map(Some),
            false => {
                tracing::debug!(shard = %shard, table = %stmt.table(), "table not on shard");
                Ok(None)
            }
        }
    }

    /// Run a write on `shard`; returns affected row count. Failure rolls back as `fetch` does.
    pub async fn execute(
        &mut self,
        shard: &ShardId,
        entity: Option<&EntityMeta>,
        stmt: &Statement,
    ) -> Result<u64, ShardError> {
        tracing::debug!(shard = %shard, statement = %stmt, "execute");
        let result = self.connection(entity, None, Some(shard)).await?.execute(stmt).await;
        self.rollback_on_error(result).await
    }

    /// A statement error leaves its transaction aborted; drop all of them and keep the error.
    async fn rollback_on_error<T>(&mut self, result: Result<T, ShardError>) -> Result<T, ShardError> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, shards = ?self.open_shards(), "statement failed, rolling back session");
            if let Err(rb) = self.rollback().await {
                tracing::warn!(error = %rb, "rollback after failed statement");
            }
        }
        result
    }

    /// Queue an insert of `instance`.
    pub fn add<E: ShardedEntity>(&mut self, instance: &E) {
        self.add_row(E::meta(), instance.to_ordered_map());
    }

    pub fn add_row(&mut self, entity: EntityMeta, row: Row) {
        self.pending.push(PendingWrite::Insert { entity, row });
    }

    /// Queue an update of `changes` on the row `instance` identifies. Empty changes queue nothing.
    pub fn update<E: ShardedEntity>(&mut self, instance: &E, changes: Row) {
        if changes.is_empty() {
            return;
        }
        self.pending.push(PendingWrite::Update {
            entity: E::meta(),
            instance: instance.to_ordered_map(),
            set: changes,
        });
    }

    pub fn delete<E: ShardedEntity>(&mut self, instance: &E) {
        self.pending.push(PendingWrite::Delete {
            entity: E::meta(),
            instance: instance.to_ordered_map(),
        });
    }

    /// Execute queued writes in order, each on the shard `shard_chooser` picks for it.
    /// On failure the whole session is rolled back and the original error returned.
    pub async fn flush(&mut self) -> Result<(), ShardError> {
        self.ensure_open()?;
        let pending = std::mem::take(&mut self.pending);
        for write in &pending {
            if let Err(e) = self.flush_one(write).await {
                tracing::warn!(error = %e, entity = %write.entity().name, "flush failed, rolling back session");
                if let Err(rb) = self.rollback().await {
                    tracing::warn!(error = %rb, "rollback after failed flush");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn flush_one(&mut self, write: &PendingWrite) -> Result<u64, ShardError> {
        let stmt = write.statement()?;
        let shard = self
            .policy()
            .shard_chooser(Some(write.entity()), Some(write.instance()), Some(&stmt));
        self.execute(&shard, Some(write.entity()), &stmt).await
    }

    /// Flush, then commit every transaction opened in this unit of work.
    ///
    /// Flush failure: everything is rolled back and the flush error returned. Commit failure
    /// on a shard: transactions not yet committed are rolled back; constraint violations are
    /// returned as such, anything else as `Transaction`.
    pub async fn commit(&mut self) -> Result<(), ShardError> {
        self.flush().await?;
        let mut committed: Vec<ShardId> = Vec::new();
        let mut transactions = std::mem::take(&mut self.transactions).into_iter();
        while let Some((shard, conn)) = transactions.next() {
            if let Err(e) = conn.commit().await {
                tracing::warn!(
                    shard = %shard,
                    error = %e,
                    committed = ?committed,
                    "commit failed, rolling back remaining transactions"
                );
                for (other, conn) in transactions.by_ref() {
                    if let Err(rb) = conn.rollback().await {
                        tracing::warn!(shard = %other, error = %rb, "rollback after failed commit");
                    }
                }
                return Err(match e {
                    violation @ ShardError::ConstraintViolation { .. } => violation,
                    ShardError::Transaction { shard, message } => ShardError::Transaction {
                        shard,
                        message: with_committed(message, &committed),
                    },
                    other => ShardError::Transaction {
                        shard,
                        message: with_committed(other.to_string(), &committed),
                    },
                });
            }
            tracing::debug!(shard = %shard, "committed");
            committed.push(shard);
        }
        Ok(())
    }

    /// Discard queued writes and roll back every open transaction. Returns the first rollback error.
    pub async fn rollback(&mut self) -> Result<(), ShardError> {
        self.pending.clear();
        let mut first_err = None;
        for (shard, conn) in std::mem::take(&mut self.transactions) {
            if let Err(e) = conn.rollback().await {
                tracing::warn!(shard = %shard, error = %e, "rollback failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Roll back anything uncommitted and release connections. Later calls are refused.
    pub async fn close(&mut self) -> Result<(), ShardError> {
        if self.closed {
            return Ok(());
        }
        let result = self.rollback().await;
        self.closed = true;
        result
    }
}

/// Shards that committed before a failure stay committed; name them in the error.
fn with_committed(message: String, committed: &[ShardId]) -> String {
    if committed.is_empty() {
        return message;
    }
    let shards: Vec<&str> = committed.iter().map(ShardId::as_str).collect();
    format!("{} (already committed: {})", message, shards.join(", "))
}

impl Drop for ShardSession {
    fn drop(&mut self) {
        if !self.transactions.is_empty() {
            tracing::warn!(shards = ?self.open_shards(), "session dropped with open transactions");
        }
    }
}

/// Future returned by a [`unit_of_work`] body.
pub type WorkFuture<'s, T> = Pin<Box<dyn Future<Output = Result<T, ShardError>> + Send + 's>>;

/// Run `work` in a fresh session. An error rolls the session back; the session is always
/// closed afterwards, so anything `work` did not commit is discarded.
pub async fn unit_of_work<T, F>(ctx: &Arc<RoutingContext>, work: F) -> Result<T, ShardError>
where
    F: for<'s> FnOnce(&'s mut ShardSession) -> WorkFuture<'s, T>,
{
    let mut session = ShardSession::new(ctx.clone());
    let result = work(&mut session).await;
    if result.is_err() {
        if let Err(e) = session.rollback().await {
            tracing::warn!(error = %e, "rollback after failed unit of work");
        }
    }
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "closing unit of work");
    }
    result
}
