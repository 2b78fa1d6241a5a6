//! Model helpers over the shard-aware session: CRUD, create-or-get, update-or-create, bulk insert.

use serde_json::Value;
use std::time::Duration;

use crate::cache::{entity_cache_key, Cache};
use crate::entity::ShardedEntity;
use crate::error::ShardError;
use crate::query::ShardQuery;
use crate::row::Row;
use crate::session::ShardSession;
use crate::sql::Statement;

pub struct ModelBase;

impl ModelBase {
    /// Query over `E`, pinned to the shard the policy puts `E` on.
    pub fn query<E: ShardedEntity>(session: &ShardSession) -> Result<ShardQuery, ShardError> {
        let meta = E::meta();
        let shard = session.policy().shard_chooser(Some(&meta), None, None);
        Ok(session.query(vec![meta])?.set_shard(shard))
    }

    /// Primary-key lookup through the policy's `id_chooser`. Absent is `Ok(None)`.
    pub async fn get_by_id<E: ShardedEntity>(
        session: &mut ShardSession,
        identity: &[Value],
    ) -> Result<Option<E>, ShardError> {
        let query = session.query_for::<E>()?;
        query.get_entity::<E>(session, identity).await
    }

    /// Insert `instance` and commit.
    pub async fn save<E: ShardedEntity>(session: &mut ShardSession, instance: &E) -> Result<(), ShardError> {
        session.add(instance);
        session.commit().await
    }

    /// Update `changes` on the row `instance` identifies and commit.
    pub async fn save_updates<E: ShardedEntity>(
        session: &mut ShardSession,
        instance: &E,
        changes: Row,
    ) -> Result<(), ShardError> {
        session.update(instance, changes);
        session.commit().await
    }

    pub async fn delete<E: ShardedEntity>(session: &mut ShardSession, instance: &E) -> Result<(), ShardError> {
        session.delete(instance);
        session.commit().await
    }

    /// Find the row matching `filters`, or create it from `defaults` overlaid with `filters`.
    /// Returns the row and whether it was created.
    ///
    /// Not atomic: a unique constraint in the database is the real guard. If the insert
    /// loses a race to another session, the competing row is re-read and returned as found;
    /// if it cannot be seen, the `ConstraintViolation` is returned.
    pub async fn create_or_get<E: ShardedEntity>(
        session: &mut ShardSession,
        filters: &Row,
        defaults: &Row,
    ) -> Result<(E, bool), ShardError> {
        let query = Self::query::<E>(session)?.filter_by_row(filters);
        if let Some(found) = query.fetch_first::<E>(session).await? {
            return Ok((found, false));
        }
        Self::create_from(session, &query, filters, defaults).await
    }

    /// Like `create_or_get`, but a found row gets `defaults` applied. Only fields that differ
    /// are written; when none differ nothing is written at all.
    pub async fn update_or_create<E: ShardedEntity>(
        session: &mut ShardSession,
        filters: &Row,
        defaults: &Row,
    ) -> Result<(E, bool), ShardError> {
        let query = Self::query::<E>(session)?.filter_by_row(filters);
        let Some(found) = query.fetch_first::<E>(session).await? else {
            return Self::create_from(session, &query, filters, defaults).await;
        };
        let current = found.to_ordered_map();
        let changes: Row = defaults
            .iter()
            .filter(|(k, v)| current.get(k) != Some(*v))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if changes.is_empty() {
            return Ok((found, false));
        }
        let updated = E::from_row(current.merge(&changes))?;
        Self::save_updates(session, &found, changes).await?;
        Ok((updated, false))
    }

    /// Upsert by primary key: insert `instance` when no row has its identity, otherwise
    /// write the non-key columns that differ. Returns the instance and whether it was inserted.
    pub async fn merge<E: ShardedEntity>(session: &mut ShardSession, instance: &E) -> Result<(E, bool), ShardError> {
        let meta = E::meta();
        let wanted = instance.to_ordered_map();
        let identity = meta.identity_of(&wanted)?;
        let merged = E::from_row(wanted.clone())?;
        let Some(current) = Self::query::<E>(session)?.get(session, &identity).await? else {
            Self::save(session, instance).await?;
            return Ok((merged, true));
        };
        let changes: Row = wanted
            .iter()
            .filter(|(k, v)| !meta.primary_key.iter().any(|pk| pk.as_str() == *k) && current.get(k) != Some(*v))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        if !changes.is_empty() {
            Self::save_updates(session, instance, changes).await?;
        }
        Ok((merged, false))
    }

    async fn create_from<E: ShardedEntity>(
        session: &mut ShardSession,
        query: &ShardQuery,
        filters: &Row,
        defaults: &Row,
    ) -> Result<(E, bool), ShardError> {
        let instance = E::from_row(defaults.clone().merge(filters))?;
        match Self::save(session, &instance).await {
            Ok(()) => Ok((instance, true)),
            Err(e) if e.is_constraint_violation() => {
                tracing::warn!(entity = E::NAME, error = %e, "insert lost a race, re-reading");
                match query.fetch_first::<E>(session).await? {
                    Some(found) => Ok((found, false)),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Insert all `mappings` in one batch on `E`'s shard and commit. Existing rows are not
    /// checked; de-duplication is the caller's job. Returns the inserted row count.
    pub async fn bulk_insert<E: ShardedEntity>(
        session: &mut ShardSession,
        mappings: Vec<Row>,
    ) -> Result<u64, ShardError> {
        if mappings.is_empty() {
            return Ok(0);
        }
        let meta = E::meta();
        let shard = session.policy().shard_chooser(Some(&meta), None, None);
        let stmt = Statement::Insert {
            table: meta.table.clone(),
            rows: mappings,
        };
        let inserted = session.execute(&shard, Some(&meta), &stmt).await?;
        session.commit().await?;
        Ok(inserted)
    }

    /// Read-through lookup: cache first, then `get_by_id`; a found row is cached for `ttl`.
    pub async fn get_cached<E: ShardedEntity, C: Cache + ?Sized>(
        cache: &C,
        session: &mut ShardSession,
        identity: &[Value],
        ttl: Duration,
    ) -> Result<Option<E>, ShardError> {
        let key = entity_cache_key(&E::meta(), identity);
        if let Some(Value::Object(map)) = cache.get(&key).await {
            return E::from_row(map.into_iter().collect()).map(Some);
        }
        let found = Self::get_by_id::<E>(session, identity).await?;
        if let Some(entity) = &found {
            cache.set(&key, entity.to_ordered_map().to_json(), ttl).await;
        }
        Ok(found)
    }

    pub async fn evict_cached<E: ShardedEntity, C: Cache + ?Sized>(cache: &C, identity: &[Value]) {
        cache.delete(&entity_cache_key(&E::meta(), identity)).await;
    }

    /// Plain JSON objects for a result set (time columns only when `show_time`).
    pub fn dump_rows<E: ShardedEntity>(rows: &[E], show_time: bool) -> Vec<Value> {
        rows.iter().map(|r| r.to_dict(show_time)).collect()
    }
}
