mod common;

use async_trait::async_trait;
use common::{context, row, Report, Tag};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use vertical_shard::{unit_of_work, Cache, ModelBase, ScopeKey, ScopedSessions, ShardError, ShardedEntity};

#[tokio::test]
async fn create_or_get_creates_once_then_finds() {
    let (ctx, factory) = context();
    let mut session = ctx.session();
    let filters = row(&[("name", json!("rust"))]);
    let defaults = row(&[("id", json!(1)), ("color", json!("red"))]);

    let (tag, created) = ModelBase::create_or_get::<Tag>(&mut session, &filters, &defaults).await.unwrap();
    assert!(created);
    assert_eq!(tag, Tag { id: 1, name: "rust".into(), color: Some("red".into()) });

    let other_defaults = row(&[("id", json!(2))]);
    let (again, created) = ModelBase::create_or_get::<Tag>(&mut session, &filters, &other_defaults).await.unwrap();
    assert!(!created);
    assert_eq!(again.id, 1);
    assert_eq!(factory.engine("a").rows("tags_tbl").len(), 1);
    session.close().await.unwrap();
}

#[tokio::test]
async fn filters_override_defaults_on_create() {
    let (ctx, _) = context();
    let mut session = ctx.session();
    let filters = row(&[("name", json!("go"))]);
    let defaults = row(&[("id", json!(3)), ("name", json!("ignored"))]);
    let (tag, created) = ModelBase::create_or_get::<Tag>(&mut session, &filters, &defaults).await.unwrap();
    assert!(created);
    assert_eq!(tag.name, "go");
    session.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_or_get_leaves_one_row() {
    let (ctx, factory) = context();
    let mut handles = Vec::new();
    for id in 1..=8 {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            let mut session = ctx.session();
            let filters = row(&[("name", json!("shared"))]);
            let defaults = row(&[("id", json!(id))]);
            let result = ModelBase::create_or_get::<Tag>(&mut session, &filters, &defaults).await;
            session.close().await.unwrap();
            result
        }));
    }

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let (tag, was_created) = handle.await.unwrap().unwrap();
        created += usize::from(was_created);
        ids.push(tag.id);
    }
    assert_eq!(created, 1);
    let rows = factory.engine("a").rows("tags_tbl");
    assert_eq!(rows.len(), 1);
    let winner = rows[0].get("id").and_then(Value::as_i64).unwrap();
    assert!(ids.iter().all(|id| *id == winner));
}

#[tokio::test]
async fn losing_insert_surfaces_constraint_violation_at_commit() {
    let (ctx, factory) = context();
    let mut first = ctx.session();
    let mut second = ctx.session();
    first.add(&Tag { id: 1, name: "dup".into(), color: None });
    second.add(&Tag { id: 2, name: "dup".into(), color: None });
    first.flush().await.unwrap();
    second.flush().await.unwrap();

    first.commit().await.unwrap();
    let err = second.commit().await.unwrap_err();
    assert!(err.is_constraint_violation(), "{err}");
    assert_eq!(err.shard().map(|s| s.as_str()), Some("a"));
    assert_eq!(factory.engine("a").rows("tags_tbl").len(), 1);

    // The losing session can still read the winner.
    let filters = row(&[("name", json!("dup"))]);
    let (tag, created) = ModelBase::create_or_get::<Tag>(&mut second, &filters, &row(&[("id", json!(2))]))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(tag.id, 1);
    second.close().await.unwrap();
}

#[tokio::test]
async fn update_or_create_without_changes_writes_nothing() {
    let (ctx, factory) = context();
    let mut session = ctx.session();
    ModelBase::save(&mut session, &Tag { id: 1, name: "x".into(), color: Some("red".into()) })
        .await
        .unwrap();
    factory.engine("a").clear_log();

    let filters = row(&[("name", json!("x"))]);
    let defaults = row(&[("color", json!("red"))]);
    let (tag, created) = ModelBase::update_or_create::<Tag>(&mut session, &filters, &defaults).await.unwrap();
    assert!(!created);
    assert_eq!(tag.color.as_deref(), Some("red"));
    session.close().await.unwrap();

    let statements = factory.engine("a").statements();
    assert!(!statements.iter().any(|s| s.starts_with("UPDATE")), "{statements:?}");
    assert!(!statements.iter().any(|s| s.starts_with("INSERT")), "{statements:?}");
}

#[tokio::test]
async fn update_or_create_writes_only_changed_fields() {
    let (ctx, factory) = context();
    let mut session = ctx.session();
    ModelBase::save(&mut session, &Tag { id: 1, name: "x".into(), color: Some("red".into()) })
        .await
        .unwrap();
    factory.engine("a").clear_log();

    let filters = row(&[("name", json!("x"))]);
    let defaults = row(&[("color", json!("blue")), ("id", json!(1))]);
    let (tag, created) = ModelBase::update_or_create::<Tag>(&mut session, &filters, &defaults).await.unwrap();
    assert!(!created);
    assert_eq!(tag.color.as_deref(), Some("blue"));
    assert!(factory
        .engine("a")
        .statements()
        .contains(&"UPDATE tags_tbl SET color".to_string()));
    assert_eq!(factory.engine("a").rows("tags_tbl")[0].get("color"), Some(&json!("blue")));

    let (fresh, created) = ModelBase::update_or_create::<Tag>(
        &mut session,
        &row(&[("name", json!("y"))]),
        &row(&[("id", json!(2))]),
    )
    .await
    .unwrap();
    assert!(created);
    assert_eq!(fresh.id, 2);
    session.close().await.unwrap();
}

#[tokio::test]
async fn merge_inserts_then_updates_by_primary_key() {
    let (ctx, factory) = context();
    let mut session = ctx.session();
    let tag = Tag { id: 4, name: "m".into(), color: None };
    let (merged, inserted) = ModelBase::merge(&mut session, &tag).await.unwrap();
    assert!(inserted);
    assert_eq!(merged, tag);

    factory.engine("a").clear_log();
    let (_, inserted) = ModelBase::merge(&mut session, &tag).await.unwrap();
    assert!(!inserted);
    let statements = factory.engine("a").statements();
    assert!(!statements.iter().any(|s| s.starts_with("UPDATE") || s.starts_with("INSERT")), "{statements:?}");

    let recolored = Tag { color: Some("green".into()), ..tag };
    let (merged, inserted) = ModelBase::merge(&mut session, &recolored).await.unwrap();
    assert!(!inserted);
    assert_eq!(merged.color.as_deref(), Some("green"));
    assert!(factory
        .engine("a")
        .statements()
        .contains(&"UPDATE tags_tbl SET color".to_string()));
    let rows = factory.engine("a").rows("tags_tbl");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("color"), Some(&json!("green")));
    session.close().await.unwrap();
}

#[tokio::test]
async fn bulk_insert_is_one_statement() {
    let (ctx, factory) = context();
    let mut session = ctx.session();
    assert_eq!(ModelBase::bulk_insert::<Tag>(&mut session, Vec::new()).await.unwrap(), 0);
    assert_eq!(factory.engine("a").begins(), 0);

    let mappings = (1..=3)
        .map(|i| row(&[("id", json!(i)), ("name", json!(format!("t{i}")))]))
        .collect();
    assert_eq!(ModelBase::bulk_insert::<Tag>(&mut session, mappings).await.unwrap(), 3);
    assert_eq!(factory.engine("a").rows("tags_tbl").len(), 3);
    let inserts: Vec<String> = factory
        .engine("a")
        .statements()
        .into_iter()
        .filter(|s| s.starts_with("INSERT"))
        .collect();
    assert_eq!(inserts, vec!["INSERT INTO tags_tbl (3 rows)".to_string()]);
    session.close().await.unwrap();
}

#[tokio::test]
async fn bulk_insert_failure_rolls_back() {
    let (ctx, factory) = context();
    let mut session = ctx.session();
    let mappings = vec![
        row(&[("id", json!(1)), ("name", json!("same"))]),
        row(&[("id", json!(2)), ("name", json!("same"))]),
    ];
    let err = ModelBase::bulk_insert::<Tag>(&mut session, mappings).await.unwrap_err();
    assert!(err.is_constraint_violation());
    assert!(factory.engine("a").rows("tags_tbl").is_empty());
    assert!(session.open_shards().is_empty());
}

#[tokio::test]
async fn get_by_id_and_delete() {
    let (ctx, _) = context();
    let mut session = ctx.session();
    let tag = Tag { id: 5, name: "del".into(), color: None };
    ModelBase::save(&mut session, &tag).await.unwrap();

    let found = ModelBase::get_by_id::<Tag>(&mut session, &[json!(5)]).await.unwrap();
    assert_eq!(found.as_ref(), Some(&tag));
    session.rollback().await.unwrap();

    ModelBase::delete(&mut session, &tag).await.unwrap();
    assert!(ModelBase::get_by_id::<Tag>(&mut session, &[json!(5)]).await.unwrap().is_none());
    assert!(ModelBase::get_by_id::<Tag>(&mut session, &[json!(1), json!(2)]).await.is_err());
    session.close().await.unwrap();
}

#[tokio::test]
async fn dump_hides_time_columns_unless_asked() {
    let reports = vec![Report {
        id: 1,
        title: "q1".into(),
        created_at: Some("2024-05-01T10:00:00Z".into()),
    }];
    assert_eq!(ModelBase::dump_rows(&reports, false), vec![json!({"id": 1, "title": "q1"})]);
    assert_eq!(
        ModelBase::dump_rows(&reports, true)[0]["created_at"],
        json!("2024-05-01T10:00:00Z")
    );
}

#[derive(Default)]
struct MapCache(Mutex<HashMap<String, Value>>);

#[async_trait]
impl Cache for MapCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().unwrap().get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value, _ttl: Duration) {
        self.0.lock().unwrap().insert(key.to_string(), value);
    }

    async fn delete(&self, key: &str) {
        self.0.lock().unwrap().remove(key);
    }
}

#[tokio::test]
async fn cached_lookup_reads_through_once() {
    let (ctx, factory) = context();
    let cache = MapCache::default();
    let mut session = ctx.session();
    ModelBase::save(&mut session, &Tag { id: 9, name: "c".into(), color: None })
        .await
        .unwrap();
    let begins = factory.engine("a").begins();

    let ttl = Duration::from_secs(60);
    let first: Option<Tag> = ModelBase::get_cached(&cache, &mut session, &[json!(9)], ttl).await.unwrap();
    session.rollback().await.unwrap();
    let second: Option<Tag> = ModelBase::get_cached(&cache, &mut session, &[json!(9)], ttl).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(factory.engine("a").begins(), begins + 1);
    assert!(cache.0.lock().unwrap().contains_key("a:tags_tbl:9"));

    ModelBase::evict_cached::<Tag, _>(&cache, &[json!(9)]).await;
    assert!(cache.0.lock().unwrap().is_empty());
    session.close().await.unwrap();
}

#[tokio::test]
async fn unit_of_work_commits_what_the_body_commits() {
    let (ctx, factory) = context();
    let filters = row(&[("name", json!("uow"))]);
    let defaults = row(&[("id", json!(1))]);
    let (tag, created) = unit_of_work(&ctx, move |session| {
        Box::pin(async move { ModelBase::create_or_get::<Tag>(session, &filters, &defaults).await })
    })
    .await
    .unwrap();
    assert!(created);
    assert_eq!(tag.name, "uow");
    assert_eq!(factory.engine("a").rows("tags_tbl").len(), 1);

    let err = unit_of_work(&ctx, |session| {
        Box::pin(async move {
            session.add(&Tag { id: 2, name: "never".into(), color: None });
            session.flush().await?;
            Err::<(), _>(ShardError::Entity("abort".into()))
        })
    })
    .await
    .unwrap_err();
    assert!(matches!(err, ShardError::Entity(_)));
    assert_eq!(factory.engine("a").rows("tags_tbl").len(), 1);
}

#[tokio::test]
async fn scoped_session_is_reused_within_scope() {
    let (ctx, factory) = context();
    let mut session = ctx.session();
    ModelBase::save(&mut session, &Tag { id: 1, name: "s".into(), color: None })
        .await
        .unwrap();
    let begins = factory.engine("a").begins();

    let scoped = ScopedSessions::new(ctx.clone());
    let key = ScopeKey::new();
    for _ in 0..2 {
        let shared = scoped.current(&key);
        let mut guard = shared.lock().await;
        let found = ModelBase::get_by_id::<Tag>(&mut guard, &[json!(1)]).await.unwrap();
        assert!(found.is_some());
    }
    assert_eq!(factory.engine("a").begins(), begins + 1);

    scoped.remove(&key).await.unwrap();
    assert!(scoped.is_empty());
    assert_eq!(factory.engine("a").statements().last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(Tag::meta().static_shard().as_str(), "a");
}
