//! Shard ids and the entity-type contract the routing layer consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::case::default_table_name;
use crate::error::ShardError;
use crate::row::Row;

/// Shard every entity type lives on unless it names another.
pub const DEFAULT_SHARD: &str = "default";

/// Opaque name of one physical database.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ShardId {
    fn default() -> Self {
        ShardId(DEFAULT_SHARD.to_string())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        ShardId(s.to_string())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        ShardId(s)
    }
}

/// Static description of a mapped entity type, as seen by routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityMeta {
    pub name: String,
    pub table: String,
    /// Statically declared shard; `None` means the default shard.
    pub shard: Option<ShardId>,
    pub primary_key: Vec<String>,
    /// Datetime columns, dropped from dumps unless asked for.
    pub time_columns: Vec<String>,
}

impl EntityMeta {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        EntityMeta {
            table: default_table_name(&name),
            name,
            shard: None,
            primary_key: vec!["id".into()],
            time_columns: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn on_shard(mut self, shard: impl Into<ShardId>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Declared shard or `"default"`.
    pub fn static_shard(&self) -> ShardId {
        self.shard.clone().unwrap_or_default()
    }

    /// Pair primary-key columns with identity values. Errors when the arity differs.
    pub fn identity_filters(&self, identity: &[Value]) -> Result<Vec<(String, Value)>, ShardError> {
        if identity.len() != self.primary_key.len() {
            return Err(ShardError::Entity(format!(
                "{}: identity has {} values, primary key has {} columns",
                self.name,
                identity.len(),
                self.primary_key.len()
            )));
        }
        Ok(self.primary_key.iter().cloned().zip(identity.iter().cloned()).collect())
    }

    /// Primary-key values of a row, in key order.
    pub fn identity_of(&self, row: &Row) -> Result<Vec<Value>, ShardError> {
        self.primary_key
            .iter()
            .map(|k| {
                row.get(k)
                    .cloned()
                    .ok_or_else(|| ShardError::Entity(format!("{}: row has no primary key column '{}'", self.name, k)))
            })
            .collect()
    }
}

/// Implemented by every mapped type. The shard is fixed per type.
pub trait ShardedEntity: Sized + Send + Sync {
    /// Type name; also the source of the default table name.
    const NAME: &'static str;

    fn table() -> String {
        default_table_name(Self::NAME)
    }

    fn shard_id() -> Option<ShardId> {
        None
    }

    fn primary_key() -> &'static [&'static str] {
        &["id"]
    }

    fn time_columns() -> &'static [&'static str] {
        &[]
    }

    fn meta() -> EntityMeta {
        EntityMeta {
            name: Self::NAME.to_string(),
            table: Self::table(),
            shard: Self::shard_id(),
            primary_key: Self::primary_key().iter().map(|c| c.to_string()).collect(),
            time_columns: Self::time_columns().iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Column values in table order.
    fn to_ordered_map(&self) -> Row;

    fn from_row(row: Row) -> Result<Self, ShardError>;

    fn identity(&self) -> Result<Vec<Value>, ShardError> {
        Self::meta().identity_of(&self.to_ordered_map())
    }

    fn to_dict(&self, show_time: bool) -> Value {
        crate::row::dump_row(&self.to_ordered_map(), Self::time_columns(), show_time)
    }
}
