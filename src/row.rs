//! Ordered row mapping and the serialization policy used to dump rows.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ShardError;

/// Column name to value pairs in a defined order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Row { fields: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Replace the value of an existing column in place, or append it.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Overlay `other` on top of self: existing columns are replaced, new ones appended.
    pub fn merge(mut self, other: &Row) -> Self {
        for (k, v) in other.iter() {
            self.set(k, v.clone());
        }
        self
    }

    /// True when every column in `filters` has an equal value in this row.
    pub fn matches(&self, filters: &[(String, Value)]) -> bool {
        filters.iter().all(|(k, v)| self.get(k) == Some(v))
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self.fields.iter().cloned().collect();
        Value::Object(map)
    }

    /// Deserialize into an entity struct (column names are field names).
    pub fn into_struct<T: DeserializeOwned>(self) -> Result<T, ShardError> {
        serde_json::from_value(self.to_json()).map_err(|e| ShardError::Entity(e.to_string()))
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Datetime as RFC 3339 in UTC.
pub fn datetime_value(at: &DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

/// Naive datetimes are taken to be UTC.
pub fn naive_datetime_value(at: &NaiveDateTime) -> Value {
    datetime_value(&at.and_utc())
}

/// Enum values dump as their variant name.
pub fn enum_name<E: std::fmt::Debug>(value: &E) -> Value {
    Value::String(format!("{:?}", value))
}

/// Decimal text (PostgreSQL `numeric::text`) as a float; unparsable text stays a string.
pub fn decimal_value(text: &str) -> Value {
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

/// Dump a row to a plain JSON object. Time columns are dropped unless `show_time`.
pub fn dump_row(row: &Row, time_columns: &[&str], show_time: bool) -> Value {
    let map: Map<String, Value> = row
        .iter()
        .filter(|(k, v)| show_time || v.is_null() || !time_columns.contains(k))
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_replaces_in_place() {
        let mut row = Row::new().with("id", 1).with("name", "a");
        row.set("id", json!(2));
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(row.get("id"), Some(&json!(2)));
    }

    #[test]
    fn merge_overlays() {
        let base = Row::new().with("name", "x").with("color", "red");
        let merged = base.merge(&Row::new().with("color", "blue").with("rank", 3));
        assert_eq!(merged.to_json(), json!({"name": "x", "color": "blue", "rank": 3}));
    }

    #[test]
    fn dump_skips_time_columns() {
        let row = Row::new()
            .with("id", 1)
            .with("created_at", "2024-01-01T00:00:00Z")
            .with("deleted_at", Value::Null);
        assert_eq!(
            dump_row(&row, &["created_at", "deleted_at"], false),
            json!({"id": 1, "deleted_at": null})
        );
        assert_eq!(dump_row(&row, &["created_at"], true)["created_at"], json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn policy_functions() {
        #[derive(Debug)]
        enum Status {
            Active,
        }
        assert_eq!(enum_name(&Status::Active), json!("Active"));
        assert_eq!(decimal_value("12.50"), json!(12.5));
        assert_eq!(decimal_value("NaN?"), json!("NaN?"));
        let at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00+02:00").unwrap().with_timezone(&Utc);
        assert_eq!(datetime_value(&at), json!("2024-03-01T08:00:00Z"));
    }
}
