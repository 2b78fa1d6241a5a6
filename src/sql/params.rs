//! Row cell values bound as PostgreSQL statement parameters.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A value that can be bound to a PostgreSQL query. Converts from serde_json::Value.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Uuid(uuid::Uuid),
    Timestamptz(DateTime<Utc>),
    Date(NaiveDate),
    Json(Value),
}

/// Oid 0: the server infers the parameter type from where it is used.
fn unspecified() -> PgTypeInfo {
    PgTypeInfo::with_oid(Oid(0))
}

impl PgBindValue {
    /// Strings shaped like the values rows decode to (uuid, RFC 3339 datetime,
    /// `YYYY-MM-DD` date) bind as those types so they round-trip into typed columns.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => PgBindValue::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::from_text(s),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }

    fn from_text(s: &str) -> Self {
        if let Ok(u) = uuid::Uuid::parse_str(s) {
            return PgBindValue::Uuid(u);
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(s) {
            return PgBindValue::Timestamptz(at.with_timezone(&Utc));
        }
        if s.len() == 10 {
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return PgBindValue::Date(d);
            }
        }
        PgBindValue::String(s.to_string())
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::String(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf)?,
            PgBindValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf)?,
            PgBindValue::Timestamptz(at) => <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(at, buf)?,
            PgBindValue::Date(d) => <NaiveDate as Encode<Postgres>>::encode_by_ref(d, buf)?,
            PgBindValue::Json(v) => <serde_json::Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    /// Null and plain text are left for the server to type from the target column,
    /// so they fit integer, enum, varchar and other columns alike.
    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => unspecified(),
            PgBindValue::Bool(_) => PgTypeInfo::with_name("BOOL"),
            PgBindValue::I64(_) => PgTypeInfo::with_name("INT8"),
            PgBindValue::F64(_) => PgTypeInfo::with_name("FLOAT8"),
            PgBindValue::Uuid(_) => PgTypeInfo::with_name("UUID"),
            PgBindValue::Timestamptz(_) => PgTypeInfo::with_name("TIMESTAMPTZ"),
            PgBindValue::Date(_) => PgTypeInfo::with_name("DATE"),
            PgBindValue::Json(_) => PgTypeInfo::with_name("JSONB"),
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        unspecified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn converts_json_scalars() {
        assert_eq!(PgBindValue::from_json(&json!(null)), PgBindValue::Null);
        assert_eq!(PgBindValue::from_json(&json!(3)), PgBindValue::I64(3));
        assert_eq!(PgBindValue::from_json(&json!(1.5)), PgBindValue::F64(1.5));
        assert_eq!(PgBindValue::from_json(&json!("tag")), PgBindValue::String("tag".into()));
        assert!(matches!(
            PgBindValue::from_json(&json!("67e55044-10b1-426f-9247-bb680e5fe0c8")),
            PgBindValue::Uuid(_)
        ));
        assert!(matches!(PgBindValue::from_json(&json!({"a": 1})), PgBindValue::Json(_)));
    }

    #[test]
    fn datetime_text_binds_as_timestamptz() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            PgBindValue::from_json(&crate::row::datetime_value(&at)),
            PgBindValue::Timestamptz(at)
        );
        assert_eq!(
            PgBindValue::from_json(&json!("2024-01-01T02:00:00+02:00")),
            PgBindValue::Timestamptz(at)
        );
        assert_eq!(
            PgBindValue::from_json(&json!("2024-03-05")),
            PgBindValue::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
        );
        assert_eq!(PgBindValue::from_json(&json!("2024-03-05 x")), PgBindValue::String("2024-03-05 x".into()));
    }

    #[test]
    fn null_and_text_leave_type_to_the_server() {
        let oid = |v: PgBindValue| v.produces().and_then(|t| t.oid());
        assert_eq!(oid(PgBindValue::Null), Some(Oid(0)));
        assert_eq!(oid(PgBindValue::String("x".into())), Some(Oid(0)));
        assert_ne!(oid(PgBindValue::Timestamptz(Utc::now())), Some(Oid(0)));
    }
}
