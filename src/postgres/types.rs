//! Binary parameter encoding of [`SqlValue`] for PostgreSQL.
//!
//! The server infers each parameter's type from the statement; the value
//! adapts to it. Column types outside [`has_native_encoding`] are bound as
//! text and cast in SQL by the builder.

use crate::value::SqlValue;
use crate::Error;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::PoolError;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Catalog type names whose parameters are encoded directly.
const NATIVE_COLUMN_TYPES: [&str; 15] = [
    "smallint",
    "integer",
    "bigint",
    "real",
    "double precision",
    "boolean",
    "text",
    "character varying",
    "character",
    "json",
    "jsonb",
    "bytea",
    "date",
    "timestamp without time zone",
    "timestamp with time zone",
];

const ACCEPTED_TYPES: [Type; 16] = [
    Type::BOOL,
    Type::INT2,
    Type::INT4,
    Type::INT8,
    Type::FLOAT4,
    Type::FLOAT8,
    Type::TEXT,
    Type::VARCHAR,
    Type::BPCHAR,
    Type::NAME,
    Type::JSON,
    Type::JSONB,
    Type::BYTEA,
    Type::DATE,
    Type::TIMESTAMP,
    Type::TIMESTAMPTZ,
];

pub(crate) fn has_native_encoding(data_type: &str) -> bool {
    NATIVE_COLUMN_TYPES.contains(&data_type.to_ascii_lowercase().as_str())
}

const ZONELESS_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("cannot encode {:?} as PostgreSQL {}", value, ty).into()
}

impl SqlValue {
    fn pg_bool(&self, ty: &Type) -> Result<bool, BoxError> {
        match self {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(i) => Ok(*i != 0),
            SqlValue::Float(f) => Ok(*f != 0.0),
            SqlValue::Text(s) => Ok(matches!(s.as_str(), "1" | "t" | "true" | "TRUE")),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn pg_i64(&self, ty: &Type) -> Result<i64, BoxError> {
        match self {
            SqlValue::Int(i) => Ok(*i),
            SqlValue::Bool(b) => Ok(i64::from(*b)),
            SqlValue::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            SqlValue::Text(s) => Ok(s.trim().parse()?),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn pg_f64(&self, ty: &Type) -> Result<f64, BoxError> {
        match self {
            SqlValue::Float(f) => Ok(*f),
            SqlValue::Int(i) => Ok(*i as f64),
            SqlValue::Text(s) => Ok(s.trim().parse()?),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn pg_timestamp(&self, ty: &Type) -> Result<DateTime<Utc>, BoxError> {
        match self {
            SqlValue::Timestamp(ts) => Ok(ts.with_timezone(&Utc)),
            SqlValue::Date(d) => Ok(d.and_time(chrono::NaiveTime::MIN).and_utc()),
            SqlValue::Text(s) => {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return Ok(ts.with_timezone(&Utc));
                }
                ZONELESS_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                    .map(|naive| naive.and_utc())
                    .ok_or_else(|| mismatch(self, ty))
            }
            _ => Err(mismatch(self, ty)),
        }
    }

    fn pg_date(&self, ty: &Type) -> Result<NaiveDate, BoxError> {
        match self {
            SqlValue::Date(d) => Ok(*d),
            SqlValue::Timestamp(ts) => Ok(ts.date_naive()),
            SqlValue::Text(s) => Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn pg_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Json(v) => v.clone(),
            SqlValue::Text(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone()))
            }
            other => serde_json::to_value(other).unwrap_or(serde_json::Value::Null),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }

        if *ty == Type::BOOL {
            self.pg_bool(ty)?.to_sql(ty, out)
        } else if *ty == Type::INT2 {
            i16::try_from(self.pg_i64(ty)?)?.to_sql(ty, out)
        } else if *ty == Type::INT4 {
            i32::try_from(self.pg_i64(ty)?)?.to_sql(ty, out)
        } else if *ty == Type::INT8 {
            self.pg_i64(ty)?.to_sql(ty, out)
        } else if *ty == Type::FLOAT4 {
            (self.pg_f64(ty)? as f32).to_sql(ty, out)
        } else if *ty == Type::FLOAT8 {
            self.pg_f64(ty)?.to_sql(ty, out)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            self.pg_json().to_sql(ty, out)
        } else if *ty == Type::BYTEA {
            match self {
                SqlValue::Bytes(b) => b.as_slice().to_sql(ty, out),
                SqlValue::Text(s) => s.as_bytes().to_sql(ty, out),
                other => Err(mismatch(other, ty)),
            }
        } else if *ty == Type::DATE {
            self.pg_date(ty)?.to_sql(ty, out)
        } else if *ty == Type::TIMESTAMP {
            // Zone-less columns store the wall clock of the value's own offset.
            match self {
                SqlValue::Timestamp(ts) => ts.naive_local().to_sql(ty, out),
                other => other.pg_timestamp(ty)?.naive_utc().to_sql(ty, out),
            }
        } else if *ty == Type::TIMESTAMPTZ {
            self.pg_timestamp(ty)?.to_sql(ty, out)
        } else {
            match self {
                SqlValue::Text(s) => s.as_str().to_sql(ty, out),
                other => other.to_string().as_str().to_sql(ty, out),
            }
        }
    }

    fn accepts(ty: &Type) -> bool {
        ACCEPTED_TYPES.contains(ty)
    }

    to_sql_checked!();
}

/// Deadlock, serialization failure and `NOWAIT` lock contention.
pub(crate) fn is_lock_conflict(err: &Error) -> bool {
    let pg = match err.root_cause() {
        Error::Postgres(e) => e,
        Error::Pool(PoolError::Backend(e)) => e,
        _ => return false,
    };
    pg.code().is_some_and(|code| {
        *code == SqlState::T_R_DEADLOCK_DETECTED
            || *code == SqlState::T_R_SERIALIZATION_FAILURE
            || *code == SqlState::LOCK_NOT_AVAILABLE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn encode(value: SqlValue, ty: Type) -> Result<Vec<u8>, BoxError> {
        let mut buf = BytesMut::new();
        match value.to_sql(&ty, &mut buf)? {
            IsNull::Yes => Ok(Vec::new()),
            IsNull::No => Ok(buf.to_vec()),
        }
    }

    #[test]
    fn test_native_column_types() {
        assert!(has_native_encoding("bigint"));
        assert!(has_native_encoding("timestamp with time zone"));
        assert!(!has_native_encoding("numeric"));
        assert!(!has_native_encoding("uuid"));
        assert!(!has_native_encoding("time without time zone"));
    }

    #[test]
    fn test_integers_adapt_to_width() {
        assert_eq!(encode(SqlValue::Int(7), Type::INT4).unwrap(), 7i32.to_be_bytes());
        assert_eq!(encode(SqlValue::Int(7), Type::INT2).unwrap(), 7i16.to_be_bytes());
        assert_eq!(encode(SqlValue::Text("42".into()), Type::INT8).unwrap(), 42i64.to_be_bytes());
        assert!(encode(SqlValue::Int(70_000), Type::INT2).is_err());
    }

    #[test]
    fn test_null_for_any_type() {
        let mut buf = BytesMut::new();
        assert!(matches!(SqlValue::Null.to_sql(&Type::TIMESTAMPTZ, &mut buf), Ok(IsNull::Yes)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_text_fallback_for_cast_parameters() {
        assert_eq!(encode(SqlValue::Text("9.99".into()), Type::TEXT).unwrap(), b"9.99");
        assert_eq!(encode(SqlValue::Int(5), Type::TEXT).unwrap(), b"5");
    }

    #[test]
    fn test_timestamp_variants() {
        let ts = DateTime::<FixedOffset>::parse_from_rfc3339("2025-01-01T12:00:00-07:00").unwrap();
        let tz = encode(SqlValue::Timestamp(ts), Type::TIMESTAMPTZ).unwrap();
        let naive = encode(SqlValue::Timestamp(ts), Type::TIMESTAMP).unwrap();

        // timestamptz carries the instant, timestamp the value's own wall clock.
        let utc_wall = encode(SqlValue::Text("2025-01-01 19:00:00".into()), Type::TIMESTAMP).unwrap();
        let local_wall = encode(SqlValue::Text("2025-01-01 12:00:00".into()), Type::TIMESTAMP).unwrap();
        assert_eq!(tz, utc_wall);
        assert_eq!(naive, local_wall);
    }

    #[test]
    fn test_fractional_text_timestamp() {
        let ts = DateTime::<FixedOffset>::parse_from_rfc3339("2025-01-01T12:00:00.500Z").unwrap();
        let expected = encode(SqlValue::Timestamp(ts), Type::TIMESTAMP).unwrap();

        let spaced = encode(SqlValue::Text("2025-01-01 12:00:00.500".into()), Type::TIMESTAMP).unwrap();
        let iso = encode(SqlValue::Text("2025-01-01T12:00:00.500".into()), Type::TIMESTAMP).unwrap();
        assert_eq!(spaced, expected);
        assert_eq!(iso, expected);
    }

    #[test]
    fn test_mismatch_is_error() {
        assert!(encode(SqlValue::Json(serde_json::json!({"a": 1})), Type::INT4).is_err());
        assert!(encode(SqlValue::Text("not a date".into()), Type::DATE).is_err());
    }

    #[test]
    fn test_accepts() {
        assert!(<SqlValue as ToSql>::accepts(&Type::JSONB));
        assert!(!<SqlValue as ToSql>::accepts(&Type::NUMERIC));
    }

    #[test]
    fn test_non_postgres_errors_are_not_conflicts() {
        assert!(!is_lock_conflict(&Error::Connection("deadlock detected".into())));
    }
}
