use crate::value::SqlValue;
use crate::Error;
use sqlx::mysql::{MySql, MySqlArguments, MySqlDatabaseError};
use sqlx::query::Query;

/// MySQL server error numbers for `ER_LOCK_DEADLOCK` and `ER_LOCK_WAIT_TIMEOUT`.
const LOCK_CONFLICT_CODES: [u16; 2] = [1213, 1205];
const SERIALIZATION_FAILURE: &str = "40001";

pub(crate) fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.as_str()),
        SqlValue::Bytes(b) => query.bind(b.as_slice()),
        SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
        // DATETIME columns carry no zone; store the value's own wall clock.
        SqlValue::Timestamp(ts) => query.bind(ts.naive_local()),
        SqlValue::Date(d) => query.bind(*d),
    }
}

/// Classifies deadlocks and lock-wait timeouts by server error number.
pub(crate) fn is_lock_conflict(err: &Error) -> bool {
    let Error::MySql(sqlx::Error::Database(db)) = err.root_cause() else {
        return false;
    };
    if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>() {
        if LOCK_CONFLICT_CODES.contains(&mysql.number()) {
            return true;
        }
    }
    db.code().as_deref() == Some(SERIALIZATION_FAILURE)
}
