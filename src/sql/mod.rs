//! Dialect-neutral statement model and the builder seam.
//!
//! Every dialect turns `(table, converted payload, schema)` into one
//! parameterised [`Statement`]. The rules shared by both dialects live
//! here: which payload keys become columns, how primary-key values are
//! collected, and when a payload cannot address a row. Dialects only
//! decide quoting, placeholders and upsert grammar.

use crate::event::{is_metadata_key, Operation};
use crate::schema::TableSchema;
use crate::value::SqlValue;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Soft-delete marker column every replicated table carries.
pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

/// Converted payload: column name to value, iterated in name order.
pub type Row = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => f.write_str("mysql"),
            Dialect::Postgres => f.write_str("postgres"),
        }
    }
}

/// One parameterised statement, executed inside a batch transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
    pub table: String,
    pub op: Operation,
}

pub trait SqlBuilder: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Upsert keyed by primary key; the conflict branch clears the soft-delete marker.
    fn build_insert(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement>;

    fn build_update(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement>;

    /// Soft delete: sets the marker to the current UTC instant, never removes the row.
    fn build_delete(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement>;
}

pub fn builder_for(dialect: Dialect) -> Box<dyn SqlBuilder> {
    match dialect {
        Dialect::MySql => Box::new(crate::mysql::MySqlBuilder),
        Dialect::Postgres => Box::new(crate::postgres::PostgresBuilder),
    }
}

/// Columns written by an insert: everything but metadata and the soft-delete marker,
/// which the builders always append themselves.
pub(crate) fn insert_columns(row: &Row) -> impl Iterator<Item = (&str, &SqlValue)> {
    row.iter()
        .filter(|(name, _)| !is_metadata_key(name) && name.as_str() != SOFT_DELETE_COLUMN)
        .map(|(name, value)| (name.as_str(), value))
}

pub(crate) fn require_primary_key(table: &str, schema: &TableSchema) -> Result<()> {
    if schema.primary_keys.is_empty() {
        return Err(Error::NoPrimaryKey {
            table: table.to_string(),
        });
    }
    Ok(())
}

/// Primary-key values in schema key order.
pub(crate) fn key_values<'a>(
    table: &str,
    row: &'a Row,
    schema: &'a TableSchema,
) -> Result<Vec<(&'a str, &'a SqlValue)>> {
    require_primary_key(table, schema)?;

    let found: Vec<(&str, &SqlValue)> = schema
        .primary_keys
        .iter()
        .filter_map(|pk| row.get(pk).map(|value| (pk.as_str(), value)))
        .collect();

    if found.len() != schema.primary_keys.len() {
        return Err(Error::MissingPrimaryKey {
            table: table.to_string(),
            expected: schema.primary_keys.len(),
            found: found.len(),
        });
    }
    Ok(found)
}

/// Splits an update payload into assignments and the key predicate.
pub(crate) struct UpdateParts<'a> {
    pub assignments: Vec<(&'a str, &'a SqlValue)>,
    pub keys: Vec<(&'a str, &'a SqlValue)>,
}

pub(crate) fn update_parts<'a>(
    table: &str,
    row: &'a Row,
    schema: &'a TableSchema,
) -> Result<UpdateParts<'a>> {
    let keys = key_values(table, row, schema)?;

    let assignments: Vec<(&str, &SqlValue)> = row
        .iter()
        .filter(|(name, _)| !is_metadata_key(name) && !schema.is_primary_key(name))
        .map(|(name, value)| (name.as_str(), value))
        .collect();

    if assignments.is_empty() {
        return Err(Error::NothingToUpdate {
            table: table.to_string(),
        });
    }
    Ok(UpdateParts { assignments, keys })
}

pub(crate) fn deleted_now() -> SqlValue {
    SqlValue::Timestamp(chrono::Utc::now().fixed_offset())
}
