use super::types::has_native_encoding;
use crate::event::Operation;
use crate::schema::TableSchema;
use crate::sql::{self, Dialect, Row, SqlBuilder, Statement, SOFT_DELETE_COLUMN};
use crate::value::SqlValue;
use crate::Result;

/// PostgreSQL statements: lower-cased unquoted identifiers, numbered
/// placeholders and `ON CONFLICT ... DO UPDATE` upserts.
///
/// Unquoted identifiers fold to lower case on the server, so a source
/// column `OrderID` addresses `orderid`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBuilder;

fn ident(name: &str) -> String {
    name.to_lowercase()
}

/// Catalog type names that would not survive case folding are quoted.
fn cast_type(data_type: &str) -> String {
    if data_type.chars().any(|c| c.is_ascii_uppercase()) {
        format!("\"{}\"", data_type.replace('"', "\"\""))
    } else {
        data_type.to_string()
    }
}

/// Collects arguments and hands out their `$n` placeholders.
struct Params<'a> {
    schema: &'a TableSchema,
    args: Vec<SqlValue>,
}

impl<'a> Params<'a> {
    fn new(schema: &'a TableSchema) -> Self {
        Self {
            schema,
            args: Vec::new(),
        }
    }

    /// Columns without a binary encoding are sent as text and cast by the server.
    fn push(&mut self, column: &str, value: &SqlValue) -> String {
        self.args.push(value.clone());
        let placeholder = format!("${}", self.args.len());
        match self.schema.column(column) {
            Some(info) if !has_native_encoding(&info.data_type) => {
                format!("{}::text::{}", placeholder, cast_type(&info.data_type))
            }
            _ => placeholder,
        }
    }

    fn key_predicate(&mut self, keys: &[(&str, &SqlValue)]) -> String {
        keys.iter()
            .map(|(name, value)| format!("{} = {}", ident(name), self.push(name, value)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

impl SqlBuilder for PostgresBuilder {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn build_insert(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement> {
        sql::require_primary_key(table, schema)?;

        let mut params = Params::new(schema);
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        let mut updates = Vec::new();

        for (name, value) in sql::insert_columns(row) {
            let column = ident(name);
            placeholders.push(params.push(name, value));
            if !schema.is_primary_key(name) {
                updates.push(format!("{0} = EXCLUDED.{0}", column));
            }
            columns.push(column);
        }

        columns.push(SOFT_DELETE_COLUMN.to_string());
        placeholders.push(params.push(SOFT_DELETE_COLUMN, &SqlValue::Null));
        updates.push(format!("{} = NULL", SOFT_DELETE_COLUMN));

        let conflict = schema
            .primary_keys
            .iter()
            .map(|pk| ident(pk))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
                ident(table),
                columns.join(", "),
                placeholders.join(", "),
                conflict,
                updates.join(", ")
            ),
            args: params.args,
            table: table.to_string(),
            op: Operation::Insert,
        })
    }

    fn build_update(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement> {
        let parts = sql::update_parts(table, row, schema)?;

        let mut params = Params::new(schema);
        let set = parts
            .assignments
            .iter()
            .map(|(name, value)| format!("{} = {}", ident(name), params.push(name, value)))
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = params.key_predicate(&parts.keys);

        Ok(Statement {
            sql: format!("UPDATE {} SET {} WHERE {}", ident(table), set, predicate),
            args: params.args,
            table: table.to_string(),
            op: Operation::Update,
        })
    }

    fn build_delete(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement> {
        let keys = sql::key_values(table, row, schema)?;

        let mut params = Params::new(schema);
        let marker = params.push(SOFT_DELETE_COLUMN, &sql::deleted_now());
        let predicate = params.key_predicate(&keys);

        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {} = {} WHERE {}",
                ident(table),
                SOFT_DELETE_COLUMN,
                marker,
                predicate
            ),
            args: params.args,
            table: table.to_string(),
            op: Operation::Delete,
        })
    }
}
