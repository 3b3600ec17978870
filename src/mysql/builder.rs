use crate::event::Operation;
use crate::schema::TableSchema;
use crate::sql::{self, Dialect, Row, SqlBuilder, Statement, SOFT_DELETE_COLUMN};
use crate::value::SqlValue;
use crate::Result;

/// MySQL statements: backtick-quoted identifiers, `?` placeholders and
/// `ON DUPLICATE KEY UPDATE` upserts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBuilder;

fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn key_predicate(keys: &[(&str, &SqlValue)]) -> String {
    keys.iter()
        .map(|(name, _)| format!("{} = ?", quote(name)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl SqlBuilder for MySqlBuilder {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn build_insert(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement> {
        sql::require_primary_key(table, schema)?;

        let mut columns = Vec::new();
        let mut args = Vec::new();
        let mut updates = Vec::new();

        for (name, value) in sql::insert_columns(row) {
            columns.push(quote(name));
            args.push(value.clone());
            if !schema.is_primary_key(name) {
                updates.push(format!("{0} = VALUES({0})", quote(name)));
            }
        }

        columns.push(quote(SOFT_DELETE_COLUMN));
        args.push(SqlValue::Null);
        updates.push(format!("{} = NULL", quote(SOFT_DELETE_COLUMN)));

        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                quote(table),
                columns.join(", "),
                placeholders,
                updates.join(", ")
            ),
            args,
            table: table.to_string(),
            op: Operation::Insert,
        })
    }

    fn build_update(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement> {
        let parts = sql::update_parts(table, row, schema)?;

        let set = parts
            .assignments
            .iter()
            .map(|(name, _)| format!("{} = ?", quote(name)))
            .collect::<Vec<_>>()
            .join(", ");

        let args = parts
            .assignments
            .iter()
            .chain(parts.keys.iter())
            .map(|(_, value)| (*value).clone())
            .collect();

        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                quote(table),
                set,
                key_predicate(&parts.keys)
            ),
            args,
            table: table.to_string(),
            op: Operation::Update,
        })
    }

    fn build_delete(&self, table: &str, row: &Row, schema: &TableSchema) -> Result<Statement> {
        let keys = sql::key_values(table, row, schema)?;

        let mut args = vec![sql::deleted_now()];
        args.extend(keys.iter().map(|(_, value)| (*value).clone()));

        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {} = ? WHERE {}",
                quote(table),
                quote(SOFT_DELETE_COLUMN),
                key_predicate(&keys)
            ),
            args,
            table: table.to_string(),
            op: Operation::Delete,
        })
    }
}
