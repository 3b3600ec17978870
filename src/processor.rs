use crate::event::{is_metadata_key, ChangeEvent, Operation};
use crate::schema::{SchemaCatalog, TableSchema, ValueConverter};
use crate::sql::{Row, SqlBuilder, Statement};
use crate::value::SqlValue;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

/// Turns change events into statements for the configured dialect.
pub struct Processor {
    catalog: Arc<SchemaCatalog>,
    converter: ValueConverter,
    builder: Box<dyn SqlBuilder>,
    excluded: HashSet<String>,
}

impl Processor {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        converter: ValueConverter,
        builder: Box<dyn SqlBuilder>,
        excluded_tables: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            catalog,
            converter,
            builder,
            excluded: excluded_tables.into_iter().collect(),
        }
    }

    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded.contains(table)
    }

    pub async fn build_sql(&self, event: &ChangeEvent) -> Result<Statement> {
        let op = event.operation();
        if op == Operation::Unknown {
            return Err(Error::UnknownOperation {
                op: event.op.clone(),
            });
        }

        let table = event.source_table.as_str();
        let schema = self.catalog.table_schema(table).await?;
        let row = self.convert_payload(event, &schema);
        trace!(table, op = %op, columns = row.len(), "Building statement");

        match op {
            Operation::Insert => self.builder.build_insert(table, &row, &schema),
            Operation::Update => self.builder.build_update(table, &row, &schema),
            Operation::Delete => self.builder.build_delete(table, &row, &schema),
            Operation::Unknown => Err(Error::UnknownOperation {
                op: event.op.clone(),
            }),
        }
    }

    /// Converts column values by catalog type and renames keys to the catalog's spelling.
    ///
    /// Columns unknown to the catalog pass through unconverted.
    fn convert_payload(&self, event: &ChangeEvent, schema: &TableSchema) -> Row {
        event
            .payload
            .iter()
            .map(|(key, raw)| {
                if is_metadata_key(key) {
                    return (key.clone(), SqlValue::from_json(raw));
                }
                match schema.column(key) {
                    Some(column) => (column.name.clone(), self.converter.convert(column, raw)),
                    None => (key.clone(), SqlValue::from_json(raw)),
                }
            })
            .collect()
    }
}
