//! Target table metadata and the shared catalog cache.
//!
//! Column metadata is loaded lazily from the target database's catalog
//! views the first time a table is referenced, then cached for the life
//! of the process. The cache is the only state that workers mutate
//! concurrently.

pub mod converter;

pub use converter::{DataFamily, TemporalOutput, ValueConverter};

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Data-type tag as the target catalog reports it (`datetime`, `character varying`, ...).
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

impl ColumnInfo {
    pub fn family(&self) -> DataFamily {
        DataFamily::from_type_name(&self.data_type)
    }
}

/// One row of a catalog query: a column and its position within the primary key.
#[derive(Debug, Clone)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub key_position: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: HashMap<String, ColumnInfo>,
    /// Primary-key columns in key order; composite predicates follow this order.
    pub primary_keys: Vec<String>,
}

impl TableSchema {
    pub fn from_catalog(name: impl Into<String>, rows: Vec<CatalogColumn>) -> Self {
        let mut keyed: Vec<(i64, String)> = rows
            .iter()
            .filter_map(|row| row.key_position.map(|pos| (pos, row.name.clone())))
            .collect();
        keyed.sort_by_key(|(pos, _)| *pos);

        let columns = rows
            .into_iter()
            .map(|row| {
                let info = ColumnInfo {
                    is_primary_key: row.key_position.is_some(),
                    name: row.name,
                    data_type: row.data_type,
                    nullable: row.nullable,
                };
                (info.name.clone(), info)
            })
            .collect();

        Self {
            name: name.into(),
            columns,
            primary_keys: keyed.into_iter().map(|(_, name)| name).collect(),
        }
    }

    /// Looks up a column by exact name, then ASCII case-insensitively.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.get(name).or_else(|| {
            self.columns
                .values()
                .find(|c| c.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.column(column).map(|c| c.is_primary_key).unwrap_or(false)
    }
}

/// Dialect-specific access to the target's catalog views.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Returns every column of `table`, or an empty list when the table does not exist.
    async fn load_columns(&self, table: &str) -> Result<Vec<CatalogColumn>>;
}

pub struct SchemaCatalog {
    source: Arc<dyn CatalogSource>,
    cache: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached schema for `table`, loading it on first use.
    ///
    /// Two workers missing at once both query the catalog; the second insert
    /// overwrites the first with an identical schema. Unknown tables are not
    /// cached so a later fix on the target is picked up.
    pub async fn table_schema(&self, table: &str) -> Result<Arc<TableSchema>> {
        if let Some(schema) = self.cache.read().await.get(table) {
            return Ok(Arc::clone(schema));
        }

        debug!(table, "Loading table schema from catalog");
        let rows = self.source.load_columns(table).await?;
        if rows.is_empty() {
            return Err(Error::UnknownTable {
                table: table.to_string(),
            });
        }

        let schema = Arc::new(TableSchema::from_catalog(table, rows));
        info!(
            table,
            columns = schema.columns.len(),
            primary_keys = ?schema.primary_keys,
            "Cached table schema"
        );
        self.cache
            .write()
            .await
            .insert(table.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    pub async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.table_schema(table).await?.primary_keys.clone())
    }

    pub async fn column(&self, table: &str, column: &str) -> Result<Option<ColumnInfo>> {
        Ok(self.table_schema(table).await?.column(column).cloned())
    }

    pub async fn is_primary_key(&self, table: &str, column: &str) -> bool {
        match self.table_schema(table).await {
            Ok(schema) => schema.is_primary_key(column),
            Err(_) => false,
        }
    }

    pub async fn invalidate(&self, table: &str) {
        self.cache.write().await.remove(table);
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cached_tables(&self) -> usize {
        self.cache.read().await.len()
    }
}
