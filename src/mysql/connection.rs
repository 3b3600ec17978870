use super::types::{bind_value, is_lock_conflict};
use crate::config::TargetConfig;
use crate::schema::{CatalogColumn, CatalogSource};
use crate::sql::{Dialect, Statement};
use crate::writer::Transactor;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::{debug, error, info, warn};

const CATALOG_QUERY: &str = r#"
SELECT CAST(c.COLUMN_NAME AS CHAR) AS column_name,
       CAST(c.DATA_TYPE AS CHAR) AS data_type,
       CAST(c.IS_NULLABLE AS CHAR) AS is_nullable,
       CAST(k.ORDINAL_POSITION AS SIGNED) AS key_position
FROM information_schema.COLUMNS c
LEFT JOIN information_schema.KEY_COLUMN_USAGE k
       ON k.TABLE_SCHEMA = c.TABLE_SCHEMA
      AND k.TABLE_NAME = c.TABLE_NAME
      AND k.COLUMN_NAME = c.COLUMN_NAME
      AND k.CONSTRAINT_NAME = 'PRIMARY'
WHERE c.TABLE_SCHEMA = ?
  AND c.TABLE_NAME = ?
ORDER BY c.ORDINAL_POSITION
"#;

/// MySQL target: catalog introspection and batch transactions over a `sqlx` pool.
pub struct MySqlTarget {
    pool: MySqlPool,
    database: String,
}

impl MySqlTarget {
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(&config.mysql_url())
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to MySQL: {}", e)))?;

        info!(
            host = %config.host,
            port = config.port(),
            database = %config.database,
            "Connected to MySQL target"
        );

        Ok(Self::from_pool(pool, config.database.clone()))
    }

    pub fn from_pool(pool: MySqlPool, database: String) -> Self {
        Self { pool, database }
    }
}

#[async_trait]
impl Transactor for MySqlTarget {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn execute_once(&self, statements: &[Statement]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (index, stmt) in statements.iter().enumerate() {
            let query = stmt
                .args
                .iter()
                .fold(sqlx::query(&stmt.sql), |query, arg| bind_value(query, arg));

            if let Err(err) = query.execute(&mut *tx).await {
                error!(index, table = %stmt.table, op = %stmt.op, error = %err, "Batch statement failed");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(Error::statement(stmt.op.as_str(), &stmt.table, index, err.into()));
            }
        }

        tx.commit().await?;
        debug!(count = statements.len(), "MySQL batch committed");
        Ok(())
    }

    fn is_lock_conflict(&self, err: &Error) -> bool {
        is_lock_conflict(err)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("MySQL target closed");
    }
}

#[async_trait]
impl CatalogSource for MySqlTarget {
    async fn load_columns(&self, table: &str) -> Result<Vec<CatalogColumn>> {
        let rows = sqlx::query(CATALOG_QUERY)
            .bind(&self.database)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<CatalogColumn> {
                let nullable: String = row.try_get("is_nullable")?;
                Ok(CatalogColumn {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                    key_position: row.try_get("key_position")?,
                })
            })
            .collect()
    }
}
