use super::types::is_lock_conflict;
use crate::config::TargetConfig;
use crate::schema::{CatalogColumn, CatalogSource};
use crate::sql::{Dialect, Statement};
use crate::writer::Transactor;
use crate::{Error, Result};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use tracing::{debug, error, info, warn};

/// Columns of one table with their primary-key position.
///
/// Enum and array columns report `USER-DEFINED`/`ARRAY` as `data_type`;
/// the underlying type name is taken from `udt_name` so it can be used
/// in casts.
const CATALOG_QUERY: &str = r#"
SELECT c.column_name::text AS column_name,
       CASE WHEN c.data_type IN ('USER-DEFINED', 'ARRAY')
            THEN c.udt_name::text
            ELSE c.data_type::text
       END AS data_type,
       (c.is_nullable = 'YES') AS nullable,
       k.ordinal_position::int8 AS key_position
FROM information_schema.columns c
LEFT JOIN information_schema.table_constraints tc
       ON tc.table_schema = c.table_schema
      AND tc.table_name = c.table_name
      AND tc.constraint_type = 'PRIMARY KEY'
LEFT JOIN information_schema.key_column_usage k
       ON k.constraint_schema = tc.constraint_schema
      AND k.constraint_name = tc.constraint_name
      AND k.table_name = c.table_name
      AND k.column_name = c.column_name
WHERE c.table_schema = $1
  AND c.table_name = $2
ORDER BY c.ordinal_position
"#;

/// PostgreSQL target over a `deadpool-postgres` pool.
pub struct PostgresTarget {
    pool: Pool,
    schema: String,
}

impl PostgresTarget {
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port())
            .user(&config.username)
            .password(&config.password)
            .dbname(&config.database)
            .application_name("cdc-sink")
            .connect_timeout(config.connect_timeout());

        let mut mgr_config = ManagerConfig::default();
        mgr_config.recycling_method = RecyclingMethod::Fast;
        let manager = Manager::from_config(pg_config, NoTls, mgr_config);

        let pool = Pool::builder(manager)
            .max_size(config.max_connections as usize)
            .build()
            .map_err(|e| Error::Connection(format!("pool creation failed: {}", e)))?;

        let target = Self::from_pool(pool, config.schema.clone());
        target.ping().await?;

        info!(
            host = %config.host,
            port = config.port(),
            database = %config.database,
            schema = %config.schema,
            "Connected to PostgreSQL target"
        );
        Ok(target)
    }

    pub fn from_pool(pool: Pool, schema: String) -> Self {
        Self { pool, schema }
    }
}

#[async_trait]
impl Transactor for PostgresTarget {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute_once(&self, statements: &[Statement]) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        for (index, stmt) in statements.iter().enumerate() {
            let params: Vec<&(dyn ToSql + Sync)> = stmt
                .args
                .iter()
                .map(|arg| arg as &(dyn ToSql + Sync))
                .collect();

            let result = match tx.prepare_cached(&stmt.sql).await {
                Ok(prepared) => tx.execute(&prepared, &params).await,
                Err(e) => Err(e),
            };

            if let Err(err) = result {
                error!(index, table = %stmt.table, op = %stmt.op, error = %err, "Batch statement failed");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(Error::statement(stmt.op.as_str(), &stmt.table, index, err.into()));
            }
        }

        tx.commit().await?;
        debug!(count = statements.len(), "PostgreSQL batch committed");
        Ok(())
    }

    fn is_lock_conflict(&self, err: &Error) -> bool {
        is_lock_conflict(err)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
        info!("PostgreSQL target closed");
    }
}

#[async_trait]
impl CatalogSource for PostgresTarget {
    async fn load_columns(&self, table: &str) -> Result<Vec<CatalogColumn>> {
        let client = self.pool.get().await?;
        // Unquoted identifiers are stored lower-cased.
        let table = table.to_lowercase();
        let rows = client.query(CATALOG_QUERY, &[&self.schema, &table]).await?;

        rows.iter()
            .map(|row| -> Result<CatalogColumn> {
                Ok(CatalogColumn {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    nullable: row.try_get("nullable")?,
                    key_position: row.try_get("key_position")?,
                })
            })
            .collect()
    }
}
