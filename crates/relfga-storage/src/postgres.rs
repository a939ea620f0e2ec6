//! PostgreSQL storage implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::sqlcommon::{
    next_batch_timestamp, now_micros, pending_changes, tuple_exists_error, tuple_missing_error,
    DEFAULT_QUERY_TIMEOUT_SECS,
};
use crate::traits::{
    validate_store_id, validate_store_name, validate_tuple_key, validate_unique_keys, DataStore,
    ReadChangesFilter, Store, StorePosition, TupleChange, TupleKey, TupleOperation,
};

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Default query timeout in seconds.
    ///
    /// Maximum time to wait for a query to complete. If a query exceeds this
    /// duration, it will be cancelled and return `StorageError::QueryTimeout`.
    pub query_timeout_secs: u64,
    /// Timeout for read operations in seconds.
    ///
    /// Applies to: `get_store`, `list_stores`, `read_changes`.
    /// Falls back to `query_timeout_secs` if not set.
    pub read_timeout_secs: Option<u64>,
    /// Timeout for write operations in seconds.
    ///
    /// Applies to: `create_store`, `delete_store`, `write_tuples`.
    /// Falls back to `query_timeout_secs` if not set.
    pub write_timeout_secs: Option<u64>,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("write_timeout_secs", &self.write_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/relfga".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            read_timeout_secs: None,
            write_timeout_secs: None,
        }
    }
}

/// PostgreSQL implementation of DataStore.
///
/// Stores are soft-deleted (`deleted_at`). The changelog lives in its own
/// append-only table keyed by `(store_id, ulid)` and is read in
/// `(inserted_at, ulid)` order using row-value comparison, so a page always
/// resumes strictly after the last row of the previous one.
pub struct PostgresDataStore {
    pool: PgPool,
    /// Read operation timeout duration.
    read_timeout: std::time::Duration,
    /// Write operation timeout duration.
    write_timeout: std::time::Duration,
}

fn row_to_store(row: &PgRow) -> Store {
    Store {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    }
}

fn row_to_change(row: &PgRow) -> StorageResult<TupleChange> {
    let operation: String = row.get("operation");
    Ok(TupleChange {
        tuple_key: TupleKey {
            object: row.get("object"),
            relation: row.get("relation"),
            user: row.get("user_key"),
        },
        operation: TupleOperation::parse(&operation)?,
        timestamp: row.get("inserted_at"),
        ulid: row.get("ulid"),
    })
}

impl PostgresDataStore {
    /// Creates a new PostgreSQL data store from a connection pool.
    ///
    /// Uses default query timeout of 30 seconds for all operations.
    pub fn new(pool: PgPool) -> Self {
        Self::with_timeout(
            pool,
            std::time::Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        )
    }

    /// Creates a new PostgreSQL data store from a connection pool with custom timeout.
    pub fn with_timeout(pool: PgPool, query_timeout: std::time::Duration) -> Self {
        Self {
            pool,
            read_timeout: query_timeout,
            write_timeout: query_timeout,
        }
    }

    /// Creates a new PostgreSQL data store with the given configuration.
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        let default_timeout = std::time::Duration::from_secs(config.query_timeout_secs);

        Ok(Self {
            pool,
            read_timeout: config
                .read_timeout_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or(default_timeout),
            write_timeout: config
                .write_timeout_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or(default_timeout),
        })
    }

    /// Creates a new PostgreSQL data store from a database URL.
    pub async fn from_url(database_url: &str) -> StorageResult<Self> {
        let config = PostgresConfig {
            database_url: database_url.to_string(),
            ..Default::default()
        };
        Self::from_config(&config).await
    }

    /// Wraps an async operation with a timeout and records metrics.
    ///
    /// # Metrics
    /// - `relfga_storage_query_duration_seconds` - Histogram of query durations
    /// - `relfga_storage_query_timeout_total` - Counter of timeout events
    async fn execute_with_timeout_and_metrics<T, F>(
        &self,
        operation: &str,
        timeout: std::time::Duration,
        future: F,
    ) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(timeout, future).await;
        let duration = start.elapsed().as_secs_f64();

        let (status, final_result) = match result {
            Ok(Ok(value)) => ("success", Ok(value)),
            Ok(Err(e)) => ("error", Err(e)),
            Err(_elapsed) => (
                "timeout",
                Err(StorageError::QueryTimeout {
                    operation: operation.to_string(),
                    timeout,
                }),
            ),
        };

        metrics::histogram!(
            "relfga_storage_query_duration_seconds",
            "operation" => operation.to_string(),
            "backend" => "postgres",
            "status" => status
        )
        .record(duration);

        if status == "timeout" {
            metrics::counter!(
                "relfga_storage_query_timeout_total",
                "operation" => operation.to_string(),
                "backend" => "postgres"
            )
            .increment(1);
        }

        final_result
    }

    /// Executes a read operation with the configured read timeout.
    async fn execute_read<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        self.execute_with_timeout_and_metrics(operation, self.read_timeout, future)
            .await
    }

    /// Executes a write operation with the configured write timeout.
    async fn execute_write<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        self.execute_with_timeout_and_metrics(operation, self.write_timeout, future)
            .await
    }

    /// Runs database migrations to create required tables.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS stores (
                id VARCHAR(128) PRIMARY KEY,
                name VARCHAR(64) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL,
                deleted_at TIMESTAMP WITH TIME ZONE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tuples (
                store_id VARCHAR(128) NOT NULL,
                object_type VARCHAR(256) NOT NULL,
                object VARCHAR(256) NOT NULL,
                relation VARCHAR(50) NOT NULL,
                user_key VARCHAR(512) NOT NULL,
                ulid CHAR(26) NOT NULL,
                inserted_at TIMESTAMP WITH TIME ZONE NOT NULL,
                PRIMARY KEY (store_id, object, relation, user_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS changelog (
                store_id VARCHAR(128) NOT NULL,
                object_type VARCHAR(256) NOT NULL,
                object VARCHAR(256) NOT NULL,
                relation VARCHAR(50) NOT NULL,
                user_key VARCHAR(512) NOT NULL,
                operation VARCHAR(32) NOT NULL,
                ulid CHAR(26) NOT NULL,
                inserted_at TIMESTAMP WITH TIME ZONE NOT NULL,
                PRIMARY KEY (store_id, ulid)
            )
            "#,
            // Listing walks live stores in creation order.
            "CREATE INDEX IF NOT EXISTS idx_stores_created ON stores(created_at, id) WHERE deleted_at IS NULL",
            // ReadChanges seeks by (inserted_at, ulid), optionally per object type.
            "CREATE INDEX IF NOT EXISTS idx_changelog_position ON changelog(store_id, inserted_at, ulid)",
            "CREATE INDEX IF NOT EXISTS idx_changelog_type_position ON changelog(store_id, object_type, inserted_at, ulid)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to run migration: {e}"),
                })?;
        }

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Returns the connection pool for testing or advanced usage.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DataStore for PostgresDataStore {
    #[instrument(skip(self))]
    async fn create_store(&self, id: &str, name: &str) -> StorageResult<Store> {
        // Validate inputs
        validate_store_id(id)?;
        validate_store_name(name)?;

        let now = now_micros();

        self.execute_write("create_store", async {
            sqlx::query(
                r#"
                INSERT INTO stores (id, name, created_at, updated_at)
                VALUES ($1, $2, $3, $3)
                "#,
            )
            .bind(id)
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e {
                    if db_err.is_unique_violation() {
                        return StorageError::StoreAlreadyExists {
                            store_id: id.to_string(),
                        };
                    }
                }
                StorageError::QueryError {
                    message: format!("Failed to create store: {e}"),
                }
            })
        })
        .await?;

        Ok(Store {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn get_store(&self, id: &str) -> StorageResult<Store> {
        let row = self
            .execute_read("get_store", async {
                sqlx::query(
                    r#"
                    SELECT id, name, created_at, updated_at, deleted_at
                    FROM stores
                    WHERE id = $1 AND deleted_at IS NULL
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to get store: {e}"),
                })
            })
            .await?;

        row.as_ref()
            .map(row_to_store)
            .ok_or_else(|| StorageError::StoreNotFound {
                store_id: id.to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn delete_store(&self, id: &str) -> StorageResult<()> {
        let now = now_micros();
        let result = self
            .execute_write("delete_store", async {
                sqlx::query(
                    r#"
                    UPDATE stores
                    SET deleted_at = $2, updated_at = $2
                    WHERE id = $1 AND deleted_at IS NULL
                    "#,
                )
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to delete store: {e}"),
                })
            })
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StoreNotFound {
                store_id: id.to_string(),
            });
        }

        Ok(())
    }

    #[instrument(skip(self, after))]
    async fn list_stores(
        &self,
        after: Option<&StorePosition>,
        page_size: usize,
    ) -> StorageResult<Vec<Store>> {
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "SELECT id, name, created_at, updated_at, deleted_at FROM stores WHERE deleted_at IS NULL",
        );
        if let Some(after) = after {
            builder.push(" AND (created_at, id) > (");
            builder.push_bind(after.created_at);
            builder.push(", ");
            builder.push_bind(after.id.clone());
            builder.push(")");
        }
        builder.push(" ORDER BY created_at, id LIMIT ");
        builder.push_bind(page_size as i64);

        let rows = self
            .execute_read("list_stores", async {
                builder
                    .build()
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| StorageError::QueryError {
                        message: format!("Failed to list stores: {e}"),
                    })
            })
            .await?;

        Ok(rows.iter().map(row_to_store).collect())
    }

    #[instrument(skip(self, writes, deletes), fields(writes = writes.len(), deletes = deletes.len()))]
    async fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<TupleKey>,
        deletes: Vec<TupleKey>,
    ) -> StorageResult<()> {
        // Validate inputs
        validate_store_id(store_id)?;
        for key in writes.iter().chain(&deletes) {
            validate_tuple_key(key)?;
        }
        validate_unique_keys(&writes, &deletes)?;

        // The transaction is rolled back when `tx` is dropped on any early return.
        self.execute_write("write_tuples", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StorageError::TransactionError {
                    message: format!("Failed to begin transaction: {e}"),
                })?;

            // Lock the store row so a concurrent delete_store cannot interleave.
            let live = sqlx::query(
                "SELECT id FROM stores WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            )
            .bind(store_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError {
                message: format!("Failed to check store existence: {e}"),
            })?;
            if live.is_none() {
                return Err(StorageError::StoreNotFound {
                    store_id: store_id.to_string(),
                });
            }

            // Stamped under the row lock, so commit order matches changelog order.
            let last: Option<DateTime<Utc>> =
                sqlx::query_scalar("SELECT MAX(inserted_at) FROM changelog WHERE store_id = $1")
                    .bind(store_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| StorageError::QueryError {
                        message: format!("Failed to read changelog head: {e}"),
                    })?;
            let now = next_batch_timestamp(last);
            let changes = pending_changes(now, &writes, &deletes)?;

            for key in &deletes {
                let result = sqlx::query(
                    "DELETE FROM tuples WHERE store_id = $1 AND object = $2 AND relation = $3 AND user_key = $4",
                )
                .bind(store_id)
                .bind(&key.object)
                .bind(&key.relation)
                .bind(&key.user)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to delete tuple: {e}"),
                })?;
                if result.rows_affected() == 0 {
                    return Err(tuple_missing_error(key));
                }
            }

            for (key, change) in writes.iter().zip(changes.iter().skip(deletes.len())) {
                let result = sqlx::query(
                    r#"
                    INSERT INTO tuples (store_id, object_type, object, relation, user_key, ulid, inserted_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (store_id, object, relation, user_key) DO NOTHING
                    "#,
                )
                .bind(store_id)
                .bind(key.object_type())
                .bind(&key.object)
                .bind(&key.relation)
                .bind(&key.user)
                .bind(&change.ulid)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to write tuple: {e}"),
                })?;
                if result.rows_affected() == 0 {
                    return Err(tuple_exists_error(key));
                }
            }

            for change in &changes {
                sqlx::query(
                    r#"
                    INSERT INTO changelog (store_id, object_type, object, relation, user_key, operation, ulid, inserted_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(store_id)
                .bind(change.tuple_key.object_type())
                .bind(&change.tuple_key.object)
                .bind(&change.tuple_key.relation)
                .bind(&change.tuple_key.user)
                .bind(change.operation.as_str())
                .bind(&change.ulid)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("Failed to append changelog: {e}"),
                })?;
            }

            tx.commit()
                .await
                .map_err(|e| StorageError::TransactionError {
                    message: format!("Failed to commit transaction: {e}"),
                })
        })
        .await
    }

    #[instrument(skip(self, filter))]
    async fn read_changes(
        &self,
        store_id: &str,
        filter: &ReadChangesFilter,
        page_size: usize,
    ) -> StorageResult<Vec<TupleChange>> {
        // Check store exists
        self.get_store(store_id).await?;

        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "SELECT object, relation, user_key, operation, ulid, inserted_at FROM changelog WHERE store_id = ",
        );
        builder.push_bind(store_id.to_string());
        if let Some(ref object_type) = filter.object_type {
            builder.push(" AND object_type = ");
            builder.push_bind(object_type.clone());
        }
        if let Some(ref after) = filter.after {
            builder.push(" AND (inserted_at, ulid) > (");
            builder.push_bind(after.timestamp);
            builder.push(", ");
            builder.push_bind(after.ulid.clone());
            builder.push(")");
        }
        if let Some(until) = filter.until {
            builder.push(" AND inserted_at <= ");
            builder.push_bind::<DateTime<Utc>>(until);
        }
        builder.push(" ORDER BY inserted_at, ulid LIMIT ");
        builder.push_bind(page_size as i64);

        let rows = self
            .execute_read("read_changes", async {
                builder
                    .build()
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| StorageError::QueryError {
                        message: format!("Failed to read changes: {e}"),
                    })
            })
            .await?;

        rows.iter().map(row_to_change).collect()
    }
}

impl std::fmt::Debug for PostgresDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDataStore")
            .field("pool", &"PgPool")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
