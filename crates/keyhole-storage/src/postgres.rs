use async_trait::async_trait;
use futures::TryStreamExt;
use keyhole_core::error::{Result, StorageError};
use keyhole_core::{KeyValueStore, OwnerId, Record, ScanFilter, ShortCode, StoreOutcome, Visitor};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Row};
use tracing::{debug, error, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// PostgreSQL implementation of the storage contract.
///
/// Soft delete is implemented with `is_deleted`. Reads only return live
/// records. The primary key on `short_url` covers tombstoned rows too, so a
/// deleted code is never reused.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a store from an existing, already migrated connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool and brings the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to connect to postgres");
                map_sqlx_error(e)
            })?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Applies pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            error!(error = %e, "failed to run migrations");
            StorageError::Migration(e.to_string())
        })?;
        info!("database schema is up to date");
        Ok(())
    }

    async fn insert(
        &self,
        code: &ShortCode,
        original_url: &str,
        owner: &OwnerId,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shortener (short_url, original_url, user_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(code.as_str())
        .bind(original_url)
        .bind(owner.as_str())
        .execute(&self.pool)
        .await
        .map(|_| ())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn row_to_record(row: &PgRow) -> Result<Record> {
    let short_url: String = row.try_get("short_url").map_err(map_sqlx_error)?;
    let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
    let user_id: String = row.try_get("user_id").map_err(map_sqlx_error)?;
    let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;

    Ok(Record {
        short_code: ShortCode::new_unchecked(short_url),
        original_url,
        owner_id: OwnerId::new(user_id),
        deleted: is_deleted,
    })
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, code: &ShortCode) -> Result<Option<Record>> {
        let row = sqlx::query(
            r#"
            SELECT short_url, original_url, user_id, is_deleted
            FROM shortener
            WHERE short_url = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(code = %code, error = %e, "failed to load record");
            map_sqlx_error(e)
        })?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn load(&self, code: &ShortCode) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT original_url
            FROM shortener
            WHERE short_url = $1
              AND NOT is_deleted
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(code = %code, error = %e, "failed to load url");
            map_sqlx_error(e)
        })
    }

    async fn store_if_absent(
        &self,
        code: &ShortCode,
        original_url: &str,
        owner: &OwnerId,
    ) -> Result<StoreOutcome> {
        match self.insert(code, original_url, owner).await {
            Ok(()) => Ok(StoreOutcome::Created),
            Err(err) if is_unique_violation(&err) => {
                // Rows are never removed, so the winner's row is still there.
                let existing = self.get(code).await?.ok_or_else(|| {
                    StorageError::InvalidData(format!(
                        "short code {code} violated uniqueness but cannot be read back"
                    ))
                })?;
                debug!(code = %code, "short code already exists");
                Ok(StoreOutcome::Existing(existing))
            }
            Err(err) => {
                error!(code = %code, error = %err, "failed to insert record");
                Err(map_sqlx_error(err))
            }
        }
    }

    async fn store(&self, code: &ShortCode, original_url: &str, owner: &OwnerId) -> Result<()> {
        match self.insert(code, original_url, owner).await {
            Ok(()) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                info!(code = %code, url = %original_url, "url already exists");
                Ok(())
            }
            Err(err) => {
                error!(code = %code, error = %err, "failed to insert record");
                Err(map_sqlx_error(err))
            }
        }
    }

    async fn scan_filtered(&self, filter: &ScanFilter, visitor: &mut Visitor<'_>) -> Result<()> {
        let mut rows = sqlx::query(
            r#"
            SELECT short_url, original_url, user_id, is_deleted
            FROM shortener
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2 OR NOT is_deleted)
            "#,
        )
        .bind(filter.owner.as_ref().map(OwnerId::as_str))
        .bind(filter.include_deleted)
        .fetch(&self.pool);

        while let Some(row) = rows.try_next().await.map_err(|e| {
            error!(error = %e, "failed to scan records");
            map_sqlx_error(e)
        })? {
            let record = row_to_record(&row)?;
            if !visitor(&record) {
                break;
            }
        }

        Ok(())
    }

    async fn delete(&self, codes: &[ShortCode]) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = codes.iter().map(|code| code.as_str().to_owned()).collect();

        let result = sqlx::query(
            r#"
            UPDATE shortener
            SET is_deleted = TRUE
            WHERE short_url = ANY($1)
              AND NOT is_deleted
            "#,
        )
        .bind(&keys)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to mark records as deleted");
            map_sqlx_error(e)
        })?;

        debug!(
            requested = codes.len(),
            deleted = result.rows_affected(),
            "records marked as deleted"
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        conn.ping().await.map_err(map_sqlx_error)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("postgres pool closed");
        Ok(())
    }
}
