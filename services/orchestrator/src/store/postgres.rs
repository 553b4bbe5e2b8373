//! Postgres-backed record store.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gsfleet_id::ServerId;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use super::{ServerStore, StoreError, StoreResult};
use crate::model::{GameServerState, ServerRecord, ServerStatus};

const COLUMNS: &str = "id, owner_id, game_type, display_name, status, external_id, \
    cluster_state, address, port, error_message, hourly_cost, created_at, stopped_at, \
    cleanup_at, last_status_sync";

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/gsfleet".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/gsfleet".to_string());

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..Default::default()
        }
    }
}

/// A [`ServerStore`] on the `game_server_records` table.
#[derive(Clone)]
pub struct PgServerStore {
    pool: PgPool,
}

impl PgServerStore {
    /// Connect a new pool.
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations, loaded from disk at runtime.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations");

        let candidates = [
            PathBuf::from("./migrations"),
            PathBuf::from("services/orchestrator/migrations"),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(StoreError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Check the database is reachable.
    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        binds: &[&str],
    ) -> StoreResult<Option<ServerRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM game_server_records WHERE {clause} \
             ORDER BY created_at ASC LIMIT 1"
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        query
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(record_from_row)
            .transpose()
    }
}

fn expect_updated(id: ServerId, rows_affected: u64) -> StoreResult<()> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

fn record_from_row(row: &PgRow) -> StoreResult<ServerRecord> {
    let id: String = row.try_get("id")?;
    let id = ServerId::parse(&id).map_err(|e| StoreError::Corrupt(format!("id {id}: {e}")))?;

    let port = row
        .try_get::<Option<i32>, _>("port")?
        .map(|port| {
            u16::try_from(port).map_err(|_| StoreError::Corrupt(format!("{id}: port {port}")))
        })
        .transpose()?;

    Ok(ServerRecord {
        id,
        owner_id: row.try_get("owner_id")?,
        game_type: row.try_get("game_type")?,
        display_name: row.try_get("display_name")?,
        status: ServerStatus::parse(row.try_get::<&str, _>("status")?),
        external_id: row.try_get("external_id")?,
        cluster_state: row
            .try_get::<Option<&str>, _>("cluster_state")?
            .map(GameServerState::parse),
        address: row.try_get("address")?,
        port,
        error_message: row.try_get("error_message")?,
        hourly_cost: row.try_get("hourly_cost")?,
        created_at: row.try_get("created_at")?,
        stopped_at: row.try_get("stopped_at")?,
        cleanup_at: row.try_get("cleanup_at")?,
        last_status_sync: row.try_get("last_status_sync")?,
    })
}

#[async_trait]
impl ServerStore for PgServerStore {
    async fn get_by_id(&self, id: ServerId) -> StoreResult<Option<ServerRecord>> {
        let id = id.to_string();
        self.fetch_one_where("id = $1", &[&id]).await
    }

    async fn find_by_name(
        &self,
        owner_id: &str,
        display_name: &str,
    ) -> StoreResult<Option<ServerRecord>> {
        self.fetch_one_where("owner_id = $1 AND display_name = $2", &[owner_id, display_name])
            .await
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ServerRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM game_server_records WHERE owner_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn save(&self, record: &ServerRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO game_server_records (
                id, owner_id, game_type, display_name, status, external_id,
                cluster_state, address, port, error_message, hourly_cost,
                created_at, stopped_at, cleanup_at, last_status_sync
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                game_type = EXCLUDED.game_type,
                display_name = EXCLUDED.display_name,
                status = EXCLUDED.status,
                external_id = EXCLUDED.external_id,
                cluster_state = EXCLUDED.cluster_state,
                address = EXCLUDED.address,
                port = EXCLUDED.port,
                error_message = EXCLUDED.error_message,
                hourly_cost = EXCLUDED.hourly_cost,
                stopped_at = EXCLUDED.stopped_at,
                cleanup_at = EXCLUDED.cleanup_at,
                last_status_sync = EXCLUDED.last_status_sync
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.owner_id)
        .bind(&record.game_type)
        .bind(&record.display_name)
        .bind(record.status.as_str())
        .bind(&record.external_id)
        .bind(record.cluster_state.as_ref().map(GameServerState::as_str))
        .bind(&record.address)
        .bind(record.port.map(i32::from))
        .bind(&record.error_message)
        .bind(record.hourly_cost)
        .bind(record.created_at)
        .bind(record.stopped_at)
        .bind(record.cleanup_at)
        .bind(record.last_status_sync)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateName {
                owner_id: record.owner_id.clone(),
                display_name: record.display_name.clone(),
            },
            _ => StoreError::Query(e),
        })?;

        Ok(())
    }

    async fn update_status(
        &self,
        id: ServerId,
        status: &ServerStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE game_server_records
            SET status = $2,
                error_message = $3,
                stopped_at = CASE WHEN $2 = 'stopped' THEN now() ELSE stopped_at END
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        expect_updated(id, result.rows_affected())
    }

    async fn update_ready(&self, id: ServerId, address: &str, port: u16) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE game_server_records
            SET status = 'ready', address = $2, port = $3, error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(address)
        .bind(i32::from(port))
        .execute(&self.pool)
        .await?;

        expect_updated(id, result.rows_affected())
    }

    async fn update_external_id(
        &self,
        id: ServerId,
        external_id: &str,
        raw_state: &GameServerState,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE game_server_records SET external_id = $2, cluster_state = $3 WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(external_id)
        .bind(raw_state.as_str())
        .execute(&self.pool)
        .await?;

        expect_updated(id, result.rows_affected())
    }

    async fn record_cluster_state(
        &self,
        id: ServerId,
        raw_state: &GameServerState,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE game_server_records SET cluster_state = $2, last_status_sync = $3 WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(raw_state.as_str())
        .bind(synced_at)
        .execute(&self.pool)
        .await?;

        expect_updated(id, result.rows_affected())
    }

    async fn schedule_cleanup(&self, id: ServerId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE game_server_records SET cleanup_at = $2 WHERE id = $1")
            .bind(id.to_string())
            .bind(at)
            .execute(&self.pool)
            .await?;

        expect_updated(id, result.rows_affected())
    }

    async fn list_stopped_eligible_for_cleanup(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ServerRecord>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM game_server_records
            WHERE status = 'stopped'
              AND stopped_at IS NOT NULL
              AND (cleanup_at IS NULL OR cleanup_at <= $1)
            ORDER BY stopped_at ASC
            "#
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn delete(&self, id: ServerId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM game_server_records WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
