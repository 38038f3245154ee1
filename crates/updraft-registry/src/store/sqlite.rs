//! SQLite storage implementation

use super::traits::*;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;
use updraft_types::{
    ArtifactId, ArtifactKey, ArtifactKind, ArtifactRecord, ArtifactRef, ServerName, ServerRecord,
    VersionId,
};

/// SQLite-backed storage
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to SQLite (creating the database file if needed) and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Single-connection in-memory database, for tests
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::new("sqlite::memory:", 1, 5).await
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                latest TEXT,
                latest_ref TEXT,
                approved TEXT,
                approved_ref TEXT,
                fetched TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                name TEXT PRIMARY KEY,
                configured_plugins TEXT NOT NULL,
                deployed_runtime TEXT,
                deployed_plugins TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
        serde_json::to_string(value)
            .map_err(|e| StorageError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, StorageError> {
        serde_json::from_str(value)
            .map_err(|e| StorageError::InvalidData(format!("json deserialize error: {}", e)))
    }

    fn opt_ref_to_json(value: &Option<ArtifactRef>) -> Result<Option<String>, StorageError> {
        value.as_ref().map(Self::to_json).transpose()
    }

    fn opt_ref_from_json(value: Option<String>) -> Result<Option<ArtifactRef>, StorageError> {
        value.as_deref().map(Self::from_json).transpose()
    }

    fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StorageError>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(column)
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    fn artifact_from_row(row: &SqliteRow) -> Result<ArtifactRecord, StorageError> {
        let kind: String = Self::get(row, "kind")?;
        let kind = ArtifactKind::from_str(&kind)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let key: String = Self::get(row, "key")?;

        Ok(ArtifactRecord {
            id: ArtifactId::new(kind, key),
            latest: Self::get::<Option<String>>(row, "latest")?.map(VersionId::from),
            latest_ref: Self::opt_ref_from_json(Self::get(row, "latest_ref")?)?,
            approved: Self::get::<Option<String>>(row, "approved")?.map(VersionId::from),
            approved_ref: Self::opt_ref_from_json(Self::get(row, "approved_ref")?)?,
            fetched: Self::get::<Option<String>>(row, "fetched")?.map(VersionId::from),
            updated_at: Self::get::<DateTime<Utc>>(row, "updated_at")?,
        })
    }

    fn server_from_row(row: &SqliteRow) -> Result<ServerRecord, StorageError> {
        let name: String = Self::get(row, "name")?;
        let configured: String = Self::get(row, "configured_plugins")?;
        let deployed: String = Self::get(row, "deployed_plugins")?;

        Ok(ServerRecord {
            name: ServerName::from(name),
            configured_plugins: Self::from_json::<BTreeSet<ArtifactKey>>(&configured)?,
            deployed_runtime: Self::get::<Option<String>>(row, "deployed_runtime")?
                .map(VersionId::from),
            deployed_plugins: Self::from_json::<BTreeMap<ArtifactKey, VersionId>>(&deployed)?,
            updated_at: Self::get::<DateTime<Utc>>(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn load_artifact(&self, id: &ArtifactId) -> StoreResult<Option<ArtifactRecord>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE kind = ?1 AND key = ?2")
            .bind(id.kind.as_str())
            .bind(id.key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        row.as_ref().map(Self::artifact_from_row).transpose()
    }

    async fn save_artifact(&self, record: &ArtifactRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (kind, key, latest, latest_ref, approved, approved_ref, fetched, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (kind, key) DO UPDATE SET
                latest = excluded.latest,
                latest_ref = excluded.latest_ref,
                approved = excluded.approved,
                approved_ref = excluded.approved_ref,
                fetched = excluded.fetched,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id.kind.as_str())
        .bind(record.id.key.as_str())
        .bind(record.latest.as_ref().map(|v| v.as_str().to_string()))
        .bind(Self::opt_ref_to_json(&record.latest_ref)?)
        .bind(record.approved.as_ref().map(|v| v.as_str().to_string()))
        .bind(Self::opt_ref_to_json(&record.approved_ref)?)
        .bind(record.fetched.as_ref().map(|v| v.as_str().to_string()))
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_artifacts(&self) -> StoreResult<Vec<ArtifactRecord>> {
        let rows = sqlx::query("SELECT * FROM artifacts ORDER BY kind, key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(Self::artifact_from_row).collect()
    }
}

#[async_trait]
impl ServerStore for SqliteStore {
    async fn load_server(&self, name: &ServerName) -> StoreResult<Option<ServerRecord>> {
        let row = sqlx::query("SELECT * FROM servers WHERE name = ?1")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        row.as_ref().map(Self::server_from_row).transpose()
    }

    async fn save_server(&self, record: &ServerRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO servers (name, configured_plugins, deployed_runtime, deployed_plugins, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (name) DO UPDATE SET
                configured_plugins = excluded.configured_plugins,
                deployed_runtime = excluded.deployed_runtime,
                deployed_plugins = excluded.deployed_plugins,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.name.as_str())
        .bind(Self::to_json(&record.configured_plugins)?)
        .bind(record.deployed_runtime.as_ref().map(|v| v.as_str().to_string()))
        .bind(Self::to_json(&record.deployed_plugins)?)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_servers(&self) -> StoreResult<Vec<ServerRecord>> {
        let rows = sqlx::query("SELECT * FROM servers ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(Self::server_from_row).collect()
    }
}

impl RegistryStore for SqliteStore {}
