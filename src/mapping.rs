//! Device identifier to account identity mapping store

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Account the identity provider issues tokens for
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountIdentity(String);

impl AccountIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn uid(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountIdentity({})", self.0)
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FingerprintMapping {
    pub fingerprint_id: String,
    pub uid: String,
    pub created_at: NaiveDateTime,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Mapping store unavailable: {0}")]
    Unavailable(String),
}

/// Single-key lookup from device identifier to account
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn lookup(&self, identifier: &str) -> Result<Option<AccountIdentity>, StoreError>;
}

/// Open the SQLite pool and run migrations
pub async fn init_db(database_url: &str) -> Result<SqlitePool, StoreError> {
    let in_memory = database_url.contains(":memory:");

    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Every connection to :memory: is a separate database, so keep exactly one alive
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

pub struct SqliteMappingStore {
    pool: SqlitePool,
}

impl SqliteMappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = init_db(database_url).await?;
        info!("Mapping store ready at {}", database_url);
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create or replace a mapping
    pub async fn upsert(&self, identifier: &str, uid: &str) -> Result<FingerprintMapping, StoreError> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO fingerprints (fingerprint_id, uid, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(fingerprint_id) DO UPDATE SET uid = excluded.uid
            "#,
        )
        .bind(identifier)
        .bind(uid)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(identifier)
            .await?
            .ok_or_else(|| StoreError::Unavailable("mapping vanished after write".to_string()))
    }

    /// Remove a mapping, returning whether one existed
    pub async fn remove(&self, identifier: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM fingerprints WHERE fingerprint_id = ?1")
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, identifier: &str) -> Result<Option<FingerprintMapping>, StoreError> {
        let mapping = sqlx::query_as::<_, FingerprintMapping>(
            r#"
            SELECT fingerprint_id, uid, created_at
            FROM fingerprints
            WHERE fingerprint_id = ?1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(mapping)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn lookup(&self, identifier: &str) -> Result<Option<AccountIdentity>, StoreError> {
        let uid: Option<String> =
            sqlx::query_scalar("SELECT uid FROM fingerprints WHERE fingerprint_id = ?1")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
        debug!(found = uid.is_some(), "Mapping lookup");
        Ok(uid.map(AccountIdentity))
    }
}

/// Mapping store held in memory
#[derive(Default)]
pub struct InMemoryMappingStore {
    mappings: RwLock<HashMap<String, AccountIdentity>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mappings<I, K, V>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mappings = mappings
            .into_iter()
            .map(|(k, v)| (k.into(), AccountIdentity(v.into())))
            .collect();
        Self {
            mappings: RwLock::new(mappings),
        }
    }

    pub async fn insert(&self, identifier: impl Into<String>, uid: impl Into<String>) {
        self.mappings
            .write()
            .await
            .insert(identifier.into(), AccountIdentity(uid.into()));
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn lookup(&self, identifier: &str) -> Result<Option<AccountIdentity>, StoreError> {
        Ok(self.mappings.read().await.get(identifier).cloned())
    }
}
