//! Config Service: CRUD over `upstream_configs`, secret encryption, and the
//! atomically-published snapshot the proxy runtime reads.
//!
//! Grounded in the teacher's `config_db.rs` (row loading, `FromRow` structs)
//! and `handlers/config_api.rs` (validation, masked-secret listing,
//! UNIQUE-violation friendly mapping), collapsed from a three-table
//! api-keys/routing/providers model down to this spec's single flat
//! `upstream_configs` table.

use arc_swap::ArcSwap;
use chrono::Utc;
use serde::Deserialize;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use crate::crypto::{mask_secret, EncryptionKey};
use crate::domain::{ConfigSnapshot, ServiceType, UpstreamConfig};
use crate::error::AppError;

#[derive(FromRow)]
struct ConfigRow {
    id: i64,
    service_type: String,
    public_name: String,
    model_name: String,
    api_key_ciphertext: Option<Vec<u8>>,
    api_key_nonce: Option<Vec<u8>>,
    base_url: String,
    is_enabled: i64,
    available_on_general: i64,
    available_on_special: i64,
    notes: String,
    created_at: String,
    updated_at: String,
}

impl ConfigRow {
    fn into_domain(self, key: &EncryptionKey, reveal: bool) -> Result<UpstreamConfig, AppError> {
        let api_key = match (self.api_key_ciphertext, self.api_key_nonce) {
            (Some(ct), Some(nonce)) if reveal => Some(key.decrypt(&ct, &nonce)?),
            (Some(ct), Some(nonce)) => {
                let plain = key.decrypt(&ct, &nonce)?;
                Some(mask_secret(&plain))
            }
            _ => None,
        };

        Ok(UpstreamConfig {
            id: self.id,
            service_type: ServiceType::from_str(&self.service_type)
                .map_err(AppError::ConfigError)?,
            public_name: self.public_name,
            model_name: self.model_name,
            api_key,
            base_url: self.base_url,
            is_enabled: self.is_enabled != 0,
            available_on_general: self.available_on_general != 0,
            available_on_special: self.available_on_special != 0,
            notes: self.notes,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: chrono::DateTime::parse_from_rfc3339(&self.updated_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Fields accepted when creating or updating an upstream config. `api_key`
/// is `None` on update to mean "leave unchanged".
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigPatch {
    pub service_type: String,
    pub public_name: String,
    pub model_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default = "default_true")]
    pub available_on_general: bool,
    #[serde(default = "default_true")]
    pub available_on_special: bool,
    #[serde(default)]
    pub notes: String,
}

fn default_true() -> bool {
    true
}

fn validate(patch: &ConfigPatch) -> Result<ServiceType, AppError> {
    if patch.public_name.trim().is_empty() {
        return Err(AppError::ConfigError("public_name must not be empty".to_string()));
    }
    if !patch
        .public_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ':')
    {
        return Err(AppError::ConfigError(
            "public_name may only contain letters, digits, '-', '_', '.', ':'".to_string(),
        ));
    }
    let service_type =
        ServiceType::from_str(&patch.service_type).map_err(AppError::ConfigError)?;
    if patch.is_enabled && !patch.available_on_general && !patch.available_on_special {
        return Err(AppError::ConfigError(
            "an enabled config must be available on at least one endpoint".to_string(),
        ));
    }
    Ok(service_type)
}

pub struct ReloadReport {
    pub loaded: usize,
    pub failed: Vec<(i64, String)>,
}

/// Owns the database pool, the encryption key, and the published snapshot.
/// Cloned cheaply (internally `Arc`-backed); every clone shares one
/// snapshot and one pool.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
    key: Arc<EncryptionKey>,
    snapshot: Arc<ArcSwap<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool, key: EncryptionKey) -> Self {
        Self {
            pool,
            key: Arc::new(key),
            snapshot: Arc::new(ArcSwap::from_pointee(ConfigSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    pub async fn create(&self, patch: ConfigPatch) -> Result<i64, AppError> {
        let service_type = validate(&patch)?;
        let (ciphertext, nonce) = match &patch.api_key {
            Some(k) if !k.is_empty() => {
                let (ct, n) = self.key.encrypt(k)?;
                (Some(ct), Some(n))
            }
            _ => (None, None),
        };
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO upstream_configs \
             (service_type, public_name, model_name, api_key_ciphertext, api_key_nonce, \
              base_url, is_enabled, available_on_general, available_on_special, notes, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(service_type.as_str())
        .bind(&patch.public_name)
        .bind(&patch.model_name)
        .bind(&ciphertext)
        .bind(&nonce)
        .bind(&patch.base_url)
        .bind(patch.is_enabled as i64)
        .bind(patch.available_on_general as i64)
        .bind(patch.available_on_special as i64)
        .bind(&patch.notes)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        let id = result.last_insert_rowid();
        self.reload().await?;
        Ok(id)
    }

    pub async fn update(&self, id: i64, patch: ConfigPatch) -> Result<UpstreamConfig, AppError> {
        let service_type = validate(&patch)?;
        let now = Utc::now().to_rfc3339();

        if let Some(new_key) = &patch.api_key {
            if !new_key.is_empty() {
                let (ct, n) = self.key.encrypt(new_key)?;
                sqlx::query(
                    "UPDATE upstream_configs SET api_key_ciphertext = ?, api_key_nonce = ? WHERE id = ?",
                )
                .bind(&ct)
                .bind(&n)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
        }

        sqlx::query(
            "UPDATE upstream_configs SET service_type = ?, public_name = ?, model_name = ?, \
             base_url = ?, is_enabled = ?, available_on_general = ?, available_on_special = ?, \
             notes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(service_type.as_str())
        .bind(&patch.public_name)
        .bind(&patch.model_name)
        .bind(&patch.base_url)
        .bind(patch.is_enabled as i64)
        .bind(patch.available_on_general as i64)
        .bind(patch.available_on_special as i64)
        .bind(&patch.notes)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        self.reload().await?;
        self.get(id, true).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM health_status WHERE config_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM upstream_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.reload().await?;
        Ok(())
    }

    pub async fn get(&self, id: i64, reveal: bool) -> Result<UpstreamConfig, AppError> {
        let row: ConfigRow = sqlx::query_as("SELECT * FROM upstream_configs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row.into_domain(&self.key, reveal)
    }

    pub async fn list(&self) -> Result<Vec<UpstreamConfig>, AppError> {
        let rows: Vec<ConfigRow> =
            sqlx::query_as("SELECT * FROM upstream_configs ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|r| r.into_domain(&self.key, false))
            .collect()
    }

    /// Re-validates every enabled row and atomically publishes a new
    /// snapshot. A row that fails to parse is reported but does not block
    /// the rest of the set from loading.
    pub async fn reload(&self) -> Result<ReloadReport, AppError> {
        let rows: Vec<ConfigRow> =
            sqlx::query_as("SELECT * FROM upstream_configs WHERE is_enabled = 1")
                .fetch_all(&self.pool)
                .await?;

        let mut loaded = Vec::new();
        let mut failed = Vec::new();
        for row in rows {
            let id = row.id;
            match row.into_domain(&self.key, true) {
                Ok(cfg) => loaded.push(cfg),
                Err(e) => failed.push((id, e.to_string())),
            }
        }

        let report = ReloadReport {
            loaded: loaded.len(),
            failed,
        };
        self.snapshot.store(Arc::new(ConfigSnapshot::build(loaded)));
        tracing::info!(loaded = report.loaded, failed = report.failed.len(), "config snapshot reloaded");
        Ok(report)
    }
}

fn map_unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.message().contains("UNIQUE constraint failed") {
            return AppError::ConfigError(
                "a config with this public_name already exists".to_string(),
            );
        }
    }
    AppError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (ConfigStore, tempfile::TempDir) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let dir = tempdir().unwrap();
        let key = EncryptionKey::load_or_create(&dir.path().join(".encryption_key")).unwrap();
        (ConfigStore::new(pool, key), dir)
    }

    fn patch(public_name: &str) -> ConfigPatch {
        ConfigPatch {
            service_type: "openai".to_string(),
            public_name: public_name.to_string(),
            model_name: "gpt-4-0613".to_string(),
            api_key: Some("sk-test-key-0123456789".to_string()),
            base_url: String::new(),
            is_enabled: true,
            available_on_general: true,
            available_on_special: true,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips_secret() {
        let (store, _dir) = store().await;
        let id = store.create(patch("gpt-4")).await.unwrap();
        let cfg = store.get(id, true).await.unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("sk-test-key-0123456789"));

        let masked = store.get(id, false).await.unwrap();
        assert_ne!(masked.api_key.as_deref(), Some("sk-test-key-0123456789"));
    }

    #[tokio::test]
    async fn duplicate_public_name_rejected() {
        let (store, _dir) = store().await;
        store.create(patch("gpt-4")).await.unwrap();
        let err = store.create(patch("gpt-4")).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn enabled_requires_one_visible_endpoint() {
        let (store, _dir) = store().await;
        let mut p = patch("gpt-4");
        p.available_on_general = false;
        p.available_on_special = false;
        let err = store.create(p).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn create_publishes_snapshot() {
        let (store, _dir) = store().await;
        assert!(store.snapshot().is_empty());
        store.create(patch("gpt-4")).await.unwrap();
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_from_snapshot() {
        let (store, _dir) = store().await;
        let id = store.create(patch("gpt-4")).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(store.snapshot().is_empty());
    }
}
