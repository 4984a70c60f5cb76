//! Seeds the singleton `auth_config` row from `INITIAL_PASSWORD` on first
//! start (§6). The login flow that row guards belongs to the out-of-scope
//! admin UI; this module only owns persistence-side seeding so the table is
//! never left empty when an operator relies on the env var.

use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::error::AppError;

const DEFAULT_PASSWORD: &str = "changeme";

fn random_hex(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Inserts the `auth_config` singleton if it doesn't already exist. No-op
/// on every subsequent start, so re-running this never resets an operator's
/// password.
pub async fn seed_if_missing(pool: &SqlitePool, initial_password: Option<&str>) -> Result<(), AppError> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM auth_config WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let password = initial_password.unwrap_or(DEFAULT_PASSWORD);
    let salt = random_hex(16);
    let password_hash = hash_password(password, &salt);
    let session_secret = random_hex(32);

    sqlx::query(
        "INSERT INTO auth_config (id, password_hash, salt, session_secret) VALUES (1, ?, ?, ?)",
    )
    .bind(password_hash)
    .bind(salt)
    .bind(session_secret)
    .execute(pool)
    .await?;

    tracing::info!("seeded admin auth row on first start");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_once() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();

        seed_if_missing(&pool, Some("hunter2")).await.unwrap();
        let row: (String,) = sqlx::query_as("SELECT password_hash FROM auth_config WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();

        seed_if_missing(&pool, Some("different")).await.unwrap();
        let row2: (String,) = sqlx::query_as("SELECT password_hash FROM auth_config WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, row2.0);
    }

    #[tokio::test]
    async fn defaults_when_no_env_password() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        seed_if_missing(&pool, None).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM auth_config")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }
}
