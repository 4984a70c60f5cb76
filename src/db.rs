//! Database bootstrap: connection pool with WAL enabled, and migration
//! runner. Grounded in the teacher's `server.rs` pool setup.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::error::AppError;

pub async fn connect(database_path: &Path) -> Result<SqlitePool, AppError> {
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite://{}",
        database_path.display()
    ))?
    .create_if_missing(true)
    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
    .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Runs pending migrations inside a single transaction per step, bumping
/// `schema.version` atomically. A failed migration rolls back and the
/// caller is expected to exit with the migration-failure exit code.
pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM upstream_configs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn endpoint_visibility_columns_exist() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO upstream_configs (service_type, public_name, model_name, base_url, created_at, updated_at) \
             VALUES ('openai', 'gpt-4', 'gpt-4-0613', '', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let row: (i64, i64) = sqlx::query_as(
            "SELECT available_on_general, available_on_special FROM upstream_configs WHERE public_name = 'gpt-4'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row, (1, 1));
    }
}
