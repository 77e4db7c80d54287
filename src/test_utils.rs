//! Shared test fixtures.
//!
//! A handful of modules (`queue`, `session`, `gc`) need a real migrated
//! SQLite pool in their unit tests; this centralises how one gets built so
//! each module's tests aren't reinventing the tempdir dance.

use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

/// Creates a temporary, fully-migrated database for testing.
///
/// Keep the returned `TempDir` alive for the duration of your test — the
/// database file is deleted when it drops.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("failed to initialize test database");

    (pool, dir)
}

/// Same as [`temp_db`] but leaks the `TempDir` so callers that only need
/// the pool itself don't have to thread a guard value through.
pub async fn temp_pool() -> SqlitePool {
    let (pool, dir) = temp_db().await;
    std::mem::forget(dir);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_is_migrated_and_empty() {
        let (pool, _dir) = temp_db().await;
        let topics = crate::db::topics_outstanding(&pool).await.unwrap();
        assert!(topics.is_empty());
    }

    #[tokio::test]
    async fn test_temp_pool_survives_without_explicit_dir() {
        let pool = temp_pool().await;
        let topics = crate::db::topics_outstanding(&pool).await.unwrap();
        assert!(topics.is_empty());
    }
}
