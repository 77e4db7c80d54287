//! Content Store: persisted topic/extract/item/event records.
//!
//! Uses SQLx with SQLite for lightweight, embedded storage. All mutators are
//! transactional; readers never observe a torn row. This module is the only
//! place that issues raw SQL — every other component goes through the
//! functions here.
//!
//! # Example
//!
//! ```ignore
//! use cloze_minder::db::{init_db, topics_outstanding};
//!
//! let pool = init_db("sqlite:cloze-minder.db").await?;
//! let topics = topics_outstanding(&pool).await?;
//! ```

use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::{Error, Result};
use crate::model::{Extract, Item, Topic};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "cloze-minder.db";

/// Build a SQLite database URL from an optional path.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
pub async fn init_db(db_url: &str) -> Result<SqlitePool> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// ============================================================================
// Ingestion seam
// ============================================================================

/// Register a newly-ingested topic. The one write path that does not
/// originate from the Input Dispatcher or a background task.
pub async fn register_topic(
    pool: &SqlitePool,
    source_id: &str,
    filepath: &str,
    title: &str,
    duration: f64,
    downloaded: bool,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO topics (filepath, source_id, title, duration, downloaded)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(filepath) DO UPDATE SET
            source_id = excluded.source_id,
            title = excluded.title,
            duration = excluded.duration,
            downloaded = excluded.downloaded
        RETURNING id
        "#,
    )
    .bind(filepath)
    .bind(source_id)
    .bind(title)
    .bind(duration)
    .bind(downloaded)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

// ============================================================================
// Topics
// ============================================================================

/// Outstanding topics: non-deleted, non-archived, progress below the
/// auto-archive threshold, ordered by creation time ascending.
pub async fn topics_outstanding(pool: &SqlitePool) -> Result<Vec<Topic>> {
    Ok(sqlx::query_as::<_, Topic>(
        r#"
        SELECT * FROM topics
        WHERE deleted = 0 AND archived = 0
          AND (duration <= 0 OR cur_timestamp / duration < 0.9)
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?)
}

pub async fn get_topic(pool: &SqlitePool, id: i64) -> Result<Topic> {
    sqlx::query_as::<_, Topic>("SELECT * FROM topics WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("topic {id}")))
}

pub async fn find_topic_by_path(pool: &SqlitePool, filepath: &str) -> Result<Option<Topic>> {
    Ok(
        sqlx::query_as::<_, Topic>("SELECT * FROM topics WHERE filepath = ?")
            .bind(filepath)
            .fetch_optional(pool)
            .await?,
    )
}

pub async fn set_topic_timestamp(pool: &SqlitePool, id: i64, cur_timestamp: f64) -> Result<()> {
    sqlx::query("UPDATE topics SET cur_timestamp = ? WHERE id = ? AND cur_timestamp < ?")
        .bind(cur_timestamp)
        .bind(id)
        .bind(cur_timestamp)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_topic_archived(pool: &SqlitePool, id: i64, archived: bool) -> Result<()> {
    sqlx::query("UPDATE topics SET archived = ? WHERE id = ?")
        .bind(archived)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn set_topic_deleted(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE topics SET deleted = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// Extracts
// ============================================================================

/// Outstanding extracts: non-deleted, ordered by creation time descending.
pub async fn extracts_outstanding(pool: &SqlitePool) -> Result<Vec<Extract>> {
    Ok(sqlx::query_as::<_, Extract>(
        "SELECT * FROM extracts WHERE deleted = 0 ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?)
}

/// Children of one topic, newest first.
pub async fn extracts_of_topic(pool: &SqlitePool, topic_id: i64) -> Result<Vec<Extract>> {
    Ok(sqlx::query_as::<_, Extract>(
        "SELECT * FROM extracts WHERE topic_id = ? AND deleted = 0 ORDER BY created_at DESC",
    )
    .bind(topic_id)
    .fetch_all(pool)
    .await?)
}

pub async fn get_extract(pool: &SqlitePool, id: i64) -> Result<Extract> {
    sqlx::query_as::<_, Extract>("SELECT * FROM extracts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("extract {id}")))
}

pub async fn find_extract_by_path(pool: &SqlitePool, filepath: &str) -> Result<Option<Extract>> {
    Ok(
        sqlx::query_as::<_, Extract>("SELECT * FROM extracts WHERE filepath = ?")
            .bind(filepath)
            .fetch_optional(pool)
            .await?,
    )
}

/// Create a new extract with an open endstamp (recording in progress).
pub async fn create_extract(
    pool: &SqlitePool,
    filepath: &str,
    topic_id: i64,
    startstamp: f64,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO extracts (filepath, topic_id, startstamp) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(filepath)
    .bind(topic_id)
    .bind(startstamp)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn set_extract_endstamp(pool: &SqlitePool, id: i64, endstamp: f64) -> Result<()> {
    sqlx::query("UPDATE extracts SET endstamp = ? WHERE id = ?")
        .bind(endstamp)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_extract_archived(pool: &SqlitePool, id: i64, archived: bool) -> Result<()> {
    sqlx::query("UPDATE extracts SET archived = ? WHERE id = ?")
        .bind(archived)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_extract_to_export(pool: &SqlitePool, id: i64, to_export: bool) -> Result<()> {
    sqlx::query("UPDATE extracts SET to_export = ? WHERE id = ?")
        .bind(to_export)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn set_extract_deleted(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE extracts SET deleted = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// Items
// ============================================================================

/// Outstanding items: non-deleted, with a completed question file.
pub async fn items_outstanding(pool: &SqlitePool) -> Result<Vec<Item>> {
    Ok(sqlx::query_as::<_, Item>(
        "SELECT * FROM items WHERE deleted = 0 AND question_filepath IS NOT NULL ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?)
}

/// Children of one extract, newest first.
pub async fn items_of_extract(pool: &SqlitePool, extract_id: i64) -> Result<Vec<Item>> {
    Ok(sqlx::query_as::<_, Item>(
        "SELECT * FROM items WHERE extract_id = ? AND deleted = 0 ORDER BY created_at DESC",
    )
    .bind(extract_id)
    .fetch_all(pool)
    .await?)
}

pub async fn get_item(pool: &SqlitePool, id: i64) -> Result<Item> {
    sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("item {id}")))
}

pub async fn find_item_by_question_path(
    pool: &SqlitePool,
    question_filepath: &str,
) -> Result<Option<Item>> {
    Ok(
        sqlx::query_as::<_, Item>("SELECT * FROM items WHERE question_filepath = ?")
            .bind(question_filepath)
            .fetch_optional(pool)
            .await?,
    )
}

/// Create a new item with an open cloze end (clozing in progress).
pub async fn create_item(pool: &SqlitePool, extract_id: i64, cloze_startstamp: f64) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO items (extract_id, cloze_startstamp) VALUES (?, ?) RETURNING id",
    )
    .bind(extract_id)
    .bind(cloze_startstamp)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn set_item_cloze_end(pool: &SqlitePool, id: i64, cloze_endstamp: f64) -> Result<()> {
    sqlx::query("UPDATE items SET cloze_endstamp = ? WHERE id = ?")
        .bind(cloze_endstamp)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the cut pipeline's output paths once the job completes.
pub async fn set_item_media_paths(
    pool: &SqlitePool,
    id: i64,
    question_filepath: &str,
    answer_filepath: &str,
) -> Result<()> {
    sqlx::query("UPDATE items SET question_filepath = ?, answer_filepath = ? WHERE id = ?")
        .bind(question_filepath)
        .bind(answer_filepath)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_item_archived(pool: &SqlitePool, id: i64, archived: bool) -> Result<()> {
    sqlx::query("UPDATE items SET archived = ? WHERE id = ?")
        .bind(archived)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn set_item_deleted(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE items SET deleted = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============================================================================
// Events
// ============================================================================

/// Append a new event row, or extend the duration of the most recent event
/// of the same kind for this subject if it is still current. Used by the
/// heartbeat/event logger so a held `play` doesn't spam one row per tick.
pub async fn log_topic_event(
    pool: &SqlitePool,
    topic_id: i64,
    kind: &str,
    timestamp: f64,
    tick_secs: f64,
) -> Result<()> {
    let last: Option<(i64, String)> =
        sqlx::query_as("SELECT id, event FROM topic_events WHERE topic_id = ? ORDER BY id DESC LIMIT 1")
            .bind(topic_id)
            .fetch_optional(pool)
            .await?;

    match last {
        Some((id, ref event)) if event == kind => {
            sqlx::query("UPDATE topic_events SET duration = duration + ? WHERE id = ?")
                .bind(tick_secs)
                .bind(id)
                .execute(pool)
                .await?;
        }
        _ => {
            sqlx::query(
                "INSERT INTO topic_events (topic_id, event, timestamp, duration) VALUES (?, ?, ?, 0)",
            )
            .bind(topic_id)
            .bind(kind)
            .bind(timestamp)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

/// Extend the most recent `extract_events` row for `extract_id` if its kind
/// matches `kind`, else insert a new one. Mirrors [`log_topic_event`].
pub async fn log_extract_event(
    pool: &SqlitePool,
    extract_id: i64,
    kind: &str,
    timestamp: f64,
    tick_secs: f64,
) -> Result<()> {
    let last: Option<(i64, String)> =
        sqlx::query_as("SELECT id, event FROM extract_events WHERE extract_id = ? ORDER BY id DESC LIMIT 1")
            .bind(extract_id)
            .fetch_optional(pool)
            .await?;

    match last {
        Some((id, ref event)) if event == kind => {
            sqlx::query("UPDATE extract_events SET duration = duration + ? WHERE id = ?")
                .bind(tick_secs)
                .bind(id)
                .execute(pool)
                .await?;
        }
        _ => {
            sqlx::query(
                "INSERT INTO extract_events (extract_id, event, timestamp, duration) VALUES (?, ?, ?, 0)",
            )
            .bind(extract_id)
            .bind(kind)
            .bind(timestamp)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

/// Extend the most recent `item_events` row for `item_id` if its kind
/// matches `kind`, else insert a new one. Mirrors [`log_topic_event`].
pub async fn log_item_event(
    pool: &SqlitePool,
    item_id: i64,
    kind: &str,
    timestamp: f64,
    tick_secs: f64,
) -> Result<()> {
    let last: Option<(i64, String)> =
        sqlx::query_as("SELECT id, event FROM item_events WHERE item_id = ? ORDER BY id DESC LIMIT 1")
            .bind(item_id)
            .fetch_optional(pool)
            .await?;

    match last {
        Some((id, ref event)) if event == kind => {
            sqlx::query("UPDATE item_events SET duration = duration + ? WHERE id = ?")
                .bind(tick_secs)
                .bind(id)
                .execute(pool)
                .await?;
        }
        _ => {
            sqlx::query("INSERT INTO item_events (item_id, event, timestamp, duration) VALUES (?, ?, ?, 0)")
                .bind(item_id)
                .bind(kind)
                .bind(timestamp)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

// ============================================================================
// Garbage collection queries
// ============================================================================

/// Items eligible for collection: archived or exported.
pub async fn items_finished(pool: &SqlitePool) -> Result<Vec<Item>> {
    Ok(sqlx::query_as::<_, Item>(
        "SELECT * FROM items WHERE deleted = 0 AND (archived = 1 OR exported = 1)",
    )
    .fetch_all(pool)
    .await?)
}

/// Extracts eligible for collection: exported, or archived with every
/// non-deleted item archived or already deleted.
pub async fn extracts_finished(pool: &SqlitePool) -> Result<Vec<Extract>> {
    Ok(sqlx::query_as::<_, Extract>(
        r#"
        SELECT * FROM extracts e
        WHERE e.deleted = 0
          AND (
            e.exported = 1
            OR (
              e.archived = 1
              AND NOT EXISTS (
                SELECT 1 FROM items i
                WHERE i.extract_id = e.id AND i.deleted = 0 AND i.archived = 0
              )
            )
          )
        "#,
    )
    .fetch_all(pool)
    .await?)
}

/// Topics eligible for collection: archived, below the progress threshold,
/// with every extract already deleted.
pub async fn topics_finished(pool: &SqlitePool) -> Result<Vec<Topic>> {
    Ok(sqlx::query_as::<_, Topic>(
        r#"
        SELECT * FROM topics t
        WHERE t.deleted = 0
          AND t.archived = 1
          AND (t.duration <= 0 OR t.cur_timestamp / t.duration < 0.9)
          AND NOT EXISTS (
            SELECT 1 FROM extracts e WHERE e.topic_id = t.id AND e.deleted = 0
          )
        "#,
    )
    .fetch_all(pool)
    .await?)
}

/// Mark an item deleted; idempotent.
pub async fn finalize_item_deletion(pool: &SqlitePool, id: i64) -> Result<()> {
    set_item_deleted(pool, id).await
}

/// Mark an extract deleted; idempotent.
pub async fn finalize_extract_deletion(pool: &SqlitePool, id: i64) -> Result<()> {
    set_extract_deleted(pool, id).await
}

/// Mark a topic deleted; idempotent.
pub async fn finalize_topic_deletion(pool: &SqlitePool, id: i64) -> Result<()> {
    set_topic_deleted(pool, id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_pool() -> SqlitePool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite:{}", path.display());
        let pool = init_db(&url).await.unwrap();
        std::mem::forget(dir); // keep the tempdir alive for the pool's lifetime in these tests
        pool
    }

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let pool = temp_pool().await;
        let topics = topics_outstanding(&pool).await.unwrap();
        assert!(topics.is_empty());
    }

    #[tokio::test]
    async fn test_register_topic_is_idempotent_on_path() {
        let pool = temp_pool().await;
        let id1 = register_topic(&pool, "yt1", "/media/topics/yt1.wav", "Talk", 120.0, true)
            .await
            .unwrap();
        let id2 = register_topic(&pool, "yt1", "/media/topics/yt1.wav", "Talk 2", 125.0, true)
            .await
            .unwrap();
        assert_eq!(id1, id2);
        let topic = get_topic(&pool, id1).await.unwrap();
        assert_eq!(topic.title, "Talk 2");
    }

    #[tokio::test]
    async fn test_topic_timestamp_is_monotone() {
        let pool = temp_pool().await;
        let id = register_topic(&pool, "yt1", "/t.wav", "T", 120.0, true)
            .await
            .unwrap();
        set_topic_timestamp(&pool, id, 50.0).await.unwrap();
        set_topic_timestamp(&pool, id, 10.0).await.unwrap();
        let topic = get_topic(&pool, id).await.unwrap();
        assert_eq!(topic.cur_timestamp, 50.0);
        set_topic_timestamp(&pool, id, 60.0).await.unwrap();
        let topic = get_topic(&pool, id).await.unwrap();
        assert_eq!(topic.cur_timestamp, 60.0);
    }

    #[tokio::test]
    async fn test_extract_lifecycle() {
        let pool = temp_pool().await;
        let topic_id = register_topic(&pool, "yt1", "/t.wav", "T", 300.0, true)
            .await
            .unwrap();
        let extract_id = create_extract(&pool, "/e1.wav", topic_id, 42.5).await.unwrap();
        let extracts = extracts_of_topic(&pool, topic_id).await.unwrap();
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].endstamp, None);

        set_extract_endstamp(&pool, extract_id, 52.5).await.unwrap();
        let extract = get_extract(&pool, extract_id).await.unwrap();
        assert_eq!(extract.length(), 10.0);
    }

    #[tokio::test]
    async fn test_item_lifecycle_and_gc_eligibility() {
        let pool = temp_pool().await;
        let topic_id = register_topic(&pool, "yt1", "/t.wav", "T", 300.0, true)
            .await
            .unwrap();
        let extract_id = create_extract(&pool, "/e1.wav", topic_id, 0.0).await.unwrap();
        set_extract_endstamp(&pool, extract_id, 8.0).await.unwrap();
        let item_id = create_item(&pool, extract_id, 2.1).await.unwrap();
        set_item_cloze_end(&pool, item_id, 3.3).await.unwrap();

        let items = items_of_extract(&pool, extract_id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items_outstanding(&pool).await.unwrap().iter().any(|i| i.id == item_id));

        set_item_media_paths(&pool, item_id, "/q.wav", "/a.wav").await.unwrap();
        assert!(items_outstanding(&pool).await.unwrap().iter().any(|i| i.id == item_id));

        assert!(items_finished(&pool).await.unwrap().is_empty());
        set_item_archived(&pool, item_id, true).await.unwrap();
        assert_eq!(items_finished(&pool).await.unwrap().len(), 1);

        finalize_item_deletion(&pool, item_id).await.unwrap();
        assert!(items_finished(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gc_queries_idempotent() {
        let pool = temp_pool().await;
        let topic_id = register_topic(&pool, "yt1", "/t.wav", "T", 10.0, true)
            .await
            .unwrap();
        set_topic_archived(&pool, topic_id, true).await.unwrap();
        assert_eq!(topics_finished(&pool).await.unwrap().len(), 1);
        finalize_topic_deletion(&pool, topic_id).await.unwrap();
        assert!(topics_finished(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_topic_event_extends_matching_run() {
        let pool = temp_pool().await;
        let topic_id = register_topic(&pool, "yt1", "/t.wav", "T", 10.0, true)
            .await
            .unwrap();
        log_topic_event(&pool, topic_id, "play", 1.0, 5.0).await.unwrap();
        log_topic_event(&pool, topic_id, "play", 6.0, 5.0).await.unwrap();
        let row: (f64,) =
            sqlx::query_as("SELECT duration FROM topic_events WHERE topic_id = ?")
                .bind(topic_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(row.0, 10.0);

        log_topic_event(&pool, topic_id, "pause", 11.0, 5.0).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM topic_events WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }

    #[tokio::test]
    async fn test_log_extract_event_extends_matching_run() {
        let pool = temp_pool().await;
        let topic_id = register_topic(&pool, "yt1", "/t.wav", "T", 10.0, true)
            .await
            .unwrap();
        let extract_id = create_extract(&pool, "/e.wav", topic_id, 1.0).await.unwrap();

        log_extract_event(&pool, extract_id, "play", 1.0, 5.0).await.unwrap();
        log_extract_event(&pool, extract_id, "play", 6.0, 5.0).await.unwrap();
        let row: (f64,) = sqlx::query_as("SELECT duration FROM extract_events WHERE extract_id = ?")
            .bind(extract_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 10.0);

        log_extract_event(&pool, extract_id, "stop", 11.0, 5.0).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM extract_events WHERE extract_id = ?")
            .bind(extract_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }

    #[tokio::test]
    async fn test_log_item_event_extends_matching_run() {
        let pool = temp_pool().await;
        let topic_id = register_topic(&pool, "yt1", "/t.wav", "T", 10.0, true)
            .await
            .unwrap();
        let extract_id = create_extract(&pool, "/e.wav", topic_id, 1.0).await.unwrap();
        let item_id = create_item(&pool, extract_id, 2.0).await.unwrap();

        log_item_event(&pool, item_id, "play", 1.0, 5.0).await.unwrap();
        log_item_event(&pool, item_id, "play", 6.0, 5.0).await.unwrap();
        let row: (f64,) = sqlx::query_as("SELECT duration FROM item_events WHERE item_id = ?")
            .bind(item_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 10.0);

        log_item_event(&pool, item_id, "pause", 11.0, 5.0).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM item_events WHERE item_id = ?")
            .bind(item_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }
}
