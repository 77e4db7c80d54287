//! Garbage collection: the three-stage sweep that removes finished media
//! files from disk and marks their content-store rows deleted.
//!
//! Order matters: items before extracts before topics, since an extract's
//! eligibility depends on its items already being archived or deleted, and
//! a topic's eligibility depends on all its extracts being deleted.

use sqlx::SqlitePool;

use crate::error::Result;

/// How many rows each stage removed, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub items: usize,
    pub extracts: usize,
    pub topics: usize,
}

async fn remove_file(path: &str) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Run one full sweep: items, then extracts, then topics. Idempotent — a
/// row already marked `deleted` never appears in a `*_finished` query
/// again, so running this twice in a row is a no-op the second time.
pub async fn sweep(pool: &SqlitePool) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for item in crate::db::items_finished(pool).await? {
        if let Some(path) = &item.question_filepath {
            remove_file(path).await?;
        }
        if let Some(path) = &item.answer_filepath {
            remove_file(path).await?;
        }
        crate::db::finalize_item_deletion(pool, item.id).await?;
        report.items += 1;
    }

    for extract in crate::db::extracts_finished(pool).await? {
        remove_file(&extract.filepath).await?;
        crate::db::finalize_extract_deletion(pool, extract.id).await?;
        report.extracts += 1;
    }

    for topic in crate::db::topics_finished(pool).await? {
        remove_file(&topic.filepath).await?;
        crate::db::finalize_topic_deletion(pool, topic.id).await?;
        report.topics += 1;
    }

    if report != SweepReport::default() {
        tracing::info!(
            items = report.items,
            extracts = report.extracts,
            topics = report.topics,
            "garbage collection sweep complete"
        );
    }

    Ok(report)
}
