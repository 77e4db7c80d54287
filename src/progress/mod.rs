//! Progress Tracker: one periodic task with two responsibilities on every
//! tick — sample the current Topic's playback position (monotone) and
//! extend/create the currently-playing entity's play/pause/stop event log.
//!
//! The original source runs these as two independent scripts; this
//! appliance consolidates them into one `tokio::time::interval` loop since
//! both read the same Player Gateway snapshot per tick (see DESIGN.md).
//! The position sample only ever applies to a Topic (only Topics carry a
//! `cur_timestamp`), but the event log is kept per entity kind — whichever
//! of Topic/Extract/Item the player's current file backs owns the tick's
//! event row, matching each entity's own `list of Events`.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::watch;

use crate::db;
use crate::error::Result;
use crate::model::EventKind;
use crate::player::PlayerControl;

/// One sampling pass: read the player's status and current track, update
/// the backing Topic's `cur_timestamp` (if the current track is a Topic)
/// and extend/create the current entity's event log. Returns `Ok(false)`
/// when there was nothing to do (stopped, or no matching content-store row).
pub async fn tick(pool: &SqlitePool, player: &dyn PlayerControl, tick_secs: f64) -> Result<bool> {
    let status = player.status().await?;
    if status.state == "stop" {
        return Ok(false);
    }

    let track = player.current_track().await?;
    let Some(absolute) = track.absolute else {
        return Ok(false);
    };
    let path = absolute.to_string_lossy().to_string();

    let kind = match status.state.as_str() {
        "play" => EventKind::Play,
        "pause" => EventKind::Pause,
        _ => EventKind::Stop,
    };

    if let Some(topic) = db::find_topic_by_path(pool, &path).await? {
        if status.elapsed > topic.cur_timestamp {
            db::set_topic_timestamp(pool, topic.id, status.elapsed).await?;
        }
        db::log_topic_event(pool, topic.id, kind.as_str(), status.elapsed, tick_secs).await?;
        return Ok(true);
    }

    if let Some(extract) = db::find_extract_by_path(pool, &path).await? {
        db::log_extract_event(pool, extract.id, kind.as_str(), status.elapsed, tick_secs).await?;
        return Ok(true);
    }

    if let Some(item) = db::find_item_by_question_path(pool, &path).await? {
        db::log_item_event(pool, item.id, kind.as_str(), status.elapsed, tick_secs).await?;
        return Ok(true);
    }

    Ok(false)
}

/// Runs [`tick`] on a fixed interval until `shutdown` is set. Spawned once
/// from the composed application.
pub async fn run(
    pool: SqlitePool,
    player: Arc<dyn PlayerControl>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tick(&pool, player.as_ref(), interval.as_secs_f64()).await {
                    tracing::warn!(error = %e, "progress tracker tick failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("progress tracker shutting down");
                    return;
                }
            }
        }
    }
}
