//! Application composition root.
//!
//! Process-wide state lives in one explicitly-passed [`Application`] value
//! rather than scattered statics or back-references between components —
//! the Content Store pool, the Player Gateway, the Queue Engine built on
//! top of it, the Audio Pipeline's capture/cut managers, and the
//! configuration they were all built from. `main.rs` builds one of these
//! and hands `Arc` clones of what each background task needs.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::audio::{CaptureManager, ClozeCutter};
use crate::config::Config;
use crate::cues::{CueSink, LoggingCueSink};
use crate::db;
use crate::error::Result;
use crate::player::{PlayerControl, PlayerGateway};
use crate::queue::QueueEngine;

/// Everything a background task or CLI command needs, built once at startup.
pub struct Application {
    pub pool: SqlitePool,
    pub player: Arc<dyn PlayerControl>,
    pub queue: Arc<QueueEngine>,
    pub capture: Arc<CaptureManager>,
    pub cutter: Arc<ClozeCutter>,
    pub cues: Arc<dyn CueSink>,
    pub config: Config,
}

impl Application {
    /// Open the content store, construct the Player Gateway and Queue
    /// Engine on top of it, and wire up the Audio Pipeline's process
    /// managers. Does not start any background task.
    pub async fn build(config: Config) -> Result<Self> {
        let db_url = db::db_url(Some(&config.database_path));
        let pool = db::init_db(&db_url).await?;

        let player: Arc<dyn PlayerControl> = Arc::new(PlayerGateway::new(
            config.player.host.clone(),
            config.player.port,
            config.media.root.clone(),
        ));

        let queue = Arc::new(QueueEngine::new(pool.clone(), player.clone(), config.media.root.clone()));
        let capture = Arc::new(CaptureManager::new(
            config.audio.recorder_bin.clone(),
            config.audio.recording_sink.clone(),
        ));
        let cutter = Arc::new(ClozeCutter::new(config.audio.cut_bin.clone()));
        let cues: Arc<dyn CueSink> = Arc::new(LoggingCueSink);

        Ok(Self {
            pool,
            player,
            queue,
            capture,
            cutter,
            cues,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_opens_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database_path = dir.path().join("app.db");
        let app = Application::build(config).await.unwrap();
        let topics = db::topics_outstanding(&app.pool).await.unwrap();
        assert!(topics.is_empty());
    }
}
