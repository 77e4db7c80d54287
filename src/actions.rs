//! Logical action dispatch: maps the keymap's logical action names (§6)
//! onto Session transitions, Queue Engine navigation, Player Gateway
//! transport calls, and the Content Store/Audio Pipeline writes that back
//! a recording or cloze cut. This is the one place that needs all of them,
//! so the Input Dispatcher calls through here instead of switching on
//! keycodes directly.

use std::path::Path;

use crate::audio::{extract_filename, CaptureManager, ClozeCutter};
use crate::config::MediaConfig;
use crate::cues::{audio_cue, Cue, CueSink};
use crate::db;
use crate::error::{Error, Result};
use crate::player::{PlayerControl, DEFAULT_SEEK_STEP, DEFAULT_VOLUME_STEP};
use crate::queue::{EntityKind, QueueEngine};
use crate::session::Session;

/// Run one logical action against the current session. Returns the next
/// `Session` on success (possibly unchanged, for plain transport actions)
/// so the Input Dispatcher can swap it in atomically; emits a cue either
/// way. A `None` return pairs with a failure cue and leaves the caller's
/// session untouched.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    session: &Session,
    queue: &QueueEngine,
    player: &dyn PlayerControl,
    cues: &dyn CueSink,
    capture: &CaptureManager,
    cutter: &ClozeCutter,
    media: &MediaConfig,
    action: &str,
) -> Option<Session> {
    match run(session, queue, player, capture, cutter, media, action).await {
        Ok(next) => {
            audio_cue(cues, Cue::Positive);
            Some(next.unwrap_or_else(|| session.clone()))
        }
        Err(e) => {
            tracing::debug!(action, error = %e, "action failed");
            audio_cue(cues, Cue::Negative);
            None
        }
    }
}

/// The fallible core of [`dispatch`], separated out so tests can inspect
/// the actual error instead of just the pass/fail cue.
#[allow(clippy::too_many_arguments)]
async fn run(
    session: &Session,
    queue: &QueueEngine,
    player: &dyn PlayerControl,
    capture: &CaptureManager,
    cutter: &ClozeCutter,
    media: &MediaConfig,
    action: &str,
) -> Result<Option<Session>> {
    match action {
        "toggle" => {
            player.toggle().await?;
            Ok(None)
        }
        "prev" => {
            player.previous().await?;
            Ok(None)
        }
        "next" => {
            player.next().await?;
            Ok(None)
        }
        "prev-topic" => {
            player.previous().await?;
            reseek_to_stored_timestamp(queue, player).await?;
            Ok(None)
        }
        "next-topic" => {
            player.next().await?;
            reseek_to_stored_timestamp(queue, player).await?;
            Ok(None)
        }
        "seek-back" => {
            player.seek_backward(DEFAULT_SEEK_STEP).await?;
            Ok(None)
        }
        "seek-fwd" => {
            player.seek_forward(DEFAULT_SEEK_STEP).await?;
            Ok(None)
        }
        "stutter-back" => {
            player.stutter_backward().await?;
            Ok(None)
        }
        "stutter-fwd" => {
            player.stutter_forward().await?;
            Ok(None)
        }
        "vol-up" => {
            player.volume_up(DEFAULT_VOLUME_STEP).await?;
            Ok(None)
        }
        "vol-down" => {
            player.volume_down(DEFAULT_VOLUME_STEP).await?;
            Ok(None)
        }

        "start-recording" => {
            let next = session
                .start_recording()
                .ok_or_else(|| Error::InvalidState("start-recording not valid here".into()))?;
            let topic = queue.current_topic().await?;
            let elapsed = player.current_track().await?.elapsed;
            let stem = Path::new(&topic.filepath)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "topic".to_string());
            let filename = extract_filename(&stem, &media.extract_extension);
            let extract_path = media.extracts_path().join(filename);
            let extract_id = db::create_extract(
                queue.pool(),
                &extract_path.to_string_lossy(),
                topic.id,
                elapsed,
            )
            .await?;
            capture.start(&extract_path).await?;
            player.single(true).await?;
            Ok(Some(Session {
                recording_extract_id: Some(extract_id),
                ..next
            }))
        }
        "stop-recording" => {
            let extract_id = session
                .recording_extract_id
                .ok_or_else(|| Error::InvalidState("stop-recording not valid here".into()))?;
            let next = session
                .stop_recording()
                .ok_or_else(|| Error::InvalidState("stop-recording not valid here".into()))?;
            capture.stop().await?;
            let elapsed = player.current_track().await?.elapsed;
            db::set_extract_endstamp(queue.pool(), extract_id, elapsed).await?;
            player.single(false).await?;
            Ok(Some(next))
        }

        "load-local-extracts" => {
            let topic = queue.current_topic().await?;
            let next = session
                .load_local_extract(topic.id)
                .ok_or_else(|| Error::InvalidState("load-local-extracts not valid here".into()))?;
            queue.topic_to_local_extract(topic.id).await?;
            Ok(Some(next))
        }

        "switch-global-extracts" => {
            queue.load(crate::queue::QueueId::GlobalExtract, None).await?;
            let next = session
                .switch_to_global_extract()
                .ok_or_else(|| Error::InvalidState("switch-global-extracts not valid here".into()))?;
            Ok(Some(next))
        }
        "switch-global-topics" => {
            queue.load(crate::queue::QueueId::GlobalTopic, None).await?;
            let next = session
                .switch_to_global_topic()
                .ok_or_else(|| Error::InvalidState("switch-global-topics not valid here".into()))?;
            Ok(Some(next))
        }

        "start-clozing" => {
            let next = session
                .start_clozing()
                .ok_or_else(|| Error::InvalidState("start-clozing not valid here".into()))?;
            let extract = queue.current_extract().await?;
            let elapsed = player.current_track().await?.elapsed;
            let item_id = db::create_item(queue.pool(), extract.id, elapsed).await?;
            Ok(Some(Session {
                clozing_item_id: Some(item_id),
                ..next
            }))
        }
        "stop-clozing" => {
            let item_id = session
                .clozing_item_id
                .ok_or_else(|| Error::InvalidState("stop-clozing not valid here".into()))?;
            let next = session
                .stop_clozing()
                .ok_or_else(|| Error::InvalidState("stop-clozing not valid here".into()))?;
            let extract = queue.current_extract().await?;
            let elapsed = player.current_track().await?.elapsed;
            db::set_item_cloze_end(queue.pool(), item_id, elapsed).await?;
            let item = db::get_item(queue.pool(), item_id).await?;
            let cloze_start = item
                .cloze_startstamp
                .ok_or_else(|| Error::InvalidState("item has no cloze start".into()))?;
            let outputs = cutter
                .cut(
                    Path::new(&extract.filepath),
                    extract.length(),
                    cloze_start,
                    elapsed,
                    item_id,
                    &media.items_path(),
                )
                .await?;
            db::set_item_media_paths(
                queue.pool(),
                item_id,
                &outputs.question.to_string_lossy(),
                &outputs.answer.to_string_lossy(),
            )
            .await?;
            Ok(Some(next))
        }

        "get-extract-items" => {
            let extract = queue.current_extract().await?;
            let next = session
                .load_local_item(extract.id)
                .ok_or_else(|| Error::InvalidState("get-extract-items not valid here".into()))?;
            queue.extract_to_local_item(extract.id).await?;
            Ok(Some(next))
        }
        "get-item-extract" => {
            let item = queue.current_item().await?;
            let extract = queue.extract_by_id(item.extract_id).await?;
            let next = session
                .load_local_extract_from_item(extract.topic_id)
                .ok_or_else(|| Error::InvalidState("get-item-extract not valid here".into()))?;
            queue.item_to_local_extract(&extract).await?;
            Ok(Some(next))
        }
        "get-extract-topic" => {
            let extract = queue.current_extract().await?;
            let parent = queue.topic_by_id(extract.topic_id).await?;
            let next = session
                .switch_to_global_topic()
                .ok_or_else(|| Error::InvalidState("get-extract-topic not valid here".into()))?;
            queue.extract_to_global_topic(&extract, &parent).await?;
            Ok(Some(next))
        }

        "archive-topic" => {
            queue.archive_current(EntityKind::Topic).await?;
            Ok(None)
        }
        "archive-extract" => {
            queue.archive_current(EntityKind::Extract).await?;
            Ok(None)
        }
        "archive-item" => {
            queue.archive_current(EntityKind::Item).await?;
            Ok(None)
        }
        "toggle-to-export" => {
            queue.toggle_to_export().await?;
            Ok(None)
        }

        other => Err(Error::InvalidState(format!("unrecognised action {other}"))),
    }
}

/// Topic-keys' `prev-topic`/`next-topic` override raw transport: after
/// advancing, seek into the newly-current Topic at its stored position
/// instead of leaving playback at 0.
async fn reseek_to_stored_timestamp(queue: &QueueEngine, player: &dyn PlayerControl) -> Result<()> {
    let topic = queue.current_topic().await?;
    player.seek_to(topic.cur_timestamp).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cues::LoggingCueSink;
    use crate::player::mocks::MockPlayer;
    use std::sync::Arc;

    struct Harness {
        queue: QueueEngine,
        player: Arc<MockPlayer>,
        capture: CaptureManager,
        cutter: ClozeCutter,
        media: MediaConfig,
        _root: tempfile::TempDir,
    }

    async fn setup() -> Harness {
        let pool = crate::test_utils::temp_pool().await;
        let player = Arc::new(MockPlayer::new());
        let queue = QueueEngine::new(pool, player.clone(), "/media");
        let root = tempfile::tempdir().unwrap();
        let media = MediaConfig {
            root: root.path().to_path_buf(),
            ..Default::default()
        };
        Harness {
            queue,
            player,
            capture: CaptureManager::new("true", "default"),
            cutter: ClozeCutter::new("true"),
            media,
            _root: root,
        }
    }

    async fn dispatch_action(h: &Harness, session: &Session, cues: &dyn CueSink, action: &str) -> Option<Session> {
        dispatch(
            session,
            &h.queue,
            h.player.as_ref(),
            cues,
            &h.capture,
            &h.cutter,
            &h.media,
            action,
        )
        .await
    }

    #[tokio::test]
    async fn test_toggle_keeps_session_unchanged() {
        let h = setup().await;
        let session = Session::initial();
        let cues = LoggingCueSink;
        let next = dispatch_action(&h, &session, &cues, "toggle").await;
        assert_eq!(next, Some(session));
    }

    #[tokio::test]
    async fn test_start_recording_invalid_outside_global_topic() {
        let h = setup().await;
        let session = Session::initial().load_local_extract(1).unwrap();
        let cues = LoggingCueSink;
        let next = dispatch_action(&h, &session, &cues, "start-recording").await;
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_start_recording_from_global_topic_transitions() {
        let h = setup().await;
        let topic_path = h.media.topics_path().join("a.wav");
        let topic_path_str = topic_path.to_string_lossy().to_string();
        db::register_topic(h.queue.pool(), "yt1", &topic_path_str, "A", 100.0, true)
            .await
            .unwrap();
        h.player.recognise(&topic_path_str);
        h.player.load_queue(&[topic_path_str.clone()]).await.unwrap();

        let session = Session::initial();
        let cues = LoggingCueSink;
        let next = dispatch_action(&h, &session, &cues, "start-recording")
            .await
            .unwrap();
        assert_eq!(next.mode, crate::session::Mode::Recording);
        assert!(h.player.state.lock().single);
        let extract_id = next.recording_extract_id.expect("extract id stashed on the session");
        let extract = db::get_extract(h.queue.pool(), extract_id).await.unwrap();
        assert_eq!(extract.topic_id, db::find_topic_by_path(h.queue.pool(), &topic_path_str).await.unwrap().unwrap().id);
        assert!(h.capture.is_capturing());
    }

    #[tokio::test]
    async fn test_stop_recording_finalises_extract_and_stops_capture() {
        let h = setup().await;
        let topic_path = h.media.topics_path().join("a.wav");
        let topic_path_str = topic_path.to_string_lossy().to_string();
        db::register_topic(h.queue.pool(), "yt1", &topic_path_str, "A", 100.0, true)
            .await
            .unwrap();
        h.player.recognise(&topic_path_str);
        h.player.load_queue(&[topic_path_str]).await.unwrap();

        let session = Session::initial();
        let cues = LoggingCueSink;
        let recording = dispatch_action(&h, &session, &cues, "start-recording").await.unwrap();
        h.player.state.lock().elapsed = 7.5;

        let stopped = dispatch_action(&h, &recording, &cues, "stop-recording").await.unwrap();
        assert_eq!(stopped.mode, crate::session::Mode::Topic);
        assert!(stopped.recording_extract_id.is_none());
        assert!(!h.capture.is_capturing());

        let extract_id = recording.recording_extract_id.unwrap();
        let extract = db::get_extract(h.queue.pool(), extract_id).await.unwrap();
        assert_eq!(extract.endstamp, Some(7.5));
    }

    #[tokio::test]
    async fn test_clozing_round_trip_cuts_item() {
        let h = setup().await;
        let topic_id = db::register_topic(h.queue.pool(), "yt1", "/media/topics/a.wav", "A", 100.0, true)
            .await
            .unwrap();
        let extract_path = h.media.extracts_path().join("a-1700.wav");
        tokio::fs::create_dir_all(extract_path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&extract_path, b"").await.unwrap();
        let extract_path_str = extract_path.to_string_lossy().to_string();
        let extract_id = db::create_extract(h.queue.pool(), &extract_path_str, topic_id, 0.0)
            .await
            .unwrap();
        db::set_extract_endstamp(h.queue.pool(), extract_id, 20.0).await.unwrap();
        h.player.recognise(&extract_path_str);
        h.player.load_queue(&[extract_path_str]).await.unwrap();

        let session = Session::initial().load_local_extract(topic_id).unwrap();
        let cues = LoggingCueSink;
        h.player.state.lock().elapsed = 2.1;
        let clozing = dispatch_action(&h, &session, &cues, "start-clozing").await.unwrap();
        assert_eq!(clozing.mode, crate::session::Mode::Clozing);
        let item_id = clozing.clozing_item_id.expect("item id stashed on the session");

        h.player.state.lock().elapsed = 3.3;
        let stopped = dispatch_action(&h, &clozing, &cues, "stop-clozing").await.unwrap();
        assert_eq!(stopped.mode, crate::session::Mode::Extract);
        assert!(stopped.clozing_item_id.is_none());

        let item = db::get_item(h.queue.pool(), item_id).await.unwrap();
        assert_eq!(item.cloze_startstamp, Some(2.1));
        assert_eq!(item.cloze_endstamp, Some(3.3));
        assert!(item.is_cut());
    }

    #[tokio::test]
    async fn test_unrecognised_action_fails_softly() {
        let h = setup().await;
        let session = Session::initial();
        let cues = LoggingCueSink;
        let next = dispatch_action(&h, &session, &cues, "not-a-real-action").await;
        assert_eq!(next, None);
    }
}
