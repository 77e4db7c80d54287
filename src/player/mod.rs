//! Player Gateway: a thin command/query surface over the external audio
//! player (load queue, transport, seek, volume, repeat/single, current
//! track, status).
//!
//! The external player sees file paths relative to one configured media
//! root; the content store holds absolute paths. [`PlayerGateway`] performs
//! the bijection `relative ↔ absolute = <root>/<relative>` and owns a
//! lazily-reopened connection so callers never see a raw socket.
//!
//! Every operation here is exposed through the [`PlayerControl`] trait so
//! the Queue Engine and Session State Machine can be tested against a mock
//! implementation instead of a live player.

pub mod protocol;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};
use protocol::{Connection, CurrentSong, Status};

/// Seconds nudged for the forward stutter seek. Calibrated empirically; an
/// interface parameter, not a derived constant.
pub const STUTTER_FORWARD_OFFSET: f64 = -0.165;
/// Seconds nudged for the backward stutter seek.
pub const STUTTER_BACKWARD_OFFSET: f64 = -0.23;
/// Compensating re-seek applied after the pause/resume settles.
pub const STUTTER_COMPENSATION: f64 = 0.2;
/// Duration of the pause the stutter sequence holds to let the resume settle.
pub const STUTTER_SETTLE: std::time::Duration = std::time::Duration::from_millis(200);

/// Default seek step, in seconds, for `seek_forward`/`seek_backward`.
pub const DEFAULT_SEEK_STEP: f64 = 6.0;
/// Default volume step for `volume_up`/`volume_down`.
pub const DEFAULT_VOLUME_STEP: i32 = 5;

/// The currently-playing track as seen through the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentTrack {
    pub relative: Option<String>,
    pub absolute: Option<PathBuf>,
    pub elapsed: f64,
}

/// Operations the Queue Engine, Session State Machine, and Progress Tracker
/// need from the external player. Implemented for real by [`PlayerGateway`];
/// implemented by hand for tests (see [`mocks`]).
#[async_trait]
pub trait PlayerControl: Send + Sync {
    async fn load_queue(&self, relative_paths: &[String]) -> Result<Vec<String>>;
    async fn current_track(&self) -> Result<CurrentTrack>;
    async fn status(&self) -> Result<Status>;
    async fn toggle(&self) -> Result<()>;
    async fn previous(&self) -> Result<()>;
    async fn next(&self) -> Result<()>;
    async fn seek_forward(&self, dt: f64) -> Result<()>;
    async fn seek_backward(&self, dt: f64) -> Result<()>;
    async fn stutter_forward(&self) -> Result<()>;
    async fn stutter_backward(&self) -> Result<()>;
    async fn volume_up(&self, step: i32) -> Result<()>;
    async fn volume_down(&self, step: i32) -> Result<()>;
    async fn repeat(&self, on: bool) -> Result<()>;
    async fn single(&self, on: bool) -> Result<()>;
    async fn seek_to(&self, seconds: f64) -> Result<()>;
    async fn player_recognises(&self, relative_path: &str) -> Result<bool>;
}

/// Gateway to the external player over the line-oriented TCP protocol.
pub struct PlayerGateway {
    host: String,
    port: u16,
    media_root: PathBuf,
}

impl PlayerGateway {
    pub fn new(host: impl Into<String>, port: u16, media_root: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            media_root: media_root.into(),
        }
    }

    /// Open a fresh connection for the duration of one operation. The
    /// gateway is not reentrant on a single connection, so every call pays
    /// the cost of a new socket rather than risk interleaving commands.
    async fn connect(&self) -> Result<Connection> {
        Connection::connect(&self.host, self.port).await
    }

    fn relative(&self, absolute: &Path) -> Option<String> {
        absolute
            .strip_prefix(&self.media_root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.media_root.join(relative)
    }

    async fn read_status(&self, conn: &mut Connection) -> Result<Status> {
        let lines = conn.command("status").await?;
        Ok(Status::from_lines(&lines))
    }

    /// Force the player out of `stop` into a well-defined `pause` state.
    /// `currentsong`/`status.elapsed` are otherwise undefined while stopped.
    async fn remove_stop_state(&self, conn: &mut Connection) -> Result<()> {
        let status = self.read_status(conn).await?;
        if status.state == "stop" {
            conn.command("play").await?;
            conn.command("pause 1").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PlayerControl for PlayerGateway {
    async fn load_queue(&self, relative_paths: &[String]) -> Result<Vec<String>> {
        let mut conn = self.connect().await?;
        conn.command("clear").await?;

        let mut skipped = Vec::new();
        for path in relative_paths {
            match conn.command(&format!("find file \"{path}\"")).await {
                Ok(lines) if !lines.is_empty() => {
                    conn.command(&format!("add \"{path}\"")).await?;
                }
                _ => skipped.push(path.clone()),
            }
        }
        Ok(skipped)
    }

    async fn current_track(&self) -> Result<CurrentTrack> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        let status = self.read_status(&mut conn).await?;
        let song = CurrentSong::from_lines(&conn.command("currentsong").await?);
        Ok(CurrentTrack {
            absolute: song.file.as_deref().map(|f| self.absolute(f)),
            relative: song.file,
            elapsed: status.elapsed,
        })
    }

    async fn status(&self) -> Result<Status> {
        let mut conn = self.connect().await?;
        self.read_status(&mut conn).await
    }

    async fn toggle(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        let status = self.read_status(&mut conn).await?;
        let cmd = if status.state == "play" { "pause 1" } else { "play" };
        conn.command(cmd).await?;
        Ok(())
    }

    async fn previous(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        conn.command("previous").await?;
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        conn.command("next").await?;
        Ok(())
    }

    async fn seek_forward(&self, dt: f64) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        let status = self.read_status(&mut conn).await?;
        conn.command(&format!("seekcur {}", status.elapsed + dt)).await?;
        Ok(())
    }

    async fn seek_backward(&self, dt: f64) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        let status = self.read_status(&mut conn).await?;
        let target = status.elapsed - dt;
        if target < 0.0 {
            return Ok(());
        }
        conn.command(&format!("seekcur {target}")).await?;
        Ok(())
    }

    async fn stutter_forward(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        let status = self.read_status(&mut conn).await?;
        let target = (status.elapsed + STUTTER_FORWARD_OFFSET).max(0.0);
        conn.command(&format!("seekcur {target}")).await?;
        conn.command("pause 0").await?;
        tokio::time::sleep(STUTTER_SETTLE).await;
        conn.command("pause 1").await?;
        let compensated = (target + STUTTER_COMPENSATION).max(0.0);
        conn.command(&format!("seekcur {compensated}")).await?;
        Ok(())
    }

    async fn stutter_backward(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        let status = self.read_status(&mut conn).await?;
        let target = (status.elapsed + STUTTER_BACKWARD_OFFSET).max(0.0);
        conn.command(&format!("seekcur {target}")).await?;
        conn.command("pause 0").await?;
        tokio::time::sleep(STUTTER_SETTLE).await;
        conn.command("pause 1").await?;
        let compensated = (target + STUTTER_COMPENSATION).max(0.0);
        conn.command(&format!("seekcur {compensated}")).await?;
        Ok(())
    }

    async fn volume_up(&self, step: i32) -> Result<()> {
        let mut conn = self.connect().await?;
        let status = self.read_status(&mut conn).await?;
        let target = (status.volume + step).min(100);
        if target == status.volume {
            return Ok(());
        }
        conn.command(&format!("setvol {target}")).await?;
        Ok(())
    }

    async fn volume_down(&self, step: i32) -> Result<()> {
        let mut conn = self.connect().await?;
        let status = self.read_status(&mut conn).await?;
        let target = (status.volume - step).max(0);
        if target == status.volume {
            return Ok(());
        }
        conn.command(&format!("setvol {target}")).await?;
        Ok(())
    }

    async fn repeat(&self, on: bool) -> Result<()> {
        let mut conn = self.connect().await?;
        conn.command(&format!("repeat {}", on as i32)).await?;
        Ok(())
    }

    async fn single(&self, on: bool) -> Result<()> {
        let mut conn = self.connect().await?;
        conn.command(&format!("single {}", on as i32)).await?;
        Ok(())
    }

    async fn seek_to(&self, seconds: f64) -> Result<()> {
        let mut conn = self.connect().await?;
        self.remove_stop_state(&mut conn).await?;
        conn.command(&format!("seekcur {seconds}")).await?;
        Ok(())
    }

    async fn player_recognises(&self, relative_path: &str) -> Result<bool> {
        let mut conn = self.connect().await?;
        let lines = conn
            .command(&format!("find file \"{relative_path}\""))
            .await
            .unwrap_or_default();
        Ok(!lines.is_empty())
    }
}

impl PlayerGateway {
    /// Compute the relative path the player would use for an absolute
    /// content-store path, if it falls under the media root.
    pub fn to_relative(&self, absolute: &Path) -> Option<String> {
        self.relative(absolute)
    }
}

/// Mock [`PlayerControl`] implementations for unit tests of the Queue
/// Engine, Session State Machine, and Progress Tracker.
#[cfg(any(test, feature = "test-support"))]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;

    /// A player double that serves canned responses and records calls.
    pub struct MockPlayer {
        pub state: Mutex<MockState>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockState {
        pub queue: Vec<String>,
        pub recognised: Vec<String>,
        pub playback_state: String,
        pub elapsed: f64,
        pub volume: i32,
        pub repeat: bool,
        pub single: bool,
        pub calls: Vec<String>,
    }

    impl MockPlayer {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(MockState {
                    playback_state: "stop".to_string(),
                    volume: 50,
                    ..Default::default()
                }),
            }
        }

        pub fn recognise(&self, path: impl Into<String>) {
            self.state.lock().recognised.push(path.into());
        }
    }

    #[async_trait]
    impl PlayerControl for MockPlayer {
        async fn load_queue(&self, relative_paths: &[String]) -> Result<Vec<String>> {
            let mut state = self.state.lock();
            state.calls.push("load_queue".into());
            state.queue.clear();
            let mut skipped = Vec::new();
            for path in relative_paths {
                if state.recognised.contains(path) {
                    state.queue.push(path.clone());
                } else {
                    skipped.push(path.clone());
                }
            }
            Ok(skipped)
        }

        async fn current_track(&self) -> Result<CurrentTrack> {
            let mut state = self.state.lock();
            if state.playback_state == "stop" {
                state.playback_state = "pause".to_string();
            }
            let relative = state.queue.first().cloned();
            Ok(CurrentTrack {
                absolute: relative.as_deref().map(PathBuf::from),
                relative,
                elapsed: state.elapsed,
            })
        }

        async fn status(&self) -> Result<Status> {
            let state = self.state.lock();
            Ok(Status {
                state: state.playback_state.clone(),
                elapsed: state.elapsed,
                volume: state.volume,
            })
        }

        async fn toggle(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.playback_state = if state.playback_state == "play" {
                "pause".to_string()
            } else {
                "play".to_string()
            };
            Ok(())
        }

        async fn previous(&self) -> Result<()> {
            self.state.lock().calls.push("previous".into());
            Ok(())
        }

        async fn next(&self) -> Result<()> {
            self.state.lock().calls.push("next".into());
            Ok(())
        }

        async fn seek_forward(&self, dt: f64) -> Result<()> {
            let mut state = self.state.lock();
            state.elapsed += dt;
            Ok(())
        }

        async fn seek_backward(&self, dt: f64) -> Result<()> {
            let mut state = self.state.lock();
            if state.elapsed - dt >= 0.0 {
                state.elapsed -= dt;
            }
            Ok(())
        }

        async fn stutter_forward(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.elapsed = (state.elapsed + STUTTER_FORWARD_OFFSET + STUTTER_COMPENSATION).max(0.0);
            Ok(())
        }

        async fn stutter_backward(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.elapsed = (state.elapsed + STUTTER_BACKWARD_OFFSET + STUTTER_COMPENSATION).max(0.0);
            Ok(())
        }

        async fn volume_up(&self, step: i32) -> Result<()> {
            let mut state = self.state.lock();
            state.volume = (state.volume + step).min(100);
            Ok(())
        }

        async fn volume_down(&self, step: i32) -> Result<()> {
            let mut state = self.state.lock();
            state.volume = (state.volume - step).max(0);
            Ok(())
        }

        async fn repeat(&self, on: bool) -> Result<()> {
            self.state.lock().repeat = on;
            Ok(())
        }

        async fn single(&self, on: bool) -> Result<()> {
            self.state.lock().single = on;
            Ok(())
        }

        async fn seek_to(&self, seconds: f64) -> Result<()> {
            self.state.lock().elapsed = seconds;
            Ok(())
        }

        async fn player_recognises(&self, relative_path: &str) -> Result<bool> {
            Ok(self.state.lock().recognised.contains(&relative_path.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockPlayer;
    use super::*;

    #[tokio::test]
    async fn test_volume_clamps_at_bounds() {
        let player = MockPlayer::new();
        player.state.lock().volume = 98;
        player.volume_up(5).await.unwrap();
        assert_eq!(player.state.lock().volume, 100);

        player.state.lock().volume = 2;
        player.volume_down(5).await.unwrap();
        assert_eq!(player.state.lock().volume, 0);
    }

    #[tokio::test]
    async fn test_seek_backward_clamps_at_zero() {
        let player = MockPlayer::new();
        player.state.lock().elapsed = 3.0;
        player.seek_backward(6.0).await.unwrap();
        assert_eq!(player.state.lock().elapsed, 3.0, "no-op when it would go negative");
    }

    #[tokio::test]
    async fn test_load_queue_skips_unrecognised() {
        let player = MockPlayer::new();
        player.recognise("topics/a.wav");
        let skipped = player
            .load_queue(&["topics/a.wav".to_string(), "topics/b.wav".to_string()])
            .await
            .unwrap();
        assert_eq!(skipped, vec!["topics/b.wav".to_string()]);
        assert_eq!(player.state.lock().queue, vec!["topics/a.wav".to_string()]);
    }

    #[test]
    fn test_relative_path_bijection() {
        let gateway = PlayerGateway::new("localhost", 6600, "/srv/audiofiles");
        let abs = Path::new("/srv/audiofiles/topics/yt1.wav");
        assert_eq!(gateway.to_relative(abs).as_deref(), Some("topics/yt1.wav"));
        assert_eq!(gateway.to_relative(Path::new("/elsewhere/x.wav")), None);
    }
}
