//! Input Dispatcher: hotplug-aware controller/headphones handling and
//! keycode-to-action dispatch.
//!
//! The kernel-facing parts (reading `/dev/input/event*`, watching udev for
//! add/remove) sit behind the [`InputSource`]/[`DeviceMonitor`] traits, the
//! same dependency-injection seam the teacher uses for its enrichment API
//! clients (`#[async_trait] pub trait ... : Send + Sync` plus a
//! `#[cfg(test)] pub mod mocks`). That keeps the actual dispatch logic —
//! four-adds-means-connected counting, headphone-loss restart, keycode
//! lookup — unit-testable without real hardware.

#[cfg(target_os = "linux")]
pub mod linux;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::audio::{CaptureManager, ClozeCutter};
use crate::config::{DeviceConfig, MediaConfig};
use crate::cues::{audio_cue, Cue, CueSink};
use crate::error::Result;
use crate::player::PlayerControl;
use crate::queue::{actions_for_table, QueueEngine, QueueId};
use crate::session::Session;

/// A single key transition read off an input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub keycode: String,
    /// `true` on the press transition (kernel event value becomes 1).
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Controller,
    Headphones,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Add,
    Remove,
}

/// A hotplug notification: a device node appeared or disappeared, carrying
/// the parent device's name (and, when available, MAC) used to classify it.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    pub node: PathBuf,
    pub parent_name: String,
    pub parent_address: Option<String>,
}

/// Classify a hotplug event's parent device against the configured
/// controller/headphones identification (MAC address or name substring).
pub fn classify_device(parent_name: &str, parent_address: Option<&str>, config: &DeviceConfig) -> DeviceKind {
    let matches_controller = parent_address.is_some_and(|a| a == config.controller_address)
        || (!config.controller_name.is_empty() && parent_name.contains(&config.controller_name));
    if matches_controller {
        return DeviceKind::Controller;
    }
    let matches_headphones = parent_address.is_some_and(|a| a == config.headphones_address)
        || (!config.headphones_name.is_empty() && parent_name.contains(&config.headphones_name));
    if matches_headphones {
        return DeviceKind::Headphones;
    }
    DeviceKind::Other
}

/// Reads key events from one open input device.
pub trait InputSource: Send {
    fn poll_events(&mut self) -> Result<Vec<RawKeyEvent>>;
    fn device_kind(&self) -> DeviceKind;
}

/// Watches for input-device hotplug (add/remove) events.
#[async_trait]
pub trait DeviceMonitor: Send {
    async fn next_event(&mut self) -> Result<DeviceEvent>;
}

/// What a device-add should cause the dispatcher's caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The fourth controller event-device arrived; announce "controller connected".
    ControllerConnected,
    /// A controller event-device arrived but the count hasn't reached four yet.
    ControllerPending,
    HeadphonesConnected,
    Ignored,
}

/// What a device-remove should cause the dispatcher's caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    ControllerDisconnected,
    /// Headphones were lost; the audio daemon needs restarting.
    HeadphonesLost,
    Ignored,
}

/// A controller announces itself as multiple logical event devices; this
/// tracks how many have arrived so "connected" fires exactly once, on the
/// fourth.
const CONTROLLER_DEVICE_COUNT: u32 = 4;

/// Pure hotplug bookkeeping, independent of how devices are actually read.
/// Kept separate from the async loop so it is trivially unit-testable.
#[derive(Debug, Default)]
pub struct DispatcherState {
    controller_add_count: u32,
    pub controller_connected: bool,
    pub headphones_present: bool,
}

impl DispatcherState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add(&mut self, kind: DeviceKind) -> AddOutcome {
        match kind {
            DeviceKind::Controller => {
                self.controller_add_count += 1;
                if self.controller_add_count >= CONTROLLER_DEVICE_COUNT {
                    self.controller_connected = true;
                    AddOutcome::ControllerConnected
                } else {
                    AddOutcome::ControllerPending
                }
            }
            DeviceKind::Headphones => {
                self.headphones_present = true;
                AddOutcome::HeadphonesConnected
            }
            DeviceKind::Other => AddOutcome::Ignored,
        }
    }

    pub fn on_remove(&mut self, kind: DeviceKind) -> RemoveOutcome {
        match kind {
            DeviceKind::Controller => {
                self.controller_add_count = 0;
                self.controller_connected = false;
                RemoveOutcome::ControllerDisconnected
            }
            DeviceKind::Headphones => {
                self.headphones_present = false;
                RemoveOutcome::HeadphonesLost
            }
            DeviceKind::Other => RemoveOutcome::Ignored,
        }
    }
}

/// Look up the logical action bound to a keycode in the currently-active
/// table. A missing mapping is a no-op, not an error.
pub fn lookup_action<'a>(active_keys: &'a HashMap<String, String>, keycode: &str) -> Option<&'a str> {
    active_keys.get(keycode).map(String::as_str)
}

/// How often the dispatcher retries the initial global-topic queue load
/// while waiting for headphones to appear (or for any Topic to exist).
const INITIAL_LOAD_RETRY: Duration = Duration::from_secs(6);

/// The Input Dispatcher's main loop: fans in hotplug notifications and raw
/// key events, and drives [`crate::actions::dispatch`] against a single
/// mutable [`Session`].
///
/// Reading real devices happens in tasks the caller spawns (production:
/// [`linux::EvdevSource`]/[`linux::UdevMonitor`] feeding `key_events`/
/// `monitor_events`; tests: anything that sends into the same channels),
/// so this loop only ever deals with plain values and stays portable.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    mut key_events: mpsc::Receiver<RawKeyEvent>,
    mut monitor_events: mpsc::Receiver<DeviceEvent>,
    config: DeviceConfig,
    queue: &QueueEngine,
    player: &dyn PlayerControl,
    cues: &dyn CueSink,
    capture: &CaptureManager,
    cutter: &ClozeCutter,
    media: &MediaConfig,
    audio_daemon_restart_cmd: &[String],
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = DispatcherState::new();
    let mut session = Session::initial();
    let mut initial_load_done = false;
    let mut retry = tokio::time::interval(INITIAL_LOAD_RETRY);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = retry.tick() => {
                if !initial_load_done && state.headphones_present {
                    match queue.load(QueueId::GlobalTopic, None).await {
                        Ok(_) => initial_load_done = true,
                        Err(crate::error::Error::Empty) => audio_cue(cues, Cue::NoFiles),
                        Err(e) => tracing::warn!(error = %e, "initial queue load failed"),
                    }
                }
            }

            event = monitor_events.recv() => {
                let Some(event) = event else { break };
                let kind = classify_device(&event.parent_name, event.parent_address.as_deref(), &config);
                match event.action {
                    DeviceAction::Add => match state.on_add(kind) {
                        AddOutcome::ControllerConnected => audio_cue(cues, Cue::ControllerConnected),
                        AddOutcome::HeadphonesConnected => audio_cue(cues, Cue::HeadphonesConnected),
                        AddOutcome::ControllerPending | AddOutcome::Ignored => {}
                    },
                    DeviceAction::Remove => {
                        if state.on_remove(kind) == RemoveOutcome::HeadphonesLost {
                            restart_audio_daemon(audio_daemon_restart_cmd).await;
                        }
                    }
                }
            }

            event = key_events.recv() => {
                let Some(event) = event else { break };
                if !event.pressed {
                    continue;
                }
                let Some(action) = lookup_action(&config.key_map, &event.keycode) else { continue };
                if !actions_for_table(session.active_keys).contains(&action) {
                    continue;
                }
                if let Some(next) = crate::actions::dispatch(&session, queue, player, cues, capture, cutter, media, action).await {
                    session = next;
                }
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Restart the system audio daemon after headphones disappear, so the
/// recording sink doesn't stay pinned to a device that's gone.
async fn restart_audio_daemon(cmd: &[String]) {
    let Some((program, args)) = cmd.split_first() else { return };
    match tokio::process::Command::new(program).args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!(?status, "audio daemon restart command exited non-zero"),
        Err(e) => tracing::warn!(error = %e, "failed to run audio daemon restart command"),
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;

    pub struct MockInputSource {
        pub kind: DeviceKind,
        pub queued: VecDeque<RawKeyEvent>,
    }

    impl InputSource for MockInputSource {
        fn poll_events(&mut self) -> Result<Vec<RawKeyEvent>> {
            Ok(self.queued.drain(..).collect())
        }

        fn device_kind(&self) -> DeviceKind {
            self.kind
        }
    }

    pub struct MockDeviceMonitor {
        pub queued: VecDeque<DeviceEvent>,
    }

    #[async_trait]
    impl DeviceMonitor for MockDeviceMonitor {
        async fn next_event(&mut self) -> Result<DeviceEvent> {
            self.queued
                .pop_front()
                .ok_or_else(|| crate::error::Error::InvalidState("no more mock events".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeviceConfig {
        DeviceConfig {
            controller_address: "AA:BB:CC:DD:EE:FF".to_string(),
            controller_name: "Wireless Controller".to_string(),
            headphones_address: String::new(),
            headphones_name: "Headphones".to_string(),
            key_map: HashMap::new(),
        }
    }

    #[test]
    fn test_classify_device_by_name_substring() {
        let cfg = config();
        assert_eq!(
            classify_device("Sony Wireless Controller", None, &cfg),
            DeviceKind::Controller
        );
        assert_eq!(classify_device("Bose Headphones", None, &cfg), DeviceKind::Headphones);
        assert_eq!(classify_device("USB Keyboard", None, &cfg), DeviceKind::Other);
    }

    #[test]
    fn test_classify_device_by_address() {
        let cfg = config();
        assert_eq!(
            classify_device("unnamed", Some("AA:BB:CC:DD:EE:FF"), &cfg),
            DeviceKind::Controller
        );
    }

    #[test]
    fn test_controller_connects_on_fourth_add() {
        let mut state = DispatcherState::new();
        assert_eq!(state.on_add(DeviceKind::Controller), AddOutcome::ControllerPending);
        assert_eq!(state.on_add(DeviceKind::Controller), AddOutcome::ControllerPending);
        assert_eq!(state.on_add(DeviceKind::Controller), AddOutcome::ControllerPending);
        assert!(!state.controller_connected);
        assert_eq!(state.on_add(DeviceKind::Controller), AddOutcome::ControllerConnected);
        assert!(state.controller_connected);
    }

    #[test]
    fn test_headphones_connect_immediately() {
        let mut state = DispatcherState::new();
        assert_eq!(state.on_add(DeviceKind::Headphones), AddOutcome::HeadphonesConnected);
        assert!(state.headphones_present);
    }

    #[test]
    fn test_controller_remove_resets_count() {
        let mut state = DispatcherState::new();
        for _ in 0..4 {
            state.on_add(DeviceKind::Controller);
        }
        assert!(state.controller_connected);
        assert_eq!(state.on_remove(DeviceKind::Controller), RemoveOutcome::ControllerDisconnected);
        assert!(!state.controller_connected);
        // Reconnecting needs a fresh run of four adds.
        assert_eq!(state.on_add(DeviceKind::Controller), AddOutcome::ControllerPending);
    }

    #[test]
    fn test_headphones_remove_reports_lost() {
        let mut state = DispatcherState::new();
        state.on_add(DeviceKind::Headphones);
        assert_eq!(state.on_remove(DeviceKind::Headphones), RemoveOutcome::HeadphonesLost);
        assert!(!state.headphones_present);
    }

    #[test]
    fn test_lookup_action_missing_is_none() {
        let mut keys = HashMap::new();
        keys.insert("KEY_A".to_string(), "toggle".to_string());
        assert_eq!(lookup_action(&keys, "KEY_A"), Some("toggle"));
        assert_eq!(lookup_action(&keys, "KEY_B"), None);
    }

    use crate::cues::LoggingCueSink;
    use crate::player::mocks::MockPlayer;

    #[tokio::test]
    async fn test_recognised_key_dispatches_and_unmapped_is_ignored() {
        let pool = crate::test_utils::temp_pool().await;
        let player = MockPlayer::new();
        let queue = QueueEngine::new(pool, std::sync::Arc::new(MockPlayer::new()), "/media");
        let cues = LoggingCueSink;
        let capture = CaptureManager::new("true", "default");
        let cutter = ClozeCutter::new("true");
        let media = MediaConfig::default();
        let (key_tx, key_rx) = mpsc::channel(8);
        let (_mon_tx, mon_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut keys = HashMap::new();
        keys.insert("KEY_X".to_string(), "toggle".to_string());
        keys.insert("KEY_Y".to_string(), "start-clozing".to_string());
        let cfg = DeviceConfig {
            controller_address: String::new(),
            controller_name: "Wireless Controller".to_string(),
            headphones_address: String::new(),
            headphones_name: "Headphones".to_string(),
            key_map: keys,
        };

        let handle = tokio::spawn(async move {
            run(key_rx, mon_rx, cfg, &queue, &player, &cues, &capture, &cutter, &media, &[], shutdown_rx).await;
        });

        // "toggle" is in Topic's table: dispatches. "start-clozing" is not: ignored.
        key_tx
            .send(RawKeyEvent { keycode: "KEY_X".to_string(), pressed: true })
            .await
            .unwrap();
        key_tx
            .send(RawKeyEvent { keycode: "KEY_Y".to_string(), pressed: true })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_headphones_lost_restarts_audio_daemon() {
        let pool = crate::test_utils::temp_pool().await;
        let player = MockPlayer::new();
        let queue = QueueEngine::new(pool, std::sync::Arc::new(MockPlayer::new()), "/media");
        let cues = LoggingCueSink;
        let capture = CaptureManager::new("true", "default");
        let cutter = ClozeCutter::new("true");
        let media = MediaConfig::default();
        let (_key_tx, key_rx) = mpsc::channel(8);
        let (mon_tx, mon_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = config();

        let handle = tokio::spawn(async move {
            run(
                key_rx,
                mon_rx,
                cfg,
                &queue,
                &player,
                &cues,
                &capture,
                &cutter,
                &media,
                &["true".to_string()],
                shutdown_rx,
            )
            .await;
        });

        mon_tx
            .send(DeviceEvent {
                action: DeviceAction::Add,
                node: PathBuf::from("/dev/input/event3"),
                parent_name: "Bose Headphones".to_string(),
                parent_address: None,
            })
            .await
            .unwrap();
        mon_tx
            .send(DeviceEvent {
                action: DeviceAction::Remove,
                node: PathBuf::from("/dev/input/event3"),
                parent_name: "Bose Headphones".to_string(),
                parent_address: None,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
