//! Production [`InputSource`]/[`DeviceMonitor`] built on `evdev` and `udev`.
//!
//! Both read through `tokio::io::unix::AsyncFd` so the dispatch loop is one
//! `tokio::select!` over every open device plus the hotplug monitor,
//! generalizing the teacher's `notify`-based `FileWatcher` from filesystem
//! events to kernel input events.

use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use evdev::Device;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::{classify_device, DeviceAction, DeviceEvent, DeviceKind, DeviceMonitor, InputSource, RawKeyEvent};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};

/// An open `/dev/input/event*` node, read through `AsyncFd` so the
/// dispatcher can `select!` across many of these without a reader thread
/// per device.
pub struct EvdevSource {
    device: AsyncFd<Device>,
    kind: DeviceKind,
}

impl EvdevSource {
    pub fn open(path: &Path, kind: DeviceKind) -> Result<Self> {
        let device = Device::open(path).map_err(|e| Error::Config(format!("opening {}: {e}", path.display())))?;
        let device = AsyncFd::new(device).map_err(|e| Error::Config(format!("registering {}: {e}", path.display())))?;
        Ok(Self { device, kind })
    }

    /// Await readiness, then drain pending key events. Callers select! over
    /// several of these; each call only returns once this device is ready.
    pub async fn wait_and_poll(&mut self) -> Result<Vec<RawKeyEvent>> {
        let mut guard = self
            .device
            .readable_mut()
            .await
            .map_err(|e| Error::Config(e.to_string()))?;
        let result = fetch_key_events(guard.get_inner_mut());
        guard.clear_ready();
        result
    }
}

/// Read errors here mean the device vanished between readiness and read;
/// the dispatcher tolerates this and just drops the device.
fn fetch_key_events(device: &mut Device) -> Result<Vec<RawKeyEvent>> {
    let events = match device.fetch_events() {
        Ok(events) => events,
        Err(_) => return Ok(Vec::new()),
    };

    Ok(events
        .filter(|event| event.event_type() == evdev::EventType::KEY)
        .filter(|event| event.value() == 1)
        .map(|event| RawKeyEvent {
            keycode: format!("KEY_{}", event.code()),
            pressed: true,
        })
        .collect())
}

impl InputSource for EvdevSource {
    fn poll_events(&mut self) -> Result<Vec<RawKeyEvent>> {
        fetch_key_events(self.device.get_mut())
    }

    fn device_kind(&self) -> DeviceKind {
        self.kind
    }
}

/// Watches udev for input-device add/remove, classifying each by the
/// parent device's name/MAC as it arrives.
pub struct UdevMonitor {
    socket: AsyncFd<udev::MonitorSocket>,
}

impl UdevMonitor {
    pub fn new() -> Result<Self> {
        let builder = udev::MonitorBuilder::new()
            .map_err(|e| Error::Config(format!("udev monitor: {e}")))?
            .match_subsystem("input")
            .map_err(|e| Error::Config(format!("udev monitor: {e}")))?;
        let socket = builder.listen().map_err(|e| Error::Config(format!("udev monitor: {e}")))?;
        let fd = socket.as_raw_fd();
        let async_socket = AsyncFd::with_interest(socket, tokio::io::Interest::READABLE)
            .map_err(|e| Error::Config(format!("registering udev fd {fd}: {e}")))?;
        Ok(Self { socket: async_socket })
    }
}

#[async_trait]
impl DeviceMonitor for UdevMonitor {
    async fn next_event(&mut self) -> Result<DeviceEvent> {
        loop {
            let mut guard = self
                .socket
                .readable_mut()
                .await
                .map_err(|e| Error::Config(e.to_string()))?;

            let event = guard.get_inner_mut().iter().next();
            guard.clear_ready();

            let Some(event) = event else { continue };
            let Some(node) = event.devnode().map(PathBuf::from) else { continue };

            let action = match event.event_type() {
                udev::EventType::Add => super::DeviceAction::Add,
                udev::EventType::Remove => super::DeviceAction::Remove,
                _ => continue,
            };

            let parent = event.parent();
            let parent_name = parent
                .as_ref()
                .and_then(|p| p.attribute_value("name"))
                .map(|v| v.to_string_lossy().to_string())
                .unwrap_or_default();
            let parent_address = parent
                .as_ref()
                .and_then(|p| p.attribute_value("address"))
                .map(|v| v.to_string_lossy().to_string());

            return Ok(DeviceEvent {
                action,
                node,
                parent_name,
                parent_address,
            });
        }
    }
}

/// Watches udev for hotplug, forwarding every event to `mon_tx` for the
/// dispatcher's presence bookkeeping and, for controller/headphones Adds,
/// opening the node and spawning a task that forwards its key events to
/// `key_tx`. Runs until either channel closes.
pub async fn run_hardware_feed(
    config: DeviceConfig,
    key_tx: mpsc::Sender<RawKeyEvent>,
    mon_tx: mpsc::Sender<DeviceEvent>,
) -> Result<()> {
    let mut monitor = UdevMonitor::new()?;
    loop {
        let event = monitor.next_event().await?;
        let kind = classify_device(&event.parent_name, event.parent_address.as_deref(), &config);

        if event.action == DeviceAction::Add && matches!(kind, DeviceKind::Controller | DeviceKind::Headphones) {
            match EvdevSource::open(&event.node, kind) {
                Ok(source) => spawn_reader(source, key_tx.clone()),
                Err(e) => tracing::warn!(node = %event.node.display(), error = %e, "failed to open input device"),
            }
        }

        if mon_tx.send(event).await.is_err() {
            return Ok(());
        }
    }
}

fn spawn_reader(mut source: EvdevSource, key_tx: mpsc::Sender<RawKeyEvent>) {
    tokio::spawn(async move {
        loop {
            match source.wait_and_poll().await {
                Ok(events) => {
                    for event in events {
                        if key_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(_) => return,
            }
        }
    });
}
