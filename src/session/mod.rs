//! Session State Machine: the four state variables that gate which
//! keymap is active and which actions are reachable.
//!
//! Represented as an immutable, swappable value — [`Session::transition`]
//! never mutates individual fields; it produces the next whole `Session`
//! and the caller swaps it in atomically. This avoids the inheritance-based
//! per-mode subclassing the original source used: modes are data (a
//! [`Mode`] variant plus the booleans it implies), not distinct types.

use crate::queue::{ActionTable, QueueId};

/// Primary mode, mirroring the transition diagram: Topic/Recording form one
/// branch, Extract/Clozing/Item the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Topic,
    Recording,
    Extract,
    Clozing,
    Item,
}

/// The four state variables the Input Dispatcher reads and writes. Only the
/// Input Dispatcher task touches this; the Progress Tracker never does.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub mode: Mode,
    pub current_queue: QueueId,
    pub recording: bool,
    pub clozing: bool,
    pub active_keys: ActionTable,
    /// The Extract row backing the in-progress recording, set by the caller
    /// once the Content Store has assigned it an id. `None` outside of
    /// `Recording` mode.
    pub recording_extract_id: Option<i64>,
    /// The Item row backing the in-progress cloze, set by the caller once
    /// the Content Store has assigned it an id. `None` outside of
    /// `Clozing` mode.
    pub clozing_item_id: Option<i64>,
}

impl Session {
    /// Initial state: `global-topic`, nothing recording or clozing.
    pub fn initial() -> Self {
        Self {
            mode: Mode::Topic,
            current_queue: QueueId::GlobalTopic,
            recording: false,
            clozing: false,
            active_keys: ActionTable::Topic,
            recording_extract_id: None,
            clozing_item_id: None,
        }
    }

    /// `start-recording`: valid only from `global-topic`. The caller fills
    /// in `recording_extract_id` once the Content Store has created the
    /// backing Extract row.
    pub fn start_recording(&self) -> Option<Self> {
        if self.mode != Mode::Topic || self.current_queue != QueueId::GlobalTopic {
            return None;
        }
        Some(Self {
            mode: Mode::Recording,
            recording: true,
            active_keys: ActionTable::Recording,
            recording_extract_id: None,
            ..self.clone()
        })
    }

    /// `stop-recording`: returns to Topic mode, `single` restored by the
    /// caller's next player call.
    pub fn stop_recording(&self) -> Option<Self> {
        if self.mode != Mode::Recording {
            return None;
        }
        Some(Self {
            mode: Mode::Topic,
            recording: false,
            active_keys: ActionTable::Topic,
            recording_extract_id: None,
            ..self.clone()
        })
    }

    /// Topic → local-extract: load a Topic's children.
    pub fn load_local_extract(&self, topic_id: i64) -> Option<Self> {
        if self.mode != Mode::Topic {
            return None;
        }
        Some(Self {
            mode: Mode::Extract,
            current_queue: QueueId::LocalExtract { topic_id },
            active_keys: ActionTable::Extract,
            ..self.clone()
        })
    }

    /// Extract ↔ global-topic, either direction via the "A" shortcut or a
    /// plain queue switch.
    pub fn switch_to_global_topic(&self) -> Option<Self> {
        if self.mode == Mode::Recording || self.mode == Mode::Clozing {
            return None;
        }
        Some(Self {
            mode: Mode::Topic,
            current_queue: QueueId::GlobalTopic,
            active_keys: ActionTable::Topic,
            ..self.clone()
        })
    }

    pub fn switch_to_global_extract(&self) -> Option<Self> {
        if self.mode == Mode::Recording || self.mode == Mode::Clozing {
            return None;
        }
        Some(Self {
            mode: Mode::Extract,
            current_queue: QueueId::GlobalExtract,
            active_keys: ActionTable::Extract,
            ..self.clone()
        })
    }

    /// `start-clozing`: valid only from an extract queue. The caller fills
    /// in `clozing_item_id` once the Content Store has created the backing
    /// Item row.
    pub fn start_clozing(&self) -> Option<Self> {
        if self.mode != Mode::Extract {
            return None;
        }
        Some(Self {
            mode: Mode::Clozing,
            clozing: true,
            active_keys: ActionTable::Clozing,
            clozing_item_id: None,
            ..self.clone()
        })
    }

    /// `stop-clozing`: back to Extract mode with the Extract-keys table.
    pub fn stop_clozing(&self) -> Option<Self> {
        if self.mode != Mode::Clozing {
            return None;
        }
        Some(Self {
            mode: Mode::Extract,
            clozing: false,
            active_keys: ActionTable::Extract,
            clozing_item_id: None,
            ..self.clone()
        })
    }

    /// Extract → local-item: load an Extract's children.
    pub fn load_local_item(&self, extract_id: i64) -> Option<Self> {
        if self.mode != Mode::Extract {
            return None;
        }
        Some(Self {
            mode: Mode::Item,
            current_queue: QueueId::LocalItem { extract_id },
            active_keys: ActionTable::Item,
            ..self.clone()
        })
    }

    /// Item → local-extract: back up to the parent Extract's siblings.
    pub fn load_local_extract_from_item(&self, topic_id: i64) -> Option<Self> {
        if self.mode != Mode::Item {
            return None;
        }
        Some(Self {
            mode: Mode::Extract,
            current_queue: QueueId::LocalExtract { topic_id },
            active_keys: ActionTable::Extract,
            ..self.clone()
        })
    }
}
