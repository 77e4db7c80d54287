//! Core data models for the content graph.
//!
//! Defines the three-level hierarchy [`Topic`] → [`Extract`] → [`Item`],
//! plus the per-entity [`TopicEvent`], [`ExtractEvent`], [`ItemEvent`]
//! playback logs. These map directly onto the `topics`, `extracts`,
//! `items`, `topic_events`, `extract_events`, `item_events` tables.

use sqlx::FromRow;

/// A full, originally-ingested audio recording.
#[derive(Debug, Clone, FromRow)]
pub struct Topic {
    pub id: i64,
    /// Canonical absolute filepath, unique.
    pub filepath: String,
    /// Identifier from the external ingestion source (e.g. an upload id).
    pub source_id: String,
    pub title: String,
    pub duration: f64,
    /// Current playback position, seconds. Monotone non-decreasing in normal operation.
    pub cur_timestamp: f64,
    pub playback_rate: f64,
    pub downloaded: bool,
    pub archived: bool,
    pub deleted: bool,
    /// Export-scheduler bookkeeping carried over from the original content pipeline.
    pub sm_element_id: i64,
    pub sm_priority: i64,
    pub created_at: String,
}

impl Topic {
    /// Fraction of the topic that has been listened to, in `[0, 1]` for a well-formed duration.
    pub fn progress(&self) -> f64 {
        if self.duration <= 0.0 {
            0.0
        } else {
            self.cur_timestamp / self.duration
        }
    }
}

/// A user-recorded contiguous segment of a [`Topic`].
#[derive(Debug, Clone, FromRow)]
pub struct Extract {
    pub id: i64,
    pub filepath: String,
    pub topic_id: i64,
    /// Seconds into the parent topic where recording began.
    pub startstamp: f64,
    /// Seconds into the parent topic where recording ended; null while recording is in progress.
    pub endstamp: Option<f64>,
    pub archived: bool,
    pub deleted: bool,
    pub exported: bool,
    pub to_export: bool,
    pub created_at: String,
}

impl Extract {
    /// Length of the extract in seconds, or 0 if recording hasn't finished.
    pub fn length(&self) -> f64 {
        self.endstamp.map_or(0.0, |end| end - self.startstamp)
    }
}

/// A (question, answer) audio pair built from a cloze span inside an [`Extract`].
#[derive(Debug, Clone, FromRow)]
pub struct Item {
    pub id: i64,
    pub extract_id: i64,
    pub question_filepath: Option<String>,
    pub answer_filepath: Option<String>,
    /// Seconds into the parent extract's local timeline.
    pub cloze_startstamp: Option<f64>,
    pub cloze_endstamp: Option<f64>,
    pub archived: bool,
    pub deleted: bool,
    pub exported: bool,
    pub created_at: String,
}

impl Item {
    /// The cloze pipeline has produced both output files.
    pub fn is_cut(&self) -> bool {
        self.question_filepath.is_some() && self.answer_filepath.is_some()
    }

    /// Length of the cloze span in seconds, if both boundaries are set.
    pub fn cloze_length(&self) -> Option<f64> {
        match (self.cloze_startstamp, self.cloze_endstamp) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }
}

/// A single play/pause/stop observation, shared shape across all three event tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Play,
    Pause,
    Stop,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Play => "play",
            EventKind::Pause => "pause",
            EventKind::Stop => "stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "play" => Some(EventKind::Play),
            "pause" => Some(EventKind::Pause),
            "stop" => Some(EventKind::Stop),
            _ => None,
        }
    }
}

/// A playback observation logged against a [`Topic`].
#[derive(Debug, Clone, FromRow)]
pub struct TopicEvent {
    pub id: i64,
    pub topic_id: i64,
    pub event: String,
    pub timestamp: f64,
    pub duration: f64,
    pub created_at: String,
}

/// A playback observation logged against an [`Extract`].
#[derive(Debug, Clone, FromRow)]
pub struct ExtractEvent {
    pub id: i64,
    pub extract_id: i64,
    pub event: String,
    pub timestamp: f64,
    pub duration: f64,
    pub created_at: String,
}

/// A playback observation logged against an [`Item`].
#[derive(Debug, Clone, FromRow)]
pub struct ItemEvent {
    pub id: i64,
    pub item_id: i64,
    pub event: String,
    pub timestamp: f64,
    pub duration: f64,
    pub created_at: String,
}
