//! Queue Engine: loads and navigates the five playable queues and the
//! archive/export actions that operate against whichever entity is
//! currently playing.
//!
//! A queue is composed by delegation, not inheritance: [`QueueId`] names
//! *what* to load, [`policy_for`] names the fixed `{repeat, single,
//! action_table}` triple that comes with it, and the loader functions below
//! do the actual candidate-set → relative-path → player.load_queue pipeline.
//! There is no base "Queue" type further components subclass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::db;
use crate::error::{Error, Result};
use crate::model::{Extract, Item, Topic};
use crate::player::PlayerControl;

/// Which queue is loaded. Local queues carry the id of their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueId {
    GlobalTopic,
    GlobalExtract,
    GlobalItem,
    LocalExtract { topic_id: i64 },
    LocalItem { extract_id: i64 },
}

impl QueueId {
    /// The entity kind the Session's active track belongs to while this
    /// queue is loaded, used by [`archive_current`]/[`toggle_to_export`] to
    /// know which table to resolve the current path against.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            QueueId::GlobalTopic => EntityKind::Topic,
            QueueId::GlobalExtract | QueueId::LocalExtract { .. } => EntityKind::Extract,
            QueueId::GlobalItem | QueueId::LocalItem { .. } => EntityKind::Item,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Topic,
    Extract,
    Item,
}

/// Which action table the Session should activate alongside a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTable {
    Topic,
    Recording,
    Extract,
    Clozing,
    Item,
}

/// The logical actions valid while `table` is active. A keycode that maps
/// to an action outside this set is treated the same as an unmapped
/// keycode: a silent no-op, not a failure.
pub fn actions_for_table(table: ActionTable) -> &'static [&'static str] {
    match table {
        ActionTable::Topic => &[
            "toggle",
            "prev-topic",
            "next-topic",
            "seek-back",
            "seek-fwd",
            "load-local-extracts",
            "start-recording",
            "vol-up",
            "vol-down",
            "switch-global-extracts",
            "archive-topic",
        ],
        ActionTable::Recording => &["stop-recording"],
        ActionTable::Extract => &[
            "toggle",
            "prev",
            "next",
            "stutter-back",
            "stutter-fwd",
            "start-clozing",
            "get-extract-topic",
            "get-extract-items",
            "vol-up",
            "vol-down",
            "archive-extract",
            "toggle-to-export",
            "switch-global-topics",
        ],
        ActionTable::Clozing => &["toggle", "stutter-back", "stutter-fwd", "stop-clozing"],
        ActionTable::Item => &[
            "toggle",
            "prev",
            "next",
            "archive-item",
            "get-item-extract",
            "switch-global-topics",
        ],
    }
}

/// The fixed transport policy and action table a queue identity carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub repeat: bool,
    pub single: bool,
    pub action_table: ActionTable,
}

/// The `{repeat, single, action table}` triple fixed for each queue identity.
pub fn policy_for(id: QueueId) -> QueuePolicy {
    match id {
        QueueId::GlobalTopic => QueuePolicy {
            repeat: true,
            single: false,
            action_table: ActionTable::Topic,
        },
        QueueId::GlobalExtract | QueueId::LocalExtract { .. } => QueuePolicy {
            repeat: true,
            single: true,
            action_table: ActionTable::Extract,
        },
        QueueId::GlobalItem | QueueId::LocalItem { .. } => QueuePolicy {
            repeat: true,
            single: true,
            action_table: ActionTable::Item,
        },
    }
}

/// Move `head`, if present, to the front of `paths`, preserving the
/// relative order of everything else.
fn reorder_with_head(mut paths: Vec<String>, head: &str) -> Vec<String> {
    if let Some(pos) = paths.iter().position(|p| p == head) {
        let entry = paths.remove(pos);
        paths.insert(0, entry);
    }
    paths
}

/// Drives queue loads and content-lifecycle actions against the Content
/// Store and the external player.
pub struct QueueEngine {
    pool: SqlitePool,
    player: Arc<dyn PlayerControl>,
    media_root: PathBuf,
}

impl QueueEngine {
    pub fn new(pool: SqlitePool, player: Arc<dyn PlayerControl>, media_root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            player,
            media_root: media_root.into(),
        }
    }

    /// Expose the underlying pool for the Content Store calls the Input
    /// Dispatcher's action handlers make directly (extract/item lifecycle).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn to_relative(&self, absolute: &str) -> Option<String> {
        Path::new(absolute)
            .strip_prefix(&self.media_root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    async fn candidate_paths(&self, id: QueueId) -> Result<Vec<String>> {
        let paths: Vec<String> = match id {
            QueueId::GlobalTopic => db::topics_outstanding(&self.pool)
                .await?
                .into_iter()
                .map(|t| t.filepath)
                .collect(),
            QueueId::GlobalExtract => db::extracts_outstanding(&self.pool)
                .await?
                .into_iter()
                .map(|e| e.filepath)
                .collect(),
            QueueId::GlobalItem => db::items_outstanding(&self.pool)
                .await?
                .into_iter()
                .filter_map(|i| i.question_filepath)
                .collect(),
            QueueId::LocalExtract { topic_id } => db::extracts_of_topic(&self.pool, topic_id)
                .await?
                .into_iter()
                .map(|e| e.filepath)
                .collect(),
            QueueId::LocalItem { extract_id } => db::items_of_extract(&self.pool, extract_id)
                .await?
                .into_iter()
                .filter_map(|i| i.question_filepath)
                .collect(),
        };
        Ok(paths
            .into_iter()
            .filter_map(|abs| self.to_relative(&abs))
            .collect())
    }

    /// Load queue `id`, head-pinned to `head` (a relative path) if given.
    /// Fails with [`Error::Empty`] and leaves the caller's current queue
    /// untouched when nothing survives the `player_recognises` filter.
    pub async fn load(&self, id: QueueId, head: Option<&str>) -> Result<QueuePolicy> {
        let mut candidates = self.candidate_paths(id).await?;
        if let Some(head) = head {
            candidates = reorder_with_head(candidates, head);
        }

        let mut recognised = Vec::with_capacity(candidates.len());
        for path in candidates {
            if self.player.player_recognises(&path).await? {
                recognised.push(path);
            }
        }
        if recognised.is_empty() {
            return Err(Error::Empty);
        }

        self.player.load_queue(&recognised).await?;
        let policy = policy_for(id);
        self.player.repeat(policy.repeat).await?;
        self.player.single(policy.single).await?;
        Ok(policy)
    }

    /// *Topic → local-extract*: children of the currently-playing Topic.
    pub async fn topic_to_local_extract(&self, topic_id: i64) -> Result<QueuePolicy> {
        self.load(QueueId::LocalExtract { topic_id }, None).await
    }

    /// *Extract → global-topic*: all outstanding Topics, head-pinned to the
    /// Extract's parent, then seek into it at the Extract's `startstamp`.
    pub async fn extract_to_global_topic(&self, extract: &Extract, parent: &Topic) -> Result<QueuePolicy> {
        let head = self.to_relative(&parent.filepath);
        let policy = self.load(QueueId::GlobalTopic, head.as_deref()).await?;
        self.player.seek_to(extract.startstamp).await?;
        Ok(policy)
    }

    /// *Extract → local-item*: children of the currently-playing Extract.
    pub async fn extract_to_local_item(&self, extract_id: i64) -> Result<QueuePolicy> {
        self.load(QueueId::LocalItem { extract_id }, None).await
    }

    /// *Item → local-extract*: siblings of the Item's parent Extract
    /// (children of the grandparent Topic), head-pinned to the parent.
    pub async fn item_to_local_extract(&self, parent_extract: &Extract) -> Result<QueuePolicy> {
        let head = self.to_relative(&parent_extract.filepath);
        self.load(
            QueueId::LocalExtract {
                topic_id: parent_extract.topic_id,
            },
            head.as_deref(),
        )
        .await
    }

    /// Resolve the currently-playing track to a row in `kind`'s table.
    async fn resolve_current(&self, kind: EntityKind) -> Result<CurrentEntity> {
        let track = self.player.current_track().await?;
        let Some(absolute) = track.absolute else {
            return Err(Error::InvalidState("no current track".into()));
        };
        let path = absolute.to_string_lossy().to_string();
        let not_found = || Error::not_found(format!("no content-store row backing current track {path}"));
        match kind {
            EntityKind::Topic => Ok(CurrentEntity::Topic(
                db::find_topic_by_path(&self.pool, &path).await?.ok_or_else(not_found)?,
            )),
            EntityKind::Extract => Ok(CurrentEntity::Extract(
                db::find_extract_by_path(&self.pool, &path).await?.ok_or_else(not_found)?,
            )),
            EntityKind::Item => Ok(CurrentEntity::Item(
                db::find_item_by_question_path(&self.pool, &path)
                    .await?
                    .ok_or_else(not_found)?,
            )),
        }
    }

    /// Archive the entity backing the currently-playing track. Idempotent.
    pub async fn archive_current(&self, kind: EntityKind) -> Result<()> {
        match self.resolve_current(kind).await? {
            CurrentEntity::Topic(t) => db::set_topic_archived(&self.pool, t.id, true).await,
            CurrentEntity::Extract(e) => db::set_extract_archived(&self.pool, e.id, true).await,
            CurrentEntity::Item(i) => db::set_item_archived(&self.pool, i.id, true).await,
        }
    }

    /// Flip `Extract.to_export` for the currently-playing extract.
    pub async fn toggle_to_export(&self) -> Result<()> {
        let extract = self.current_extract().await?;
        db::set_extract_to_export(&self.pool, extract.id, !extract.to_export).await
    }

    /// Resolve the currently-playing track to its backing Topic.
    pub async fn current_topic(&self) -> Result<Topic> {
        match self.resolve_current(EntityKind::Topic).await? {
            CurrentEntity::Topic(t) => Ok(t),
            _ => unreachable!("resolve_current(Topic) only returns Topic"),
        }
    }

    /// Resolve the currently-playing track to its backing Extract.
    pub async fn current_extract(&self) -> Result<Extract> {
        match self.resolve_current(EntityKind::Extract).await? {
            CurrentEntity::Extract(e) => Ok(e),
            _ => unreachable!("resolve_current(Extract) only returns Extract"),
        }
    }

    /// Resolve the currently-playing track to its backing Item.
    pub async fn current_item(&self) -> Result<Item> {
        match self.resolve_current(EntityKind::Item).await? {
            CurrentEntity::Item(i) => Ok(i),
            _ => unreachable!("resolve_current(Item) only returns Item"),
        }
    }

    /// Look up an Extract by id, for navigation steps that already know
    /// the id (e.g. an Item's parent) rather than reading it off the
    /// currently-playing track.
    pub async fn extract_by_id(&self, id: i64) -> Result<Extract> {
        db::get_extract(&self.pool, id).await
    }

    /// Look up a Topic by id, for navigation steps that already know the
    /// id (e.g. an Extract's parent) rather than reading it off the
    /// currently-playing track.
    pub async fn topic_by_id(&self, id: i64) -> Result<Topic> {
        db::get_topic(&self.pool, id).await
    }
}

enum CurrentEntity {
    Topic(Topic),
    Extract(Extract),
    Item(Item),
}
