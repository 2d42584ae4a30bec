//! Bookmarks: user-created markers into a recording's timeline.
//!
//! Bookmarks are created and edited independently of processing state and
//! sync with the same dirty-flag/tombstone discipline as recordings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recording::ScriptureRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: Uuid,
    pub recording_id: Uuid,

    /// Offset into the recording, in seconds.
    pub position_secs: f64,

    pub note: String,
    pub label: Option<String>,
    pub scripture_ref: Option<ScriptureRef>,

    pub deleted: bool,
    pub needs_sync: bool,
    pub updated_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(recording_id: Uuid, position_secs: f64, note: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recording_id,
            position_secs,
            note: note.into(),
            label: None,
            scripture_ref: None,
            deleted: false,
            needs_sync: true,
            updated_at: Utc::now(),
        }
    }
}
