//! Recording aggregate and its processing state machine.
//!
//! The recording's `status` column is the durable state machine driving
//! the job pipeline. A killed process resumes from the persisted stage,
//! so transitions are only ever written after the stage's work has
//! committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::segment::{Segment, SegmentTranscription};

/// Durable processing status of a recording.
///
/// Advances `Pending → Uploading → Transcribing → Moderating → Analyzing →
/// Saving → Succeeded`. `Failed` is reachable from any active state.
/// `Degraded` is reachable only from `Analyzing`/`Saving`, once the
/// transcript has already been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Pending,
    Uploading,
    Transcribing,
    Moderating,
    Analyzing,
    Saving,
    Succeeded,
    Failed,
    Degraded,
}

impl RecordingStatus {
    /// Terminal states are never resumed by the queue's startup scan.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Degraded)
    }

    /// The next stage in the happy path, if any.
    pub fn next_stage(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Uploading),
            Self::Uploading => Some(Self::Transcribing),
            Self::Transcribing => Some(Self::Moderating),
            Self::Moderating => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Saving),
            Self::Saving => Some(Self::Succeeded),
            _ => None,
        }
    }

    /// Whether moving to `next` is a legal state-machine transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        // Degraded requires a persisted transcript, which exists only
        // once the job has passed Transcribing.
        if next == Self::Degraded {
            return matches!(self, Self::Analyzing | Self::Saving);
        }
        self.next_stage() == Some(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Transcribing => "transcribing",
            Self::Moderating => "moderating",
            Self::Analyzing => "analyzing",
            Self::Saving => "saving",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Degraded => "degraded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "uploading" => Self::Uploading,
            "transcribing" => Self::Transcribing,
            "moderating" => Self::Moderating,
            "analyzing" => Self::Analyzing,
            "saving" => Self::Saving,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "degraded" => Self::Degraded,
            _ => return None,
        })
    }
}

/// Status of the recording's study guide, tracked separately from the
/// pipeline stage so a degraded recording can retry the guide alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideStatus {
    NotStarted,
    Generating,
    Ready,
    Failed,
}

impl GuideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "not_started" => Self::NotStarted,
            "generating" => Self::Generating,
            "ready" => Self::Ready,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// Caller-facing job state, derived from the recording and its segments.
///
/// Not persisted separately: `Degraded` means the transcript succeeded but
/// the guide did not (still viewable, guide retryable); `Error` means the
/// transcript itself failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Ready,
    Degraded,
    Error,
}

/// A scripture reference, e.g. "John 3:16" or "Romans 8:28-30".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptureRef {
    pub book: String,
    pub chapter: u16,
    pub verse_start: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verse_end: Option<u16>,
}

impl std::fmt::Display for ScriptureRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse_start)?;
        if let Some(end) = self.verse_end {
            write!(f, "-{}", end)?;
        }
        Ok(())
    }
}

/// The aggregate root: one captured or imported sermon recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    pub title: String,
    pub speaker: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub duration_secs: f64,

    /// The durable pipeline stage.
    pub status: RecordingStatus,

    pub guide_status: GuideStatus,

    /// Processing-format version; bumped when the pipeline's output
    /// shape changes so old recordings can be re-processed.
    pub format_version: u32,

    /// References extracted from the transcript text.
    pub scripture_refs: Vec<ScriptureRef>,

    /// Soft-delete tombstone. Deleted recordings are excluded from
    /// processing and sync selection, but retained so the deletion
    /// propagates.
    pub deleted: bool,

    /// Set by every local mutation, cleared only on remote ack.
    pub needs_sync: bool,

    /// Drives segment byte upload separately from record metadata.
    pub needs_audio_upload: bool,

    /// Last-write-wins merge key; remote value wins on pull.
    pub updated_at: DateTime<Utc>,

    /// Last processing error, persisted so it survives restart.
    pub last_error: Option<String>,
}

impl Recording {
    pub fn new(title: impl Into<String>, speaker: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            speaker,
            recorded_at: now,
            duration_secs: 0.0,
            status: RecordingStatus::Pending,
            guide_status: GuideStatus::NotStarted,
            format_version: CURRENT_FORMAT_VERSION,
            scripture_refs: Vec::new(),
            deleted: false,
            needs_sync: true,
            needs_audio_upload: true,
            updated_at: now,
            last_error: None,
        }
    }

    /// Derive the caller-facing job state from the durable status and
    /// segment transcription outcomes.
    pub fn job_state(&self, segments: &[Segment]) -> JobState {
        match self.status {
            RecordingStatus::Pending => JobState::Pending,
            RecordingStatus::Succeeded => JobState::Ready,
            RecordingStatus::Degraded => JobState::Degraded,
            RecordingStatus::Failed => {
                // A failure with every segment transcribed means only the
                // guide was lost; the transcript is still viewable.
                if !segments.is_empty()
                    && segments
                        .iter()
                        .all(|s| s.transcription_status == SegmentTranscription::Done)
                {
                    JobState::Degraded
                } else {
                    JobState::Error
                }
            }
            _ => JobState::Processing,
        }
    }
}

/// Current processing-format version.
pub const CURRENT_FORMAT_VERSION: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut status = RecordingStatus::Pending;
        let path = [
            RecordingStatus::Uploading,
            RecordingStatus::Transcribing,
            RecordingStatus::Moderating,
            RecordingStatus::Analyzing,
            RecordingStatus::Saving,
            RecordingStatus::Succeeded,
        ];
        for next in path {
            assert!(status.can_transition_to(next), "{:?} -> {:?}", status, next);
            status = next;
        }
        assert!(status.is_terminal());
    }

    #[test]
    fn test_no_stage_skipping() {
        assert!(!RecordingStatus::Pending.can_transition_to(RecordingStatus::Transcribing));
        assert!(!RecordingStatus::Uploading.can_transition_to(RecordingStatus::Moderating));
    }

    #[test]
    fn test_failed_reachable_from_active_states_only() {
        assert!(RecordingStatus::Uploading.can_transition_to(RecordingStatus::Failed));
        assert!(RecordingStatus::Saving.can_transition_to(RecordingStatus::Failed));
        assert!(!RecordingStatus::Succeeded.can_transition_to(RecordingStatus::Failed));
        assert!(!RecordingStatus::Degraded.can_transition_to(RecordingStatus::Failed));
    }

    #[test]
    fn test_degraded_only_after_transcription() {
        assert!(RecordingStatus::Analyzing.can_transition_to(RecordingStatus::Degraded));
        assert!(RecordingStatus::Saving.can_transition_to(RecordingStatus::Degraded));
        assert!(!RecordingStatus::Transcribing.can_transition_to(RecordingStatus::Degraded));
        assert!(!RecordingStatus::Uploading.can_transition_to(RecordingStatus::Degraded));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RecordingStatus::Pending,
            RecordingStatus::Uploading,
            RecordingStatus::Transcribing,
            RecordingStatus::Moderating,
            RecordingStatus::Analyzing,
            RecordingStatus::Saving,
            RecordingStatus::Succeeded,
            RecordingStatus::Failed,
            RecordingStatus::Degraded,
        ] {
            assert_eq!(RecordingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RecordingStatus::parse("bogus"), None);
    }

    #[test]
    fn test_scripture_ref_display() {
        let single = ScriptureRef {
            book: "John".into(),
            chapter: 3,
            verse_start: 16,
            verse_end: None,
        };
        assert_eq!(single.to_string(), "John 3:16");

        let range = ScriptureRef {
            book: "Romans".into(),
            chapter: 8,
            verse_start: 28,
            verse_end: Some(30),
        };
        assert_eq!(range.to_string(), "Romans 8:28-30");
    }

    #[test]
    fn test_new_recording_is_dirty() {
        let rec = Recording::new("Sunday Service", Some("Pastor Dave".into()));
        assert_eq!(rec.status, RecordingStatus::Pending);
        assert!(rec.needs_sync);
        assert!(rec.needs_audio_upload);
        assert!(!rec.deleted);
    }
}
