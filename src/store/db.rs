//! SQLite persistence for recordings, segments, transcripts, study guides
//! and bookmarks, plus a full-text index over transcript content.
//!
//! All writes go through here before any caller-visible status change
//! (write-ahead consistency). Complex fields (word timings, waveforms,
//! guide content, scripture refs) are stored as JSON text columns.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Bookmark, GuideStatus, Recording, RecordingStatus, ScriptureRef, Segment,
    SegmentTranscription, StudyGuide, StudyGuideContent, Transcript, UploadStatus, WordTiming,
};
use crate::error::{PipelineError, PipelineResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS recordings (
    id                  TEXT PRIMARY KEY,
    title               TEXT NOT NULL,
    speaker             TEXT,
    recorded_at         TEXT NOT NULL,
    duration_secs       REAL NOT NULL,
    status              TEXT NOT NULL,
    guide_status        TEXT NOT NULL,
    format_version      INTEGER NOT NULL,
    scripture_refs      TEXT NOT NULL,
    deleted             INTEGER NOT NULL,
    needs_sync          INTEGER NOT NULL,
    needs_audio_upload  INTEGER NOT NULL,
    updated_at          TEXT NOT NULL,
    last_error          TEXT
);

CREATE TABLE IF NOT EXISTS segments (
    recording_id          TEXT NOT NULL,
    idx                   INTEGER NOT NULL,
    start_secs            REAL NOT NULL,
    duration_secs         REAL NOT NULL,
    local_path            TEXT NOT NULL,
    remote_path           TEXT,
    byte_size             INTEGER NOT NULL,
    content_hash          TEXT NOT NULL,
    upload_status         TEXT NOT NULL,
    transcription_status  TEXT NOT NULL,
    transcript_fragment   TEXT,
    fragment_words        TEXT,
    waveform              TEXT NOT NULL,
    PRIMARY KEY (recording_id, idx)
);

CREATE TABLE IF NOT EXISTS transcripts (
    recording_id  TEXT PRIMARY KEY,
    text          TEXT NOT NULL,
    language      TEXT NOT NULL,
    words         TEXT NOT NULL,
    confidence    REAL NOT NULL,
    model         TEXT NOT NULL,
    content_hash  TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS transcripts_fts
    USING fts5(recording_id UNINDEXED, text);

CREATE TABLE IF NOT EXISTS study_guides (
    recording_id     TEXT PRIMARY KEY,
    content          TEXT NOT NULL,
    model            TEXT NOT NULL,
    prompt_version   TEXT NOT NULL,
    transcript_hash  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookmarks (
    id             TEXT PRIMARY KEY,
    recording_id   TEXT NOT NULL,
    position_secs  REAL NOT NULL,
    note           TEXT NOT NULL,
    label          TEXT,
    scripture_ref  TEXT,
    deleted        INTEGER NOT NULL,
    needs_sync     INTEGER NOT NULL,
    updated_at     TEXT NOT NULL
);
"#;

/// A full-text search match over transcript content.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub recording_id: Uuid,
    pub snippet: String,
}

/// The local durable store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the store at the given path.
    pub fn open(path: &Path) -> PipelineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Recover the connection even if a previous holder panicked.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =====================================================================
    // Recordings
    // =====================================================================

    pub fn insert_recording(&self, recording: &Recording) -> PipelineResult<()> {
        let refs = to_json(&recording.scripture_refs)?;
        self.conn().execute(
            "INSERT INTO recordings (id, title, speaker, recorded_at, duration_secs,
                 status, guide_status, format_version, scripture_refs, deleted,
                 needs_sync, needs_audio_upload, updated_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                recording.id.to_string(),
                recording.title,
                recording.speaker,
                recording.recorded_at.to_rfc3339(),
                recording.duration_secs,
                recording.status.as_str(),
                recording.guide_status.as_str(),
                recording.format_version,
                refs,
                recording.deleted,
                recording.needs_sync,
                recording.needs_audio_upload,
                recording.updated_at.to_rfc3339(),
                recording.last_error,
            ],
        )?;
        Ok(())
    }

    pub fn get_recording(&self, id: Uuid) -> PipelineResult<Recording> {
        let conn = self.conn();
        let recording = conn
            .query_row(
                "SELECT id, title, speaker, recorded_at, duration_secs, status,
                        guide_status, format_version, scripture_refs, deleted,
                        needs_sync, needs_audio_upload, updated_at, last_error
                 FROM recordings WHERE id = ?1",
                params![id.to_string()],
                row_to_recording,
            )
            .optional()?;

        recording.ok_or(PipelineError::RecordNotFound {
            kind: "recording",
            id: id.to_string(),
        })
    }

    pub fn list_recordings(&self) -> PipelineResult<Vec<Recording>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, speaker, recorded_at, duration_secs, status,
                    guide_status, format_version, scripture_refs, deleted,
                    needs_sync, needs_audio_upload, updated_at, last_error
             FROM recordings WHERE deleted = 0 ORDER BY recorded_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_recording)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Move a recording to the next pipeline stage, enforcing the state
    /// machine. The write commits before the caller observes the change.
    pub fn transition_status(&self, id: Uuid, next: RecordingStatus) -> PipelineResult<()> {
        let current = self.get_recording(id)?.status;
        if !current.can_transition_to(next) {
            return Err(PipelineError::WriteFailed(format!(
                "illegal status transition {} -> {} for recording {}",
                current.as_str(),
                next.as_str(),
                id
            )));
        }

        debug!(recording_id = %id, from = current.as_str(), to = next.as_str(), "status transition");
        self.conn().execute(
            "UPDATE recordings SET status = ?2, needs_sync = 1, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), next.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Rewind a failed or degraded recording to an active stage so a
    /// manual retry can resume it. The normal transition rules treat
    /// terminal states as final, so this is the only path out of them.
    pub fn reset_for_retry(&self, id: Uuid, stage: RecordingStatus) -> PipelineResult<()> {
        let current = self.get_recording(id)?.status;
        if !matches!(
            current,
            RecordingStatus::Failed | RecordingStatus::Degraded
        ) || stage.is_terminal()
        {
            return Err(PipelineError::WriteFailed(format!(
                "cannot reset recording {} from {} to {}",
                id,
                current.as_str(),
                stage.as_str()
            )));
        }

        debug!(recording_id = %id, from = current.as_str(), to = stage.as_str(), "retry reset");
        self.conn().execute(
            "UPDATE recordings SET status = ?2, last_error = NULL, needs_sync = 1,
                    updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), stage.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_guide_status(&self, id: Uuid, status: GuideStatus) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE recordings SET guide_status = ?2, needs_sync = 1, updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Persist a processing error on the recording so it survives restart.
    pub fn record_error(&self, id: Uuid, error: &str) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE recordings SET last_error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), error, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_scripture_refs(&self, id: Uuid, refs: &[ScriptureRef]) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE recordings SET scripture_refs = ?2, needs_sync = 1, updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), to_json(&refs)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_duration(&self, id: Uuid, duration_secs: f64) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE recordings SET duration_secs = ?2, needs_sync = 1, updated_at = ?3
             WHERE id = ?1",
            params![id.to_string(), duration_secs, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_needs_audio_upload(&self, id: Uuid, needs: bool) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE recordings SET needs_audio_upload = ?2 WHERE id = ?1",
            params![id.to_string(), needs],
        )?;
        Ok(())
    }

    /// Recordings whose persisted stage is not terminal; the queue resumes
    /// these on startup. Soft-deleted recordings are excluded.
    pub fn resumable_recordings(&self) -> PipelineResult<Vec<Recording>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, speaker, recorded_at, duration_secs, status,
                    guide_status, format_version, scripture_refs, deleted,
                    needs_sync, needs_audio_upload, updated_at, last_error
             FROM recordings
             WHERE deleted = 0 AND status NOT IN ('succeeded', 'failed', 'degraded')
             ORDER BY recorded_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_recording)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Soft-delete: the row stays for tombstone propagation.
    pub fn mark_recording_deleted(&self, id: Uuid) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE recordings SET deleted = 1, needs_sync = 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn dirty_recordings(&self) -> PipelineResult<Vec<Recording>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, speaker, recorded_at, duration_secs, status,
                    guide_status, format_version, scripture_refs, deleted,
                    needs_sync, needs_audio_upload, updated_at, last_error
             FROM recordings WHERE needs_sync = 1",
        )?;
        let rows = stmt.query_map([], row_to_recording)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Clear the dirty flag only if the row still holds the revision that
    /// was pushed. An edit made while the push was in flight keeps the
    /// flag set.
    pub fn clear_recording_dirty(
        &self,
        id: Uuid,
        pushed_revision: DateTime<Utc>,
    ) -> PipelineResult<bool> {
        let changed = self.conn().execute(
            "UPDATE recordings SET needs_sync = 0 WHERE id = ?1 AND updated_at = ?2",
            params![id.to_string(), pushed_revision.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Apply a remote recording on pull. Remote is authoritative: the row
    /// is replaced wholesale and arrives clean.
    pub fn apply_remote_recording(&self, recording: &Recording) -> PipelineResult<()> {
        let refs = to_json(&recording.scripture_refs)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO recordings (id, title, speaker, recorded_at,
                 duration_secs, status, guide_status, format_version, scripture_refs,
                 deleted, needs_sync, needs_audio_upload, updated_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13)",
            params![
                recording.id.to_string(),
                recording.title,
                recording.speaker,
                recording.recorded_at.to_rfc3339(),
                recording.duration_secs,
                recording.status.as_str(),
                recording.guide_status.as_str(),
                recording.format_version,
                refs,
                recording.deleted,
                recording.needs_audio_upload,
                recording.updated_at.to_rfc3339(),
                recording.last_error,
            ],
        )?;
        Ok(())
    }

    // =====================================================================
    // Segments
    // =====================================================================

    pub fn insert_segment(&self, segment: &Segment) -> PipelineResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO segments (recording_id, idx, start_secs,
                 duration_secs, local_path, remote_path, byte_size, content_hash,
                 upload_status, transcription_status, transcript_fragment,
                 fragment_words, waveform)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                segment.recording_id.to_string(),
                segment.index,
                segment.start_secs,
                segment.duration_secs,
                segment.local_path.to_string_lossy(),
                segment.remote_path,
                segment.byte_size,
                segment.content_hash,
                upload_status_str(segment.upload_status),
                transcription_status_str(segment.transcription_status),
                segment.transcript_fragment,
                to_json(&segment.fragment_words)?,
                to_json(&segment.waveform)?,
            ],
        )?;
        Ok(())
    }

    /// Segments for a recording, in index order.
    pub fn segments_for(&self, recording_id: Uuid) -> PipelineResult<Vec<Segment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT recording_id, idx, start_secs, duration_secs, local_path,
                    remote_path, byte_size, content_hash, upload_status,
                    transcription_status, transcript_fragment, fragment_words,
                    waveform
             FROM segments WHERE recording_id = ?1 ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map(params![recording_id.to_string()], row_to_segment)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn mark_segment_uploaded(
        &self,
        recording_id: Uuid,
        index: u32,
        remote_path: &str,
    ) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE segments SET upload_status = 'uploaded', remote_path = ?3
             WHERE recording_id = ?1 AND idx = ?2",
            params![recording_id.to_string(), index, remote_path],
        )?;
        Ok(())
    }

    /// Persist one segment's transcription outcome (fragment text and word
    /// timings on success), so a later failure never redoes this segment's
    /// work and a retry loses nothing.
    pub fn set_segment_transcription(
        &self,
        recording_id: Uuid,
        index: u32,
        status: SegmentTranscription,
        fragment: Option<(&str, &[WordTiming])>,
    ) -> PipelineResult<()> {
        let (text, words) = match fragment {
            Some((text, words)) => (Some(text), Some(to_json(&words)?)),
            None => (None, None),
        };
        self.conn().execute(
            "UPDATE segments SET transcription_status = ?3, transcript_fragment = ?4,
                 fragment_words = ?5
             WHERE recording_id = ?1 AND idx = ?2",
            params![
                recording_id.to_string(),
                index,
                transcription_status_str(status),
                text,
                words,
            ],
        )?;
        Ok(())
    }

    // =====================================================================
    // Transcripts
    // =====================================================================

    /// Persist the merged transcript and keep the FTS index in step.
    pub fn save_transcript(&self, transcript: &Transcript) -> PipelineResult<()> {
        let conn = self.conn();
        let id = transcript.recording_id.to_string();
        conn.execute(
            "INSERT OR REPLACE INTO transcripts
                 (recording_id, text, language, words, confidence, model, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                transcript.text,
                transcript.language,
                to_json(&transcript.words)?,
                transcript.confidence,
                transcript.model,
                transcript.content_hash,
            ],
        )?;
        conn.execute(
            "DELETE FROM transcripts_fts WHERE recording_id = ?1",
            params![id],
        )?;
        conn.execute(
            "INSERT INTO transcripts_fts (recording_id, text) VALUES (?1, ?2)",
            params![id, transcript.text],
        )?;
        Ok(())
    }

    pub fn get_transcript(&self, recording_id: Uuid) -> PipelineResult<Option<Transcript>> {
        let conn = self.conn();
        let transcript = conn
            .query_row(
                "SELECT recording_id, text, language, words, confidence, model, content_hash
                 FROM transcripts WHERE recording_id = ?1",
                params![recording_id.to_string()],
                row_to_transcript,
            )
            .optional()?;
        Ok(transcript)
    }

    /// Full-text search over transcript content.
    pub fn search_transcripts(&self, query: &str, limit: u32) -> PipelineResult<Vec<SearchHit>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT recording_id, snippet(transcripts_fts, 1, '[', ']', '…', 12)
             FROM transcripts_fts WHERE transcripts_fts MATCH ?1 LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit], |row| {
            let id: String = row.get(0)?;
            let snippet: String = row.get(1)?;
            Ok((id, snippet))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, snippet) = row?;
            let recording_id = parse_uuid(&id)?;
            hits.push(SearchHit {
                recording_id,
                snippet,
            });
        }
        Ok(hits)
    }

    // =====================================================================
    // Study guides
    // =====================================================================

    pub fn save_study_guide(&self, guide: &StudyGuide) -> PipelineResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO study_guides
                 (recording_id, content, model, prompt_version, transcript_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                guide.recording_id.to_string(),
                to_json(&guide.content)?,
                guide.model,
                guide.prompt_version,
                guide.transcript_hash,
            ],
        )?;
        Ok(())
    }

    pub fn get_study_guide(&self, recording_id: Uuid) -> PipelineResult<Option<StudyGuide>> {
        let conn = self.conn();
        let guide = conn
            .query_row(
                "SELECT recording_id, content, model, prompt_version, transcript_hash
                 FROM study_guides WHERE recording_id = ?1",
                params![recording_id.to_string()],
                row_to_guide,
            )
            .optional()?;
        Ok(guide)
    }

    // =====================================================================
    // Bookmarks
    // =====================================================================

    pub fn save_bookmark(&self, bookmark: &Bookmark) -> PipelineResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO bookmarks (id, recording_id, position_secs, note,
                 label, scripture_ref, deleted, needs_sync, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                bookmark.id.to_string(),
                bookmark.recording_id.to_string(),
                bookmark.position_secs,
                bookmark.note,
                bookmark.label,
                bookmark
                    .scripture_ref
                    .as_ref()
                    .map(to_json)
                    .transpose()?,
                bookmark.deleted,
                bookmark.needs_sync,
                bookmark.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn bookmarks_for(&self, recording_id: Uuid) -> PipelineResult<Vec<Bookmark>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, recording_id, position_secs, note, label, scripture_ref,
                    deleted, needs_sync, updated_at
             FROM bookmarks WHERE recording_id = ?1 AND deleted = 0
             ORDER BY position_secs ASC",
        )?;
        let rows = stmt.query_map(params![recording_id.to_string()], row_to_bookmark)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fetch a bookmark by id, tombstoned rows included. The sync pull
    /// compares against this, so a local delete is never invisible to
    /// the last-writer-wins check.
    pub fn get_bookmark(&self, id: Uuid) -> PipelineResult<Option<Bookmark>> {
        let conn = self.conn();
        let bookmark = conn
            .query_row(
                "SELECT id, recording_id, position_secs, note, label, scripture_ref,
                        deleted, needs_sync, updated_at
                 FROM bookmarks WHERE id = ?1",
                params![id.to_string()],
                row_to_bookmark,
            )
            .optional()?;
        Ok(bookmark)
    }

    pub fn dirty_bookmarks(&self) -> PipelineResult<Vec<Bookmark>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, recording_id, position_secs, note, label, scripture_ref,
                    deleted, needs_sync, updated_at
             FROM bookmarks WHERE needs_sync = 1",
        )?;
        let rows = stmt.query_map([], row_to_bookmark)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clear_bookmark_dirty(
        &self,
        id: Uuid,
        pushed_revision: DateTime<Utc>,
    ) -> PipelineResult<bool> {
        let changed = self.conn().execute(
            "UPDATE bookmarks SET needs_sync = 0 WHERE id = ?1 AND updated_at = ?2",
            params![id.to_string(), pushed_revision.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_bookmark_deleted(&self, id: Uuid) -> PipelineResult<()> {
        self.conn().execute(
            "UPDATE bookmarks SET deleted = 1, needs_sync = 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn apply_remote_bookmark(&self, bookmark: &Bookmark) -> PipelineResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO bookmarks (id, recording_id, position_secs, note,
                 label, scripture_ref, deleted, needs_sync, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                bookmark.id.to_string(),
                bookmark.recording_id.to_string(),
                bookmark.position_secs,
                bookmark.note,
                bookmark.label,
                bookmark
                    .scripture_ref
                    .as_ref()
                    .map(to_json)
                    .transpose()?,
                bookmark.deleted,
                bookmark.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// =========================================================================
// Row mapping
// =========================================================================

fn row_to_recording(row: &Row<'_>) -> rusqlite::Result<Recording> {
    let id: String = row.get(0)?;
    let recorded_at: String = row.get(3)?;
    let status: String = row.get(5)?;
    let guide_status: String = row.get(6)?;
    let refs: String = row.get(8)?;
    let updated_at: String = row.get(12)?;

    Ok(Recording {
        id: parse_uuid(&id)?,
        title: row.get(1)?,
        speaker: row.get(2)?,
        recorded_at: parse_datetime(&recorded_at)?,
        duration_secs: row.get(4)?,
        status: RecordingStatus::parse(&status)
            .ok_or_else(|| invalid_column(5, &status))?,
        guide_status: GuideStatus::parse(&guide_status)
            .ok_or_else(|| invalid_column(6, &guide_status))?,
        format_version: row.get(7)?,
        scripture_refs: from_json(&refs, 8)?,
        deleted: row.get(9)?,
        needs_sync: row.get(10)?,
        needs_audio_upload: row.get(11)?,
        updated_at: parse_datetime(&updated_at)?,
        last_error: row.get(13)?,
    })
}

fn row_to_segment(row: &Row<'_>) -> rusqlite::Result<Segment> {
    let recording_id: String = row.get(0)?;
    let local_path: String = row.get(4)?;
    let upload_status: String = row.get(8)?;
    let transcription_status: String = row.get(9)?;
    let fragment_words: Option<String> = row.get(11)?;
    let waveform: String = row.get(12)?;

    Ok(Segment {
        recording_id: parse_uuid(&recording_id)?,
        index: row.get(1)?,
        start_secs: row.get(2)?,
        duration_secs: row.get(3)?,
        local_path: local_path.into(),
        remote_path: row.get(5)?,
        byte_size: row.get(6)?,
        content_hash: row.get(7)?,
        upload_status: match upload_status.as_str() {
            "uploaded" => UploadStatus::Uploaded,
            _ => UploadStatus::Pending,
        },
        transcription_status: match transcription_status.as_str() {
            "done" => SegmentTranscription::Done,
            "failed" => SegmentTranscription::Failed,
            _ => SegmentTranscription::Pending,
        },
        transcript_fragment: row.get(10)?,
        fragment_words: match fragment_words {
            Some(json) => from_json(&json, 11)?,
            None => Vec::new(),
        },
        waveform: from_json(&waveform, 12)?,
    })
}

fn row_to_transcript(row: &Row<'_>) -> rusqlite::Result<Transcript> {
    let recording_id: String = row.get(0)?;
    let words: String = row.get(3)?;
    let parsed_words: Vec<WordTiming> = from_json(&words, 3)?;

    Ok(Transcript {
        recording_id: parse_uuid(&recording_id)?,
        text: row.get(1)?,
        language: row.get(2)?,
        words: parsed_words,
        confidence: row.get(4)?,
        model: row.get(5)?,
        content_hash: row.get(6)?,
    })
}

fn row_to_guide(row: &Row<'_>) -> rusqlite::Result<StudyGuide> {
    let recording_id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let parsed: StudyGuideContent = from_json(&content, 1)?;

    Ok(StudyGuide {
        recording_id: parse_uuid(&recording_id)?,
        content: parsed,
        model: row.get(2)?,
        prompt_version: row.get(3)?,
        transcript_hash: row.get(4)?,
    })
}

fn row_to_bookmark(row: &Row<'_>) -> rusqlite::Result<Bookmark> {
    let id: String = row.get(0)?;
    let recording_id: String = row.get(1)?;
    let scripture_ref: Option<String> = row.get(5)?;
    let updated_at: String = row.get(8)?;

    Ok(Bookmark {
        id: parse_uuid(&id)?,
        recording_id: parse_uuid(&recording_id)?,
        position_secs: row.get(2)?,
        note: row.get(3)?,
        label: row.get(4)?,
        scripture_ref: scripture_ref.map(|s| from_json(&s, 5)).transpose()?,
        deleted: row.get(6)?,
        needs_sync: row.get(7)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn upload_status_str(status: UploadStatus) -> &'static str {
    match status {
        UploadStatus::Pending => "pending",
        UploadStatus::Uploaded => "uploaded",
    }
}

fn transcription_status_str(status: SegmentTranscription) -> &'static str {
    match status {
        SegmentTranscription::Pending => "pending",
        SegmentTranscription::Done => "done",
        SegmentTranscription::Failed => "failed",
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> PipelineResult<String> {
    serde_json::to_string(value).map_err(|e| PipelineError::WriteFailed(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str, col: usize) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_uuid(text: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_datetime(text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn invalid_column(col: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        rusqlite::types::Type::Text,
        format!("unrecognized value: {value}").into(),
    )
}
