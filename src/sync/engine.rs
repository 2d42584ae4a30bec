//! Offline-first sync between the local store and the remote backend.
//!
//! Push sends dirty records and clears `needs_sync` with a
//! compare-and-clear on the exact revision pushed, so an edit made while
//! a push is in flight stays dirty and goes out on the next cycle. Pull
//! treats the remote as authoritative and merges last-writer-wins on
//! `updated_at`. Tombstones propagate in both directions as soft-deleted
//! records. Audio bytes travel separately from metadata, through signed
//! URLs, with downloads landing in the byte-bounded cache.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::UploadStatus;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::remote_key;
use crate::services::{ObjectStore, RemoteStore};
use crate::store::Store;

use super::cache::AudioCache;

/// Counts from one sync cycle, for logging and the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    pub pushed_recordings: usize,
    pub pushed_bookmarks: usize,
    pub uploaded_segments: usize,
    pub pulled_recordings: usize,
    pub pulled_bookmarks: usize,
}

pub struct SyncEngine {
    store: Arc<Store>,
    remote: Arc<dyn RemoteStore>,
    objects: Arc<dyn ObjectStore>,
    cache: AudioCache,
}

impl SyncEngine {
    pub fn new(
        store: Arc<Store>,
        remote: Arc<dyn RemoteStore>,
        objects: Arc<dyn ObjectStore>,
        cache: AudioCache,
    ) -> Self {
        Self {
            store,
            remote,
            objects,
            cache,
        }
    }

    /// Full cycle: push local changes, then pull remote ones.
    pub async fn sync(&self) -> PipelineResult<SyncReport> {
        let mut report = self.push().await?;
        let pulled = self.pull().await?;
        report.pulled_recordings = pulled.pulled_recordings;
        report.pulled_bookmarks = pulled.pulled_bookmarks;
        Ok(report)
    }

    /// Push every dirty recording and bookmark, plus pending segment
    /// audio. A record's dirty flag clears only if it was not edited
    /// again while its push was in flight.
    #[instrument(skip(self))]
    pub async fn push(&self) -> PipelineResult<SyncReport> {
        let mut report = SyncReport::default();

        for recording in self.store.dirty_recordings()? {
            let revision = recording.updated_at;
            self.remote.push_recording(&recording).await?;
            let cleared = self.store.clear_recording_dirty(recording.id, revision)?;
            if !cleared {
                debug!(recording_id = %recording.id, "edited during push, stays dirty");
            }
            report.pushed_recordings += 1;

            if recording.needs_audio_upload && !recording.deleted {
                report.uploaded_segments += self.push_audio(recording.id).await?;
            }
        }

        for bookmark in self.store.dirty_bookmarks()? {
            let revision = bookmark.updated_at;
            self.remote.push_bookmark(&bookmark).await?;
            self.store.clear_bookmark_dirty(bookmark.id, revision)?;
            report.pushed_bookmarks += 1;
        }

        info!(
            recordings = report.pushed_recordings,
            bookmarks = report.pushed_bookmarks,
            segments = report.uploaded_segments,
            "push complete"
        );
        Ok(report)
    }

    /// Upload this recording's not-yet-uploaded segments through signed
    /// PUT URLs, verifying the store's checksum against ours.
    async fn push_audio(&self, recording_id: Uuid) -> PipelineResult<usize> {
        let mut uploaded = 0usize;
        for segment in self.store.segments_for(recording_id)? {
            if segment.upload_status == UploadStatus::Uploaded {
                continue;
            }

            let bytes = tokio::fs::read(&segment.local_path).await?;
            let actual = hex::encode(Sha256::digest(&bytes));
            if actual != segment.content_hash {
                return Err(PipelineError::CorruptedFile {
                    path: segment.local_path.display().to_string(),
                    expected: segment.content_hash.clone(),
                    actual,
                });
            }

            let key = remote_key(recording_id, segment.index);
            let url = self.objects.sign_upload(&key).await?;
            let checksum = self.objects.put(&url, bytes).await.map_err(|e| {
                PipelineError::UploadFailed {
                    segment_index: segment.index,
                    reason: e.to_string(),
                }
            })?;
            if !checksum.is_empty() && checksum != segment.content_hash {
                return Err(PipelineError::CorruptedFile {
                    path: key,
                    expected: segment.content_hash.clone(),
                    actual: checksum,
                });
            }

            self.store
                .mark_segment_uploaded(recording_id, segment.index, &key)?;
            uploaded += 1;
        }

        self.store.set_needs_audio_upload(recording_id, false)?;
        Ok(uploaded)
    }

    /// Pull remote records and merge them last-writer-wins. A local record
    /// with unpushed edits newer than the remote copy wins and stays
    /// dirty; everything else takes the remote version verbatim.
    #[instrument(skip(self))]
    pub async fn pull(&self) -> PipelineResult<SyncReport> {
        let mut report = SyncReport::default();

        for remote in self.remote.pull_recordings(None).await? {
            let keep_local = match self.store.get_recording(remote.id) {
                Ok(local) => local.updated_at > remote.updated_at,
                Err(PipelineError::RecordNotFound { .. }) => false,
                Err(e) => return Err(e),
            };
            if keep_local {
                debug!(recording_id = %remote.id, "local copy newer, skipping");
                continue;
            }
            self.store.apply_remote_recording(&remote)?;
            report.pulled_recordings += 1;
        }

        let remote_bookmarks = self.remote.pull_bookmarks(None).await?;
        for remote in remote_bookmarks {
            // Lookup includes tombstones: an unpushed local delete must
            // win over a stale remote copy, not get resurrected by it.
            let keep_local = self
                .store
                .get_bookmark(remote.id)?
                .is_some_and(|local| local.updated_at > remote.updated_at);
            if keep_local {
                continue;
            }
            self.store.apply_remote_bookmark(&remote)?;
            report.pulled_bookmarks += 1;
        }

        info!(
            recordings = report.pulled_recordings,
            bookmarks = report.pulled_bookmarks,
            "pull complete"
        );
        Ok(report)
    }

    /// Fetch one segment's audio for playback, via the cache. A miss
    /// downloads through a signed GET URL and populates the cache, which
    /// may evict older audio to stay under its ceiling.
    pub async fn fetch_audio(&self, recording_id: Uuid, index: u32) -> PipelineResult<Vec<u8>> {
        let key = remote_key(recording_id, index);

        if let Some(bytes) = self.cache.get(&key).await? {
            return Ok(bytes);
        }

        let url = self.objects.sign_download(&key).await?;
        let bytes = self.objects.get(&url).await?;
        if let Err(e) = self.cache.put(&key, &bytes).await {
            // Playback still works from the in-memory copy.
            warn!(%key, error = %e, "failed to cache downloaded audio");
        }
        Ok(bytes)
    }

    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }
}
