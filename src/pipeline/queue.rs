//! Durable processing job queue.
//!
//! Each recording advances through a persisted state machine:
//! `pending → uploading → transcribing → moderating → analyzing → saving →
//! succeeded`. A stage's status is written only after its work has
//! committed, so a crash or cancellation leaves the recording at the last
//! durable stage and `resume_incomplete` picks it up from there without
//! re-running committed work. Stage work itself is idempotent: upload
//! skips segments already marked uploaded and transcription reuses
//! persisted fragments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::domain::{
    GuideStatus, RecordingStatus, ScriptureRef, Segment, Transcript, UploadStatus,
};
use crate::error::{PipelineError, PipelineResult};
use crate::services::{
    Generative, Moderation, ModerationVerdict, ObjectStore, SpeechToText, StudyGuideGenerator,
    TranscriptionClient,
};
use crate::store::Store;

use super::progress::{overall_fraction, ProgressHub, ProgressUpdate};
use super::retry::with_retry;

/// External collaborators the queue drives.
pub struct PipelineDeps {
    pub store: Arc<Store>,
    pub speech: Arc<dyn SpeechToText>,
    pub generative: Arc<dyn Generative>,
    pub moderation: Arc<dyn Moderation>,
    pub objects: Arc<dyn ObjectStore>,
}

/// Bounded worker pool over the recording state machine. Cheap to clone;
/// clones share the same workers and progress hub.
#[derive(Clone)]
pub struct ProcessingJobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<Store>,
    transcriber: TranscriptionClient,
    generator: StudyGuideGenerator,
    moderation: Arc<dyn Moderation>,
    objects: Arc<dyn ObjectStore>,
    jobs: JobsConfig,
    semaphore: Arc<Semaphore>,
    progress: ProgressHub,
    active: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl ProcessingJobQueue {
    pub fn new(deps: PipelineDeps, jobs: JobsConfig, prompt_version: String) -> Self {
        let transcriber =
            TranscriptionClient::new(deps.speech, Arc::clone(&deps.store), jobs.clone());
        let generator =
            StudyGuideGenerator::new(deps.generative, Arc::clone(&deps.store), prompt_version);

        Self {
            inner: Arc::new(Inner {
                store: deps.store,
                transcriber,
                generator,
                moderation: deps.moderation,
                objects: deps.objects,
                semaphore: Arc::new(Semaphore::new(jobs.max_concurrent)),
                jobs,
                progress: ProgressHub::new(),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to progress updates for one recording.
    pub fn subscribe(
        &self,
        recording_id: Uuid,
    ) -> tokio::sync::broadcast::Receiver<ProgressUpdate> {
        self.inner.progress.subscribe(recording_id)
    }

    /// Queue a recording for processing. No-op when a job for it is
    /// already running. Runs when a worker slot frees up.
    pub fn enqueue(&self, recording_id: Uuid) {
        let mut active = lock(&self.inner.active);
        if active.get(&recording_id).is_some_and(|h| !h.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let Ok(_permit) = inner.semaphore.clone().acquire_owned().await else {
                return;
            };
            if let Err(e) = inner.run_job(recording_id).await {
                inner.fail(recording_id, &e);
            }
            lock(&inner.active).remove(&recording_id);
            // The terminal update is already published; dropping the
            // channel closes subscribers and keeps the map from growing
            // one entry per job.
            inner.progress.forget(recording_id);
        });
        active.insert(recording_id, handle);
    }

    /// Abort a running job. The recording stays at its last committed
    /// stage and can be resumed later. Returns whether a job was aborted.
    pub fn cancel(&self, recording_id: Uuid) -> bool {
        if let Some(handle) = lock(&self.inner.active).remove(&recording_id) {
            handle.abort();
            self.inner.progress.forget(recording_id);
            info!(%recording_id, "job cancelled");
            return true;
        }
        false
    }

    /// Requeue every recording left in a non-terminal state, typically at
    /// startup after a crash or forced exit.
    pub fn resume_incomplete(&self) -> PipelineResult<usize> {
        let resumable = self.inner.store.resumable_recordings()?;
        let count = resumable.len();
        for recording in resumable {
            info!(recording_id = %recording.id, status = recording.status.as_str(), "resuming");
            self.enqueue(recording.id);
        }
        Ok(count)
    }

    /// Retry a failed or degraded recording from the right stage: a
    /// degraded recording re-runs guide generation only; a failed one
    /// resumes from what its persisted artifacts allow. Content flagged by
    /// moderation is terminal and cannot be retried.
    pub fn retry(&self, recording_id: Uuid) -> PipelineResult<()> {
        let recording = self.inner.store.get_recording(recording_id)?;
        let stage = match recording.status {
            RecordingStatus::Degraded => RecordingStatus::Analyzing,
            RecordingStatus::Failed => {
                if let Some(reason) = flagged_reason(recording.last_error.as_deref()) {
                    return Err(PipelineError::ContentFlagged { reason });
                }
                if self.inner.store.get_transcript(recording_id)?.is_some() {
                    RecordingStatus::Moderating
                } else {
                    RecordingStatus::Uploading
                }
            }
            other => {
                return Err(PipelineError::WriteFailed(format!(
                    "recording is {}, nothing to retry",
                    other.as_str()
                )))
            }
        };

        self.inner.store.reset_for_retry(recording_id, stage)?;
        self.enqueue(recording_id);
        Ok(())
    }
}

impl Inner {
    #[instrument(skip(self), fields(recording_id = %recording_id))]
    async fn run_job(&self, recording_id: Uuid) -> PipelineResult<()> {
        loop {
            let recording = self.store.get_recording(recording_id)?;
            if recording.deleted {
                return Ok(());
            }

            match recording.status {
                RecordingStatus::Pending => {
                    self.advance(recording_id, RecordingStatus::Uploading)?;
                }
                RecordingStatus::Uploading => {
                    self.stage_upload(recording_id).await?;
                    self.advance(recording_id, RecordingStatus::Transcribing)?;
                }
                RecordingStatus::Transcribing => {
                    self.stage_transcribe(recording_id).await?;
                    self.advance(recording_id, RecordingStatus::Moderating)?;
                }
                RecordingStatus::Moderating => {
                    let verdict = self.stage_moderate(recording_id).await?;
                    if verdict.flagged {
                        let err = PipelineError::ContentFlagged {
                            reason: verdict.reason.unwrap_or_else(|| "unspecified".to_string()),
                        };
                        self.fail(recording_id, &err);
                        return Ok(());
                    }
                    self.advance(recording_id, RecordingStatus::Analyzing)?;
                }
                RecordingStatus::Analyzing => {
                    self.store
                        .set_guide_status(recording_id, GuideStatus::Generating)?;
                    match self.stage_generate(recording_id).await {
                        Ok(()) => self.advance(recording_id, RecordingStatus::Saving)?,
                        Err(e) => {
                            // The transcript is already persisted, so guide
                            // failure degrades instead of failing outright.
                            self.degrade(recording_id, &e)?;
                            return Ok(());
                        }
                    }
                }
                RecordingStatus::Saving => {
                    if let Err(e) = self.stage_save(recording_id).await {
                        self.degrade(recording_id, &e)?;
                        return Ok(());
                    }
                    self.advance(recording_id, RecordingStatus::Succeeded)?;
                    info!(%recording_id, "processing complete");
                    return Ok(());
                }
                RecordingStatus::Succeeded
                | RecordingStatus::Failed
                | RecordingStatus::Degraded => return Ok(()),
            }
        }
    }

    /// Upload every pending segment through signed PUT URLs, verifying
    /// content hashes on both sides of the transfer. Already uploaded
    /// segments are skipped.
    async fn stage_upload(&self, recording_id: Uuid) -> PipelineResult<()> {
        let segments = self.store.segments_for(recording_id)?;
        let total = segments.len().max(1);

        for (done, segment) in segments.iter().enumerate() {
            self.publish(
                recording_id,
                RecordingStatus::Uploading,
                done as f32 / total as f32,
                None,
            );

            if segment.upload_status == UploadStatus::Uploaded && segment.remote_path.is_some() {
                continue;
            }
            self.upload_segment(segment).await?;
        }

        self.store.set_needs_audio_upload(recording_id, false)?;
        Ok(())
    }

    async fn upload_segment(&self, segment: &Segment) -> PipelineResult<()> {
        let bytes = tokio::fs::read(&segment.local_path).await?;
        let actual = hex::encode(Sha256::digest(&bytes));
        if actual != segment.content_hash {
            return Err(PipelineError::CorruptedFile {
                path: segment.local_path.display().to_string(),
                expected: segment.content_hash.clone(),
                actual,
            });
        }

        let key = remote_key(segment.recording_id, segment.index);
        let url = with_retry(&self.jobs, "sign upload", || {
            self.objects.sign_upload(&key)
        })
        .await?;

        let checksum = with_retry(&self.jobs, "segment upload", || {
            self.objects.put(&url, bytes.clone())
        })
        .await
        .map_err(|e| match e {
            err @ PipelineError::CorruptedFile { .. } => err,
            other => PipelineError::UploadFailed {
                segment_index: segment.index,
                reason: other.to_string(),
            },
        })?;

        // Empty checksum means the store does not echo one back.
        if !checksum.is_empty() && checksum != segment.content_hash {
            return Err(PipelineError::CorruptedFile {
                path: key,
                expected: segment.content_hash.clone(),
                actual: checksum,
            });
        }

        self.store
            .mark_segment_uploaded(segment.recording_id, segment.index, &key)?;
        Ok(())
    }

    /// Transcribe all segments and persist the merged transcript. The
    /// transcript row is written here, before moderation, so later stage
    /// failures leave it queryable.
    async fn stage_transcribe(&self, recording_id: Uuid) -> PipelineResult<()> {
        let segments = self.store.segments_for(recording_id)?;
        let transcript = self
            .transcriber
            .transcribe_all(recording_id, &segments, |done, total| {
                self.publish(
                    recording_id,
                    RecordingStatus::Transcribing,
                    done as f32 / total.max(1) as f32,
                    None,
                );
            })
            .await?;
        self.store.save_transcript(&transcript)?;
        Ok(())
    }

    async fn stage_moderate(&self, recording_id: Uuid) -> PipelineResult<ModerationVerdict> {
        let transcript = self.require_transcript(recording_id)?;
        with_retry(&self.jobs, "moderation", || {
            self.moderation.review(&transcript.text)
        })
        .await
    }

    async fn stage_generate(&self, recording_id: Uuid) -> PipelineResult<()> {
        let transcript = self.require_transcript(recording_id)?;
        with_retry(&self.jobs, "guide generation", || {
            self.generator.generate(&transcript)
        })
        .await?;
        Ok(())
    }

    /// Final bookkeeping once the guide exists: scripture references onto
    /// the recording, guide marked ready.
    async fn stage_save(&self, recording_id: Uuid) -> PipelineResult<()> {
        let guide = self
            .store
            .get_study_guide(recording_id)?
            .ok_or(PipelineError::RecordNotFound {
                kind: "study_guide",
                id: recording_id.to_string(),
            })?;

        let mut refs: Vec<ScriptureRef> = guide.content.mentioned_references.clone();
        for suggested in &guide.content.suggested_references {
            if !refs.contains(suggested) {
                refs.push(suggested.clone());
            }
        }
        self.store.set_scripture_refs(recording_id, &refs)?;
        self.store
            .set_guide_status(recording_id, GuideStatus::Ready)?;
        Ok(())
    }

    fn require_transcript(&self, recording_id: Uuid) -> PipelineResult<Transcript> {
        self.store
            .get_transcript(recording_id)?
            .ok_or(PipelineError::RecordNotFound {
                kind: "transcript",
                id: recording_id.to_string(),
            })
    }

    /// Commit a stage transition and publish it.
    fn advance(&self, recording_id: Uuid, next: RecordingStatus) -> PipelineResult<()> {
        self.store.transition_status(recording_id, next)?;
        self.publish(recording_id, next, 0.0, None);
        Ok(())
    }

    /// Mark a recording failed, recording the error. Transition failures
    /// here are logged, not propagated; the job is ending either way.
    fn fail(&self, recording_id: Uuid, err: &PipelineError) {
        error!(%recording_id, error = %err, "job failed");
        if let Err(e) = self.store.record_error(recording_id, &err.to_string()) {
            warn!(%recording_id, error = %e, "failed to record job error");
        }
        if let Err(e) = self
            .store
            .transition_status(recording_id, RecordingStatus::Failed)
        {
            warn!(%recording_id, error = %e, "failed to mark recording failed");
        }
        self.publish(
            recording_id,
            RecordingStatus::Failed,
            1.0,
            Some(err.to_string()),
        );
    }

    /// Degrade: transcript stands, guide generation gave up.
    fn degrade(&self, recording_id: Uuid, err: &PipelineError) -> PipelineResult<()> {
        warn!(%recording_id, error = %err, "degrading, transcript preserved");
        self.store
            .set_guide_status(recording_id, GuideStatus::Failed)?;
        self.store.record_error(recording_id, &err.to_string())?;
        self.store
            .transition_status(recording_id, RecordingStatus::Degraded)?;
        self.publish(
            recording_id,
            RecordingStatus::Degraded,
            1.0,
            Some(err.to_string()),
        );
        Ok(())
    }

    fn publish(
        &self,
        recording_id: Uuid,
        status: RecordingStatus,
        within: f32,
        error: Option<String>,
    ) {
        self.progress.publish(ProgressUpdate {
            recording_id,
            status,
            fraction: overall_fraction(status, within),
            error,
        });
    }
}

/// Object key for one segment's audio.
pub fn remote_key(recording_id: Uuid, index: u32) -> String {
    format!("audio/{recording_id}/{index:05}.pcm")
}

/// Moderation failures are recorded with this prefix so retry can tell
/// them apart from technical failures.
fn flagged_reason(last_error: Option<&str>) -> Option<String> {
    last_error
        .and_then(|e| e.strip_prefix("Content flagged by moderation: "))
        .map(|reason| reason.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
