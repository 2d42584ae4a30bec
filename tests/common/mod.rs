//! Shared fixtures: mock service implementations with call counters, and
//! helpers to build stores with on-disk segment audio.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use sermonflow::config::JobsConfig;
use sermonflow::domain::{
    Bookmark, Recording, Segment, SegmentTranscription, StudyGuideContent, UploadStatus,
    WordTiming, WAVEFORM_BINS,
};
use sermonflow::error::{PipelineError, PipelineResult};
use sermonflow::services::{
    Generative, GuideRequest, GuideResponse, Moderation, ModerationVerdict, ObjectStore,
    RemoteStore, SpeechToText, TimedTranscription, TranscribeRequest,
};
use sermonflow::store::Store;

/// Sample rate used by all fixtures; low so fixture audio stays small.
pub const TEST_SAMPLE_RATE: u32 = 100;

pub fn fast_jobs() -> JobsConfig {
    JobsConfig {
        max_concurrent: 2,
        max_attempts: 2,
        backoff_base_ms: 1,
        call_timeout_secs: 5,
    }
}

/// Build a pending recording with `n` segments of `secs_each` seconds,
/// writing real PCM files under `audio_dir`.
pub fn seed_recording(
    store: &Store,
    audio_dir: &Path,
    n: u32,
    secs_each: f64,
) -> (Recording, Vec<Segment>) {
    let recording = Recording::new("Test sermon", Some("Rev. Example".to_string()));
    store.insert_recording(&recording).unwrap();

    let dir = audio_dir.join(recording.id.to_string());
    std::fs::create_dir_all(&dir).unwrap();

    let mut segments = Vec::new();
    for index in 0..n {
        let samples = (secs_each * TEST_SAMPLE_RATE as f64) as usize;
        // Distinct bytes per segment so content hashes differ.
        let bytes: Vec<u8> = (0..samples * 2).map(|i| (i as u8).wrapping_add(index as u8)).collect();
        let path = dir.join(format!("{index:05}.pcm"));
        std::fs::write(&path, &bytes).unwrap();

        let segment = Segment {
            recording_id: recording.id,
            index,
            start_secs: index as f64 * secs_each,
            duration_secs: secs_each,
            local_path: path,
            remote_path: None,
            byte_size: bytes.len() as u64,
            content_hash: hex::encode(Sha256::digest(&bytes)),
            upload_status: UploadStatus::Pending,
            transcription_status: SegmentTranscription::Pending,
            transcript_fragment: None,
            fragment_words: Vec::new(),
            waveform: vec![0.5; WAVEFORM_BINS],
        };
        store.insert_segment(&segment).unwrap();
        segments.push(segment);
    }

    (recording, segments)
}

// =========================================================================
// Mock speech-to-text
// =========================================================================

pub struct MockSpeech {
    pub calls: AtomicUsize,
    pub calls_per_index: Mutex<HashMap<u32, usize>>,
    /// Fail the next call for this segment index, once.
    pub fail_once_at: Mutex<Option<u32>>,
}

impl MockSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            calls_per_index: Mutex::new(HashMap::new()),
            fail_once_at: Mutex::new(None),
        })
    }

    pub fn fail_once_at(&self, index: u32) {
        *self.fail_once_at.lock().unwrap() = Some(index);
    }

    pub fn calls_for(&self, index: u32) -> usize {
        *self.calls_per_index.lock().unwrap().get(&index).unwrap_or(&0)
    }
}

#[async_trait]
impl SpeechToText for MockSpeech {
    async fn transcribe(&self, request: TranscribeRequest) -> PipelineResult<TimedTranscription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_per_index
            .lock()
            .unwrap()
            .entry(request.segment_index)
            .or_insert(0) += 1;

        let mut fail = self.fail_once_at.lock().unwrap();
        if *fail == Some(request.segment_index) {
            *fail = None;
            return Err(PipelineError::TranscriptionFailed {
                segment_index: request.segment_index,
                reason: "mock failure".to_string(),
            });
        }
        drop(fail);

        // Duration from the PCM byte count, like a real provider would
        // derive it from the audio.
        let duration = request.audio.len() as f64 / 2.0 / TEST_SAMPLE_RATE as f64;
        let text = format!(
            "As John 3:16 says, this is segment {} of the sermon.",
            request.segment_index
        );
        Ok(TimedTranscription {
            text,
            language: "en".to_string(),
            words: vec![
                WordTiming {
                    word: "As".to_string(),
                    start_secs: 0.1,
                    end_secs: 0.4,
                },
                WordTiming {
                    word: "sermon.".to_string(),
                    start_secs: (duration - 0.5).max(0.4),
                    end_secs: duration,
                },
            ],
            confidence: 0.9,
            model: "mock-stt".to_string(),
        })
    }
}

// =========================================================================
// Mock generative
// =========================================================================

pub struct MockGenerative {
    pub calls: AtomicUsize,
    /// Number of upcoming calls that fail before the mock starts
    /// succeeding.
    pub fail_remaining: AtomicUsize,
}

impl MockGenerative {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
        })
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Generative for MockGenerative {
    async fn generate_guide(&self, request: GuideRequest) -> PipelineResult<GuideResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PipelineError::GenerationFailed(
                "mock generation outage".to_string(),
            ));
        }

        Ok(GuideResponse {
            content: StudyGuideContent {
                summary: "A sermon about grace.".to_string(),
                themes: vec!["grace".to_string()],
                outline: vec![],
                quotes: vec![],
                mentioned_references: request.mentioned_references.clone(),
                suggested_references: vec![],
                discussion_questions: vec![],
                reflection_prompts: vec![],
                application_points: vec![],
            },
            model: "mock-llm".to_string(),
        })
    }
}

// =========================================================================
// Mock moderation
// =========================================================================

pub struct MockModeration {
    pub calls: AtomicUsize,
    pub flag: Mutex<Option<String>>,
}

impl MockModeration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            flag: Mutex::new(None),
        })
    }

    pub fn flag_with(&self, reason: &str) {
        *self.flag.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait]
impl Moderation for MockModeration {
    async fn review(&self, _text: &str) -> PipelineResult<ModerationVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reason = self.flag.lock().unwrap().clone();
        Ok(ModerationVerdict {
            flagged: reason.is_some(),
            reason,
        })
    }
}

// =========================================================================
// Mock object store (in-memory blob store, hash-echoing)
// =========================================================================

pub struct MockObjects {
    pub sign_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockObjects {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sign_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            blobs: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl ObjectStore for MockObjects {
    async fn sign_upload(&self, key: &str) -> PipelineResult<String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("signed-put:{key}"))
    }

    async fn sign_download(&self, key: &str) -> PipelineResult<String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("signed-get:{key}"))
    }

    async fn put(&self, url: &str, bytes: Vec<u8>) -> PipelineResult<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let key = url.trim_start_matches("signed-put:").to_string();
        let checksum = hex::encode(Sha256::digest(&bytes));
        self.blobs.lock().unwrap().insert(key, bytes);
        Ok(checksum)
    }

    async fn get(&self, url: &str) -> PipelineResult<Vec<u8>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let key = url.trim_start_matches("signed-get:");
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::DownloadFailed(format!("no blob for {key}")))
    }
}

// =========================================================================
// Mock remote store
// =========================================================================

pub struct MockRemote {
    pub pushed_recordings: Mutex<Vec<Recording>>,
    pub pushed_bookmarks: Mutex<Vec<Bookmark>>,
    pub to_pull_recordings: Mutex<Vec<Recording>>,
    pub to_pull_bookmarks: Mutex<Vec<Bookmark>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pushed_recordings: Mutex::new(Vec::new()),
            pushed_bookmarks: Mutex::new(Vec::new()),
            to_pull_recordings: Mutex::new(Vec::new()),
            to_pull_bookmarks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn push_recording(&self, recording: &Recording) -> PipelineResult<DateTime<Utc>> {
        self.pushed_recordings.lock().unwrap().push(recording.clone());
        Ok(Utc::now())
    }

    async fn pull_recordings(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> PipelineResult<Vec<Recording>> {
        Ok(self.to_pull_recordings.lock().unwrap().clone())
    }

    async fn push_bookmark(&self, bookmark: &Bookmark) -> PipelineResult<DateTime<Utc>> {
        self.pushed_bookmarks.lock().unwrap().push(bookmark.clone());
        Ok(Utc::now())
    }

    async fn pull_bookmarks(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> PipelineResult<Vec<Bookmark>> {
        Ok(self.to_pull_bookmarks.lock().unwrap().clone())
    }
}

/// Wait until the recording reaches a terminal status, or panic after a
/// few seconds.
pub async fn wait_terminal(store: &Store, id: Uuid) -> Recording {
    for _ in 0..200 {
        let recording = store.get_recording(id).unwrap();
        if recording.status.is_terminal() {
            return recording;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("recording {id} never reached a terminal status");
}
