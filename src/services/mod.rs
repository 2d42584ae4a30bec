//! External service interfaces.
//!
//! Every remote dependency sits behind an async trait so the pipeline can
//! be driven against mocks in tests. Production implementations live in
//! `http` and talk to the configured endpoints over reqwest.

pub mod http;
pub mod study_guide;
pub mod transcription;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Bookmark, Recording, ScriptureRef, StudyGuideContent, WordTiming};
use crate::error::PipelineResult;

pub use study_guide::StudyGuideGenerator;
pub use transcription::TranscriptionClient;

/// One segment's worth of audio submitted for transcription.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio: Vec<u8>,
    pub segment_index: u32,
    /// Language detected on an earlier segment, if any.
    pub language: Option<String>,
    /// Tail of the previous segment's text, passed so the provider keeps
    /// context across the artificial segment boundary.
    pub continuation_hint: Option<String>,
}

/// Provider response for a single segment, timestamps relative to the
/// segment start.
#[derive(Debug, Clone)]
pub struct TimedTranscription {
    pub text: String,
    pub language: String,
    pub words: Vec<WordTiming>,
    pub confidence: f64,
    pub model: String,
}

/// Speech-to-text provider.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, request: TranscribeRequest) -> PipelineResult<TimedTranscription>;
}

/// Input to study guide generation.
#[derive(Debug, Clone)]
pub struct GuideRequest {
    pub transcript_text: String,
    /// References literally spoken in the sermon, extracted locally.
    pub mentioned_references: Vec<ScriptureRef>,
    pub prompt_version: String,
}

/// Structured generation result with the model that produced it.
#[derive(Debug, Clone)]
pub struct GuideResponse {
    pub content: StudyGuideContent,
    pub model: String,
}

/// Generative backend producing structured study guides.
#[async_trait]
pub trait Generative: Send + Sync {
    async fn generate_guide(&self, request: GuideRequest) -> PipelineResult<GuideResponse>;
}

/// Moderation outcome for a transcript.
#[derive(Debug, Clone)]
pub struct ModerationVerdict {
    pub flagged: bool,
    pub reason: Option<String>,
}

/// Content moderation service.
#[async_trait]
pub trait Moderation: Send + Sync {
    async fn review(&self, text: &str) -> PipelineResult<ModerationVerdict>;
}

/// Blob storage accessed through time-limited signed URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Obtain a signed PUT URL for an object key.
    async fn sign_upload(&self, key: &str) -> PipelineResult<String>;

    /// Obtain a signed GET URL for an object key.
    async fn sign_download(&self, key: &str) -> PipelineResult<String>;

    /// Upload bytes to a signed URL; returns the server-computed content
    /// hash for post-upload verification.
    async fn put(&self, url: &str, bytes: Vec<u8>) -> PipelineResult<String>;

    /// Download bytes from a signed URL.
    async fn get(&self, url: &str) -> PipelineResult<Vec<u8>>;
}

/// Remote metadata store used by the sync engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Push one recording; the ack carries the server's authoritative
    /// `updated_at` for that revision.
    async fn push_recording(&self, recording: &Recording) -> PipelineResult<DateTime<Utc>>;

    /// Pull recordings changed since the given watermark (all when `None`).
    /// Tombstones are returned as records with `deleted` set.
    async fn pull_recordings(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> PipelineResult<Vec<Recording>>;

    async fn push_bookmark(&self, bookmark: &Bookmark) -> PipelineResult<DateTime<Utc>>;

    async fn pull_bookmarks(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> PipelineResult<Vec<Bookmark>>;
}
