//! Production HTTP clients for the service traits.
//!
//! All clients share the same shape: a base URL from configuration, a
//! reqwest client, and small request/response DTOs kept private to this
//! module. Transport failures map to retryable network errors; HTTP error
//! statuses map to the operation-specific variant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::domain::{Bookmark, Recording, StudyGuideContent, WordTiming};
use crate::error::{PipelineError, PipelineResult};

use super::{
    Generative, GuideRequest, GuideResponse, Moderation, ModerationVerdict, ObjectStore,
    RemoteStore, SpeechToText, TimedTranscription, TranscribeRequest,
};

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

// =========================================================================
// Speech-to-text
// =========================================================================

/// Whisper-style HTTP transcription endpoint, multipart upload.
pub struct HttpSpeechToText {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    words: Vec<SttWord>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct SttWord {
    word: String,
    start: f64,
    end: f64,
}

impl HttpSpeechToText {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, request: TranscribeRequest) -> PipelineResult<TimedTranscription> {
        let url = join_url(&self.base_url, "v1/transcriptions");
        let index = request.segment_index;

        let audio_part = Part::bytes(request.audio)
            .file_name(format!("segment-{index}.pcm"))
            .mime_str("application/octet-stream")
            .map_err(|e| PipelineError::TranscriptionFailed {
                segment_index: index,
                reason: e.to_string(),
            })?;

        let mut form = Form::new()
            .part("audio", audio_part)
            .text("timestamps", "word");
        if let Some(language) = request.language {
            form = form.text("language", language);
        }
        if let Some(hint) = request.continuation_hint {
            form = form.text("prompt", hint);
        }

        let mut req = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 4xx means the audio itself was rejected; retrying the same
            // bytes cannot succeed.
            if status.is_client_error() {
                return Err(PipelineError::TranscriptionFailed {
                    segment_index: index,
                    reason: format!("{status}: {body}"),
                });
            }
            return Err(PipelineError::Unreachable(format!("{status}: {body}")));
        }

        let parsed: SttResponse =
            response
                .json()
                .await
                .map_err(|e| PipelineError::TranscriptionFailed {
                    segment_index: index,
                    reason: format!("malformed response: {e}"),
                })?;

        Ok(TimedTranscription {
            text: parsed.text,
            language: if parsed.language.is_empty() {
                "en".to_string()
            } else {
                parsed.language
            },
            words: parsed
                .words
                .into_iter()
                .map(|w| WordTiming {
                    word: w.word,
                    start_secs: w.start,
                    end_secs: w.end,
                })
                .collect(),
            confidence: parsed.confidence,
            model: parsed.model,
        })
    }
}

// =========================================================================
// Generative
// =========================================================================

/// Structured-output generation endpoint.
pub struct HttpGenerative {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    transcript: &'a str,
    mentioned_references: Vec<String>,
    prompt_version: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    guide: StudyGuideContent,
    #[serde(default)]
    model: String,
}

impl HttpGenerative {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Generative for HttpGenerative {
    async fn generate_guide(&self, request: GuideRequest) -> PipelineResult<GuideResponse> {
        let url = join_url(&self.base_url, "v1/study-guides");
        let body = GenerateBody {
            transcript: &request.transcript_text,
            mentioned_references: request
                .mentioned_references
                .iter()
                .map(|r| r.to_string())
                .collect(),
            prompt_version: &request.prompt_version,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::GenerationFailed(format!("{status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::GenerationFailed(format!("malformed guide JSON: {e}")))?;

        Ok(GuideResponse {
            content: parsed.guide,
            model: parsed.model,
        })
    }
}

// =========================================================================
// Moderation
// =========================================================================

pub struct HttpModeration {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    flagged: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl HttpModeration {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Moderation for HttpModeration {
    async fn review(&self, text: &str) -> PipelineResult<ModerationVerdict> {
        let url = join_url(&self.base_url, "v1/moderations");

        let mut req = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "input": text }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Unreachable(format!(
                "moderation returned {status}"
            )));
        }

        let parsed: ModerationResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Unreachable(format!("malformed verdict: {e}")))?;

        Ok(ModerationVerdict {
            flagged: parsed.flagged,
            reason: parsed.reason,
        })
    }
}

// =========================================================================
// Object storage
// =========================================================================

/// Blob store front that hands out signed URLs and proxies the transfers.
pub struct HttpObjectStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn sign(&self, action: &str, key: &str) -> PipelineResult<String> {
        let url = join_url(&self.base_url, "v1/sign");

        let mut req = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "action": action, "key": key }));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SyncFailed(format!(
                "sign {action} for {key} returned {status}"
            )));
        }

        let parsed: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::SyncFailed(format!("malformed signed URL: {e}")))?;
        Ok(parsed.url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn sign_upload(&self, key: &str) -> PipelineResult<String> {
        self.sign("upload", key).await
    }

    async fn sign_download(&self, key: &str) -> PipelineResult<String> {
        self.sign("download", key).await
    }

    async fn put(&self, url: &str, bytes: Vec<u8>) -> PipelineResult<String> {
        let response = self
            .client
            .put(url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UploadFailed {
                segment_index: 0,
                reason: format!("PUT returned {status}"),
            });
        }

        // S3-compatible stores return the content hash in the ETag header.
        let checksum = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_default();
        Ok(checksum)
    }

    async fn get(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::DownloadFailed(format!("GET returned {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::DownloadFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// =========================================================================
// Remote metadata store
// =========================================================================

pub struct HttpRemoteStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PushAck {
    updated_at: DateTime<Utc>,
}

impl HttpRemoteStore {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn push<T: Serialize + Sync>(
        &self,
        path: &str,
        item: &T,
    ) -> PipelineResult<DateTime<Utc>> {
        let url = join_url(&self.base_url, path);

        let mut req = self.client.put(&url).json(item);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PipelineError::NotSignedIn);
        }
        if !status.is_success() {
            return Err(PipelineError::SyncFailed(format!("push returned {status}")));
        }

        let ack: PushAck = response
            .json()
            .await
            .map_err(|e| PipelineError::SyncFailed(format!("malformed ack: {e}")))?;
        Ok(ack.updated_at)
    }

    async fn pull<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> PipelineResult<Vec<T>> {
        let mut url = join_url(&self.base_url, path);
        if let Some(since) = since {
            url = format!("{url}?since={}", since.to_rfc3339());
        }

        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PipelineError::NotSignedIn);
        }
        if !status.is_success() {
            return Err(PipelineError::SyncFailed(format!("pull returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::SyncFailed(format!("malformed pull body: {e}")))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn push_recording(&self, recording: &Recording) -> PipelineResult<DateTime<Utc>> {
        self.push(&format!("v1/recordings/{}", recording.id), recording)
            .await
    }

    async fn pull_recordings(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> PipelineResult<Vec<Recording>> {
        self.pull("v1/recordings", since).await
    }

    async fn push_bookmark(&self, bookmark: &Bookmark) -> PipelineResult<DateTime<Utc>> {
        self.push(&format!("v1/bookmarks/{}", bookmark.id), bookmark)
            .await
    }

    async fn pull_bookmarks(&self, since: Option<DateTime<Utc>>) -> PipelineResult<Vec<Bookmark>> {
        self.pull("v1/bookmarks", since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.example.com/", "v1/transcriptions"),
            "https://api.example.com/v1/transcriptions"
        );
        assert_eq!(join_url("http://localhost:8080", "v1/sign"), "http://localhost:8080/v1/sign");
    }
}
