//! Transcript: merged, timed text for a whole recording.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One word with its global time range, in seconds from recording start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// The single transcript for a recording, created once all segments
/// transcribe successfully. Word timestamps are globally offset: segment
/// n's words are shifted by the cumulative duration of segments 0..n-1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub recording_id: Uuid,
    pub text: String,
    pub language: String,
    pub words: Vec<WordTiming>,
    pub confidence: f64,

    /// Identifier of the speech-to-text model that produced this.
    pub model: String,

    /// SHA-256 of `text`, hex-encoded. The study guide's regeneration
    /// cache key.
    pub content_hash: String,
}

impl Transcript {
    pub fn new(
        recording_id: Uuid,
        text: String,
        language: String,
        words: Vec<WordTiming>,
        confidence: f64,
        model: String,
    ) -> Self {
        let content_hash = hash_text(&text);
        Self {
            recording_id,
            text,
            language,
            words,
            confidence,
            model,
            content_hash,
        }
    }

    /// Whether word timestamps are non-decreasing across the whole
    /// recording, including across segment boundaries.
    pub fn is_monotonic(&self) -> bool {
        self.words
            .windows(2)
            .all(|pair| pair[1].start_secs >= pair[0].start_secs)
            && self.words.iter().all(|w| w.end_secs >= w.start_secs)
    }

    /// End time of the last word, in seconds.
    pub fn end_secs(&self) -> f64 {
        self.words.last().map(|w| w.end_secs).unwrap_or(0.0)
    }
}

/// SHA-256 of text content, hex-encoded.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
