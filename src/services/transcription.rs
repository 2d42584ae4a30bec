//! Segment-by-segment transcription and transcript merging.
//!
//! Segments are transcribed in strict index order. Each request carries the
//! tail of the previous segment's text as a continuation hint so the
//! provider keeps sentence context across the artificial cut points, and
//! each response's timestamps are shifted by the segment's start offset so
//! the merged transcript has one global timeline.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::domain::{Segment, SegmentTranscription, Transcript, WordTiming};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::retry::with_retry;
use crate::store::Store;

use super::{SpeechToText, TimedTranscription, TranscribeRequest};

/// Target length for the continuation hint passed between segments.
const HINT_CHARS: usize = 200;

pub struct TranscriptionClient {
    backend: Arc<dyn SpeechToText>,
    store: Arc<Store>,
    jobs: JobsConfig,
}

impl TranscriptionClient {
    pub fn new(backend: Arc<dyn SpeechToText>, store: Arc<Store>, jobs: JobsConfig) -> Self {
        Self {
            backend,
            store,
            jobs,
        }
    }

    /// Transcribe one segment's bytes with optional context from the
    /// previous segment. Retries with backoff per the jobs config; a
    /// per-attempt timeout counts as retryable.
    async fn transcribe_segment(
        &self,
        segment: &Segment,
        hint: Option<String>,
        language: Option<String>,
    ) -> PipelineResult<TimedTranscription> {
        let audio = tokio::fs::read(&segment.local_path).await?;
        let index = segment.index;

        with_retry(&self.jobs, "transcription", || {
            self.backend.transcribe(TranscribeRequest {
                audio: audio.clone(),
                segment_index: index,
                language: language.clone(),
                continuation_hint: hint.clone(),
            })
        })
        .await
        .map_err(|e| match e {
            PipelineError::Unreachable(msg) if msg.ends_with("timed out") => {
                PipelineError::TranscriptionTimeout {
                    segment_index: index,
                }
            }
            other => other,
        })
    }

    /// Transcribe every segment of a recording and merge the results into
    /// one transcript with a global timeline.
    ///
    /// Fragments are persisted per segment as they complete; segments
    /// already marked done are not re-sent to the provider, so a retry
    /// after a mid-recording failure only pays for the segments that never
    /// succeeded. Failure surfaces the index of the segment that failed.
    #[instrument(skip(self, segments, on_progress), fields(recording_id = %recording_id, segments = segments.len()))]
    pub async fn transcribe_all(
        &self,
        recording_id: Uuid,
        segments: &[Segment],
        mut on_progress: impl FnMut(usize, usize),
    ) -> PipelineResult<Transcript> {
        let total = segments.len();
        let mut completed = 0usize;
        let mut text = String::new();
        let mut words: Vec<WordTiming> = Vec::new();
        let mut language: Option<String> = None;
        let mut model = String::new();
        let mut confidence_sum = 0.0;
        let mut confidence_count = 0u32;

        for segment in segments {
            let hint = tail_hint(&text, HINT_CHARS);

            let result = if segment.transcription_status == SegmentTranscription::Done {
                // Completed on a previous attempt; replay the stored
                // fragment and its word timings instead of calling the
                // provider again.
                let fragment = segment.transcript_fragment.clone().unwrap_or_default();
                append_fragment_text(&mut text, &fragment);
                append_shifted_words(&mut words, &segment.fragment_words, segment.start_secs);
                completed += 1;
                on_progress(completed, total);
                continue;
            } else {
                self.transcribe_segment(segment, hint, language.clone()).await
            };

            match result {
                Ok(timed) => {
                    self.store.set_segment_transcription(
                        recording_id,
                        segment.index,
                        SegmentTranscription::Done,
                        Some((&timed.text, timed.words.as_slice())),
                    )?;

                    append_fragment_text(&mut text, &timed.text);
                    append_shifted_words(&mut words, &timed.words, segment.start_secs);

                    if language.is_none() && !timed.language.is_empty() {
                        language = Some(timed.language.clone());
                    }
                    if model.is_empty() {
                        model = timed.model.clone();
                    }
                    confidence_sum += timed.confidence;
                    confidence_count += 1;
                    completed += 1;
                    on_progress(completed, total);
                }
                Err(err) => {
                    warn!(index = segment.index, error = %err, "segment transcription failed");
                    self.store.set_segment_transcription(
                        recording_id,
                        segment.index,
                        SegmentTranscription::Failed,
                        None,
                    )?;
                    return Err(match err {
                        e @ PipelineError::TranscriptionFailed { .. }
                        | e @ PipelineError::TranscriptionTimeout { .. } => e,
                        other => PipelineError::TranscriptionFailed {
                            segment_index: segment.index,
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }

        let confidence = if confidence_count > 0 {
            confidence_sum / confidence_count as f64
        } else {
            0.0
        };

        let transcript = Transcript::new(
            recording_id,
            text,
            language.unwrap_or_else(|| "en".to_string()),
            words,
            confidence,
            model,
        );
        info!(
            words = transcript.words.len(),
            language = %transcript.language,
            "transcript merged"
        );
        debug_assert!(transcript.is_monotonic());
        Ok(transcript)
    }
}

/// Word-aligned tail of the accumulated text, at most `max_chars` long.
fn tail_hint(text: &str, max_chars: usize) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    if text.chars().count() <= max_chars {
        return Some(text.to_string());
    }

    let tail: String = text
        .chars()
        .rev()
        .take(max_chars)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    // Drop the leading partial word.
    match tail.find(char::is_whitespace) {
        Some(pos) => Some(tail[pos..].trim_start().to_string()),
        None => Some(tail),
    }
}

fn append_fragment_text(text: &mut String, fragment: &str) {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return;
    }
    if !text.is_empty() {
        text.push(' ');
    }
    text.push_str(fragment);
}

/// Shift a segment's word timings onto the recording timeline. A provider
/// occasionally reports a first word slightly before zero or overlapping
/// the previous segment; those are clamped at the boundary so the merged
/// timeline stays non-decreasing.
fn append_shifted_words(merged: &mut Vec<WordTiming>, words: &[WordTiming], offset_secs: f64) {
    let floor = merged.last().map(|w| w.end_secs).unwrap_or(0.0);
    for word in words {
        let start = (word.start_secs + offset_secs).max(floor);
        let end = (word.end_secs + offset_secs).max(start);
        merged.push(WordTiming {
            word: word.word.clone(),
            start_secs: start,
            end_secs: end,
        });
    }
}
