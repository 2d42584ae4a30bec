//! Study guide generation with scripture reference extraction.
//!
//! References spoken in the sermon are extracted locally by regex and
//! passed to the generative service as hints; the service returns the
//! structured guide. Guides are keyed by transcript content hash so a
//! regenerate request on an unchanged transcript never calls the service.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, instrument};

use crate::domain::{ScriptureRef, StudyGuide, Transcript};
use crate::error::PipelineResult;
use crate::store::Store;

use super::{Generative, GuideRequest};

pub struct StudyGuideGenerator {
    backend: Arc<dyn Generative>,
    store: Arc<Store>,
    prompt_version: String,
}

impl StudyGuideGenerator {
    pub fn new(backend: Arc<dyn Generative>, store: Arc<Store>, prompt_version: String) -> Self {
        Self {
            backend,
            store,
            prompt_version,
        }
    }

    /// Generate (or reuse) the study guide for a transcript.
    ///
    /// The stored guide is reused when its `transcript_hash` matches the
    /// current transcript; only an edited transcript reaches the service
    /// again.
    #[instrument(skip(self, transcript), fields(recording_id = %transcript.recording_id))]
    pub async fn generate(&self, transcript: &Transcript) -> PipelineResult<StudyGuide> {
        if let Some(existing) = self.store.get_study_guide(transcript.recording_id)? {
            if existing.transcript_hash == transcript.content_hash {
                debug!("study guide cache hit, skipping generation");
                return Ok(existing);
            }
        }

        let mentioned = extract_scripture_refs(&transcript.text);
        info!(mentioned = mentioned.len(), "generating study guide");

        let response = self
            .backend
            .generate_guide(GuideRequest {
                transcript_text: transcript.text.clone(),
                mentioned_references: mentioned,
                prompt_version: self.prompt_version.clone(),
            })
            .await?;

        let guide = StudyGuide {
            recording_id: transcript.recording_id,
            content: response.content,
            model: response.model,
            prompt_version: self.prompt_version.clone(),
            transcript_hash: transcript.content_hash.clone(),
        };
        self.store.save_study_guide(&guide)?;
        Ok(guide)
    }
}

/// Extract scripture references of the form "Book Chapter:Verse" or
/// "Book Chapter:Verse-Verse", including numbered books ("1 John 4:8",
/// "2 Corinthians 5:17").
pub fn extract_scripture_refs(text: &str) -> Vec<ScriptureRef> {
    // Book name: optional leading ordinal, then a capitalized word with an
    // optional "of Word" continuation for multi-word books.
    static REF_PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = REF_PATTERN.get_or_init(|| {
        Regex::new(
            r"\b([1-3]\s+)?([A-Z][a-z]+(?:\s+of\s+[A-Z][a-z]+)?)\s+(\d{1,3}):(\d{1,3})(?:\s*-\s*(\d{1,3}))?",
        )
        .expect("reference pattern is a valid constant")
    });

    let mut refs = Vec::new();
    for caps in pattern.captures_iter(text) {
        let ordinal = caps
            .get(1)
            .map(|m| format!("{} ", m.as_str().trim()))
            .unwrap_or_default();
        let book = format!("{}{}", ordinal, &caps[2]);

        let (Ok(chapter), Ok(verse_start)) = (caps[3].parse::<u16>(), caps[4].parse::<u16>())
        else {
            continue;
        };
        let verse_end = caps.get(5).and_then(|m| m.as_str().parse::<u16>().ok());

        // A reversed range is a misread timestamp or number, not a
        // reference.
        if let Some(end) = verse_end {
            if end <= verse_start {
                continue;
            }
        }

        let reference = ScriptureRef {
            book,
            chapter,
            verse_start,
            verse_end,
        };
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }
    refs
}
