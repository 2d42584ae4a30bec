//! Study guide: structured AI-generated study content for a recording.
//!
//! The content schema doubles as the wire schema for the generative
//! service's JSON response. Only structure and lifecycle are pinned down;
//! wording is whatever the model produced.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recording::ScriptureRef;

/// An outline entry covering a time range of the sermon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineSection {
    pub title: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// A notable quote with the moment it was spoken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    pub timestamp_secs: f64,
}

/// Kinds of discussion questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Observation,
    Interpretation,
    Application,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionQuestion {
    pub kind: QuestionKind,
    pub question: String,
}

/// The structured study content produced by the generative service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyGuideContent {
    pub summary: String,

    #[serde(default)]
    pub themes: Vec<String>,

    #[serde(default)]
    pub outline: Vec<OutlineSection>,

    #[serde(default)]
    pub quotes: Vec<Quote>,

    /// References literally spoken in the sermon (seeded from extraction).
    #[serde(default)]
    pub mentioned_references: Vec<ScriptureRef>,

    /// References the model proposes but that were not spoken.
    #[serde(default)]
    pub suggested_references: Vec<ScriptureRef>,

    #[serde(default)]
    pub discussion_questions: Vec<DiscussionQuestion>,

    #[serde(default)]
    pub reflection_prompts: Vec<String>,

    #[serde(default)]
    pub application_points: Vec<String>,
}

/// A generated guide, at most one per recording, regenerated only when the
/// transcript's content hash changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyGuide {
    pub recording_id: Uuid,
    pub content: StudyGuideContent,

    /// Identifier of the generative model that produced this.
    pub model: String,

    /// Version of the prompt template used.
    pub prompt_version: String,

    /// Hash of the transcript this guide was generated from. Serves as
    /// the regeneration cache key: unchanged hash means no regeneration.
    pub transcript_hash: String,
}
