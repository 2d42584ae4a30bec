//! Data structures for recordings and their processing artifacts.

pub mod bookmark;
pub mod recording;
pub mod segment;
pub mod study_guide;
pub mod transcript;

pub use bookmark::Bookmark;
pub use recording::{GuideStatus, JobState, Recording, RecordingStatus, ScriptureRef};
pub use segment::{validate_contiguity, Segment, SegmentTranscription, UploadStatus, WAVEFORM_BINS};
pub use study_guide::{
    DiscussionQuestion, OutlineSection, QuestionKind, Quote, StudyGuide, StudyGuideContent,
};
pub use transcript::{Transcript, WordTiming};
