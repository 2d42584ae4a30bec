//! sermonflow - sermon audio processing pipeline
//!
//! Records or imports sermon audio, splits it into bounded segments,
//! transcribes and moderates it, generates a structured study guide and
//! syncs everything offline-first to a remote backend.
//!
//! # Architecture
//!
//! The system is built around a durable per-recording state machine:
//! - Every stage transition is committed to SQLite before the next stage
//!   starts
//! - A killed process resumes from the persisted stage without re-running
//!   committed work
//! - Transcription failure and study guide failure are kept apart: a
//!   degraded recording still has its full transcript
//!
//! # Modules
//!
//! - `audio`: capture chunking, file import, hardware session arbitration
//! - `domain`: data structures (Recording, Segment, Transcript, StudyGuide)
//! - `store`: SQLite-backed durable store with FTS transcript search
//! - `services`: external collaborator traits and their HTTP clients
//! - `pipeline`: the job queue, worker pool, retry policy and progress
//! - `sync`: offline-first reconciliation and the bounded audio cache
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Import a recording and process it end to end
//! sermonflow import sunday.wav --title "Sunday service" --process
//!
//! # Resume anything left mid-pipeline after a crash
//! sermonflow resume
//!
//! # Search across transcripts
//! sermonflow search "prodigal son"
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod services;
pub mod store;
pub mod sync;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use domain::{
    Bookmark, GuideStatus, JobState, Recording, RecordingStatus, ScriptureRef, Segment,
    StudyGuide, StudyGuideContent, Transcript, WordTiming,
};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{PipelineDeps, ProcessingJobQueue, ProgressUpdate};
pub use store::Store;
pub use sync::{AudioCache, SyncEngine};

// Audio capture
pub use audio::{AudioMode, AudioSessionArbiter, CaptureSession, CaptureState};
