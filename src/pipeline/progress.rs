//! Per-recording progress fan-out.
//!
//! Observers subscribe by recording id and receive status plus an overall
//! 0.0 to 1.0 fraction composed from the stage's base range and intra-stage
//! progress. Slow observers that fall behind the broadcast buffer miss
//! intermediate updates, never the job itself.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::RecordingStatus;

const CHANNEL_CAPACITY: usize = 64;

/// One progress observation for a recording.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub recording_id: Uuid,
    pub status: RecordingStatus,
    /// Overall completion in 0.0..=1.0.
    pub fraction: f32,
    /// Present on failure and degradation.
    pub error: Option<String>,
}

/// Fraction range a stage occupies within overall progress.
fn stage_range(status: RecordingStatus) -> (f32, f32) {
    match status {
        RecordingStatus::Pending => (0.0, 0.05),
        RecordingStatus::Uploading => (0.05, 0.35),
        RecordingStatus::Transcribing => (0.35, 0.75),
        RecordingStatus::Moderating => (0.75, 0.80),
        RecordingStatus::Analyzing => (0.80, 0.95),
        RecordingStatus::Saving => (0.95, 1.0),
        RecordingStatus::Succeeded => (1.0, 1.0),
        // Terminal failure states report 1.0: the job is over.
        RecordingStatus::Failed | RecordingStatus::Degraded => (1.0, 1.0),
    }
}

/// Overall fraction for a stage plus progress within it (0.0..=1.0).
pub fn overall_fraction(status: RecordingStatus, within_stage: f32) -> f32 {
    let (start, end) = stage_range(status);
    start + (end - start) * within_stage.clamp(0.0, 1.0)
}

/// Registry of progress subscribers, keyed by recording id.
#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<ProgressUpdate>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a recording's progress. Safe to call before the job
    /// starts.
    pub fn subscribe(&self, recording_id: Uuid) -> broadcast::Receiver<ProgressUpdate> {
        self.sender(recording_id).subscribe()
    }

    /// Publish an update; dropped silently when nobody is subscribed.
    pub fn publish(&self, update: ProgressUpdate) {
        let _ = self.sender(update.recording_id).send(update);
    }

    /// Drop the channel for a finished recording.
    pub fn forget(&self, recording_id: Uuid) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.remove(&recording_id);
        }
    }

    fn sender(&self, recording_id: Uuid) -> broadcast::Sender<ProgressUpdate> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(recording_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}
