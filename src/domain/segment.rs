//! Segments: bounded-size slices of a recording's audio.
//!
//! Segments are created in order during capture (or import splitting) and
//! are processed and uploaded independently. Indices are contiguous from 0
//! and offsets leave no gaps or overlaps.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transcript::WordTiming;

/// Number of bins in the fixed-size waveform summary.
pub const WAVEFORM_BINS: usize = 64;

/// Upload state of a segment's audio bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
}

/// Per-segment transcription outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentTranscription {
    Pending,
    Done,
    Failed,
}

/// One bounded slice of a recording's audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub recording_id: Uuid,

    /// Contiguous from 0 within the recording.
    pub index: u32,

    /// Offset of this segment's first sample within the recording.
    pub start_secs: f64,
    pub duration_secs: f64,

    pub local_path: PathBuf,

    /// Object-store key, set once the upload completes.
    pub remote_path: Option<String>,

    pub byte_size: u64,

    /// SHA-256 of the audio bytes, hex-encoded. Used for upload
    /// verification and corruption detection.
    pub content_hash: String,

    pub upload_status: UploadStatus,
    pub transcription_status: SegmentTranscription,

    /// This segment's transcribed text, persisted so a later segment's
    /// failure never forces re-transcription of earlier ones.
    pub transcript_fragment: Option<String>,

    /// Word timings for the fragment, segment-relative. Replayed next to
    /// the fragment on retry so the merged transcript keeps its timeline.
    #[serde(default)]
    pub fragment_words: Vec<WordTiming>,

    /// Fixed-size peak-amplitude summary for visualization.
    pub waveform: Vec<f32>,
}

impl Segment {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

/// Verify the ordering invariants over a recording's segments: indices
/// contiguous from 0, segment 0 starting at offset 0, and each segment's
/// end equal to the next segment's start (within `tolerance_secs`).
pub fn validate_contiguity(segments: &[Segment], tolerance_secs: f64) -> Result<(), String> {
    for (i, segment) in segments.iter().enumerate() {
        if segment.index != i as u32 {
            return Err(format!(
                "segment index {} found at position {}",
                segment.index, i
            ));
        }
    }

    if let Some(first) = segments.first() {
        if first.start_secs.abs() > tolerance_secs {
            return Err(format!("segment 0 starts at {}, not 0", first.start_secs));
        }
    }

    for pair in segments.windows(2) {
        let gap = (pair[0].end_secs() - pair[1].start_secs).abs();
        if gap > tolerance_secs {
            return Err(format!(
                "gap of {:.3}s between segment {} and {}",
                gap, pair[0].index, pair[1].index
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_segment(index: u32, start: f64, duration: f64) -> Segment {
        Segment {
            recording_id: Uuid::new_v4(),
            index,
            start_secs: start,
            duration_secs: duration,
            local_path: PathBuf::from(format!("/tmp/seg-{index}.pcm")),
            remote_path: None,
            byte_size: 1024,
            content_hash: "abc123".into(),
            upload_status: UploadStatus::Pending,
            transcription_status: SegmentTranscription::Pending,
            transcript_fragment: None,
            fragment_words: Vec::new(),
            waveform: vec![0.0; WAVEFORM_BINS],
        }
    }

    #[test]
    fn test_contiguous_segments_pass() {
        let segments = vec![
            make_segment(0, 0.0, 600.0),
            make_segment(1, 600.0, 600.0),
            make_segment(2, 1200.0, 120.0),
        ];
        assert!(validate_contiguity(&segments, 0.01).is_ok());
    }

    #[test]
    fn test_gap_detected() {
        let segments = vec![make_segment(0, 0.0, 600.0), make_segment(1, 601.0, 60.0)];
        assert!(validate_contiguity(&segments, 0.01).is_err());
    }

    #[test]
    fn test_nonzero_start_detected() {
        let segments = vec![make_segment(0, 5.0, 600.0)];
        assert!(validate_contiguity(&segments, 0.01).is_err());
    }

    #[test]
    fn test_index_hole_detected() {
        let segments = vec![make_segment(0, 0.0, 600.0), make_segment(2, 600.0, 60.0)];
        assert!(validate_contiguity(&segments, 0.01).is_err());
    }

    #[test]
    fn test_empty_is_valid() {
        assert!(validate_contiguity(&[], 0.01).is_ok());
    }
}
