//! Capture chunker: splits a continuous audio stream into bounded segments.
//!
//! Accumulates PCM frames and finalizes the open segment when either the
//! configured duration threshold or the byte ceiling is reached, so every
//! segment satisfies the transcription service's upload limit regardless
//! of bitrate fluctuation. Finalizing computes the content hash and a
//! fixed-size waveform summary and writes the bytes to disk.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::domain::{Segment, SegmentTranscription, UploadStatus, WAVEFORM_BINS};
use crate::error::{PipelineError, PipelineResult};

/// Capture lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Recording,
    Paused,
    Stopped,
}

/// Receiving ends handed to the caller at session start.
pub struct SessionStreams {
    /// Finalized segments, in index order.
    pub segments: mpsc::UnboundedReceiver<Segment>,

    /// Normalized audio level samples (0.0 to 1.0), one per pushed frame.
    /// Visualization only; dropping this receiver is harmless.
    pub levels: mpsc::UnboundedReceiver<f32>,
}

/// An in-progress capture for one recording.
pub struct CaptureSession {
    recording_id: Uuid,
    config: ChunkingConfig,
    segment_dir: PathBuf,

    buffer: Vec<i16>,
    next_index: u32,
    /// Start offset of the open segment within the recording.
    clock_secs: f64,
    finalized: Vec<Segment>,
    state: CaptureState,

    segment_tx: mpsc::UnboundedSender<Segment>,
    level_tx: mpsc::UnboundedSender<f32>,
}

impl CaptureSession {
    /// Begin capturing for a recording. Segment files are written under
    /// `audio_dir/<recording_id>/`.
    pub async fn start(
        recording_id: Uuid,
        config: ChunkingConfig,
        audio_dir: PathBuf,
    ) -> PipelineResult<(Self, SessionStreams)> {
        let segment_dir = audio_dir.join(recording_id.to_string());
        tokio::fs::create_dir_all(&segment_dir).await?;

        let (segment_tx, segment_rx) = mpsc::unbounded_channel();
        let (level_tx, level_rx) = mpsc::unbounded_channel();

        info!(%recording_id, "capture started");
        Ok((
            Self {
                recording_id,
                config,
                segment_dir,
                buffer: Vec::new(),
                next_index: 0,
                clock_secs: 0.0,
                finalized: Vec::new(),
                state: CaptureState::Recording,
                segment_tx,
                level_tx,
            },
            SessionStreams {
                segments: segment_rx,
                levels: level_rx,
            },
        ))
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Feed one frame of PCM samples. Frames arriving while paused or
    /// stopped are dropped.
    pub async fn push_frame(&mut self, samples: &[i16]) -> PipelineResult<()> {
        if self.state != CaptureState::Recording || samples.is_empty() {
            return Ok(());
        }

        let _ = self.level_tx.send(peak_level(samples));

        // Segment capacity in samples, whichever of the duration
        // threshold or the byte ceiling is tighter. Frames larger than
        // the remaining room are split across segments, so no finalized
        // segment exceeds the upload limit at any frame size.
        let duration_samples =
            self.config.max_segment_secs as usize * self.config.sample_rate as usize;
        let ceiling_samples = (self.config.max_segment_bytes / 2) as usize;
        let capacity = duration_samples.min(ceiling_samples).max(1);

        let mut rest = samples;
        while !rest.is_empty() {
            let take = (capacity - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() >= capacity {
                self.finalize_open_segment().await?;
            }
        }

        Ok(())
    }

    /// Pause capture; the open segment is kept in memory.
    pub fn pause(&mut self) {
        if self.state == CaptureState::Recording {
            debug!(recording_id = %self.recording_id, "capture paused");
            self.state = CaptureState::Paused;
        }
    }

    /// Resume after a pause. Only valid once hardware ownership is held
    /// again; the caller coordinates with the arbiter.
    pub fn resume(&mut self) {
        if self.state == CaptureState::Paused {
            debug!(recording_id = %self.recording_id, "capture resumed");
            self.state = CaptureState::Recording;
        }
    }

    /// Hardware was lost to an interruption. Pause deterministically and
    /// finalize the partially captured segment as-is rather than dropping
    /// it.
    pub async fn handle_interruption(&mut self) -> PipelineResult<()> {
        warn!(recording_id = %self.recording_id, "capture interrupted");
        self.pause();
        if !self.buffer.is_empty() {
            self.finalize_open_segment().await?;
        }
        Ok(())
    }

    /// Finish the capture: the final partial segment is finalized and the
    /// complete ordered list returned.
    pub async fn stop(mut self) -> PipelineResult<Vec<Segment>> {
        if !self.buffer.is_empty() {
            self.finalize_open_segment().await?;
        }
        self.state = CaptureState::Stopped;
        info!(recording_id = %self.recording_id, segments = self.finalized.len(), "capture stopped");
        Ok(self.finalized)
    }

    /// Abandon the capture and delete every segment file written so far.
    pub async fn cancel(mut self) -> PipelineResult<()> {
        self.state = CaptureState::Stopped;
        self.buffer.clear();
        for segment in &self.finalized {
            if let Err(e) = tokio::fs::remove_file(&segment.local_path).await {
                warn!(path = %segment.local_path.display(), error = %e, "failed to remove segment file");
            }
        }
        let _ = tokio::fs::remove_dir(&self.segment_dir).await;
        info!(recording_id = %self.recording_id, "capture cancelled");
        Ok(())
    }

    async fn finalize_open_segment(&mut self) -> PipelineResult<()> {
        let samples = std::mem::take(&mut self.buffer);
        if samples.is_empty() {
            return Ok(());
        }

        let duration_secs = samples.len() as f64 / self.config.sample_rate as f64;
        let bytes = samples_to_bytes(&samples);
        let content_hash = hex::encode(Sha256::digest(&bytes));
        let local_path = self.segment_dir.join(format!("{:05}.pcm", self.next_index));

        tokio::fs::write(&local_path, &bytes).await.map_err(|e| {
            if e.raw_os_error() == Some(28) {
                PipelineError::DiskFull(local_path.clone())
            } else {
                PipelineError::Io(e)
            }
        })?;

        let segment = Segment {
            recording_id: self.recording_id,
            index: self.next_index,
            start_secs: self.clock_secs,
            duration_secs,
            local_path,
            remote_path: None,
            byte_size: bytes.len() as u64,
            content_hash,
            upload_status: UploadStatus::Pending,
            transcription_status: SegmentTranscription::Pending,
            transcript_fragment: None,
            fragment_words: Vec::new(),
            waveform: summarize_waveform(&samples, WAVEFORM_BINS),
        };

        debug!(
            recording_id = %self.recording_id,
            index = segment.index,
            duration_secs,
            bytes = segment.byte_size,
            "segment finalized"
        );

        self.clock_secs += duration_secs;
        self.next_index += 1;
        let _ = self.segment_tx.send(segment.clone());
        self.finalized.push(segment);
        Ok(())
    }
}

/// Peak amplitude of a frame, normalized to 0.0..=1.0.
fn peak_level(samples: &[i16]) -> f32 {
    let peak = samples
        .iter()
        .map(|s| (*s as i32).unsigned_abs())
        .max()
        .unwrap_or(0);
    (peak as f32 / i16::MAX as f32).min(1.0)
}

/// Fixed-size peak-amplitude summary for visualization.
fn summarize_waveform(samples: &[i16], bins: usize) -> Vec<f32> {
    if samples.is_empty() {
        return vec![0.0; bins];
    }
    let bin_size = samples.len().div_ceil(bins);
    (0..bins)
        .map(|i| {
            let start = i * bin_size;
            if start >= samples.len() {
                return 0.0;
            }
            let end = ((i + 1) * bin_size).min(samples.len());
            peak_level(&samples[start..end])
        })
        .collect()
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::segment::validate_contiguity;
    use tempfile::TempDir;

    fn small_config() -> ChunkingConfig {
        ChunkingConfig {
            max_segment_secs: 1,
            max_segment_bytes: 1024 * 1024,
            sample_rate: 16_000,
        }
    }

    async fn start_session(config: ChunkingConfig) -> (CaptureSession, SessionStreams, TempDir) {
        let temp = TempDir::new().unwrap();
        let (session, streams) =
            CaptureSession::start(Uuid::new_v4(), config, temp.path().to_path_buf())
                .await
                .unwrap();
        (session, streams, temp)
    }

    #[tokio::test]
    async fn test_duration_threshold_splits() {
        let (mut session, mut streams, _temp) = start_session(small_config()).await;

        // 2.5 seconds of audio in 100ms frames at 16kHz
        for _ in 0..25 {
            session.push_frame(&vec![500i16; 1600]).await.unwrap();
        }
        let segments = session.stop().await.unwrap();

        assert_eq!(segments.len(), 3);
        assert!((segments[0].duration_secs - 1.0).abs() < 1e-9);
        assert!((segments[2].duration_secs - 0.5).abs() < 1e-9);
        validate_contiguity(&segments, 1e-9).unwrap();

        // The same segments were streamed as they were finalized
        assert_eq!(streams.segments.recv().await.unwrap().index, 0);
        assert_eq!(streams.segments.recv().await.unwrap().index, 1);
    }

    #[tokio::test]
    async fn test_byte_ceiling_bounds_every_segment() {
        let config = ChunkingConfig {
            max_segment_secs: 3600, // duration threshold effectively off
            max_segment_bytes: 8_000,
            sample_rate: 16_000,
        };
        let (mut session, _streams, _temp) = start_session(config).await;

        for _ in 0..10 {
            session.push_frame(&vec![100i16; 1600]).await.unwrap();
        }
        let segments = session.stop().await.unwrap();

        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(
                segment.byte_size <= 8_000,
                "segment {} is {} bytes",
                segment.index,
                segment.byte_size
            );
        }
        validate_contiguity(&segments, 1e-9).unwrap();
    }

    #[tokio::test]
    async fn test_single_oversized_frame_is_split() {
        let config = ChunkingConfig {
            max_segment_secs: 3600,
            max_segment_bytes: 8_000,
            sample_rate: 16_000,
        };
        let (mut session, _streams, _temp) = start_session(config).await;

        // One frame of 20_000 bytes against an 8_000-byte ceiling.
        session.push_frame(&vec![100i16; 10_000]).await.unwrap();
        let segments = session.stop().await.unwrap();

        assert_eq!(segments.len(), 3);
        for segment in &segments {
            assert!(
                segment.byte_size <= 8_000,
                "segment {} is {} bytes",
                segment.index,
                segment.byte_size
            );
        }
        assert_eq!(
            segments.iter().map(|s| s.byte_size).sum::<u64>(),
            20_000
        );
        validate_contiguity(&segments, 1e-9).unwrap();
    }

    #[tokio::test]
    async fn test_segment_files_and_hashes() {
        let (mut session, _streams, _temp) = start_session(small_config()).await;
        session.push_frame(&vec![1234i16; 16_000]).await.unwrap();
        let segments = session.stop().await.unwrap();

        assert_eq!(segments.len(), 1);
        let on_disk = tokio::fs::read(&segments[0].local_path).await.unwrap();
        assert_eq!(on_disk.len() as u64, segments[0].byte_size);
        assert_eq!(
            hex::encode(Sha256::digest(&on_disk)),
            segments[0].content_hash
        );
        assert_eq!(segments[0].waveform.len(), WAVEFORM_BINS);
        assert!(segments[0].waveform.iter().all(|v| *v > 0.0));
    }

    #[tokio::test]
    async fn test_paused_frames_are_dropped() {
        let (mut session, _streams, _temp) = start_session(small_config()).await;
        session.push_frame(&vec![10i16; 1600]).await.unwrap();
        session.pause();
        session.push_frame(&vec![10i16; 16_000]).await.unwrap();
        session.resume();
        session.push_frame(&vec![10i16; 1600]).await.unwrap();

        let segments = session.stop().await.unwrap();
        assert_eq!(segments.len(), 1);
        // Only the two un-paused frames made it in
        assert!((segments[0].duration_secs - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_interruption_finalizes_partial_segment() {
        let (mut session, _streams, _temp) = start_session(small_config()).await;
        session.push_frame(&vec![10i16; 4800]).await.unwrap(); // 300ms
        session.handle_interruption().await.unwrap();

        assert_eq!(session.state(), CaptureState::Paused);
        let segments = session.stop().await.unwrap();
        // The interrupted partial was finalized, not dropped
        assert_eq!(segments.len(), 1);
        assert!((segments[0].duration_secs - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancel_discards_files() {
        let (mut session, _streams, _temp) = start_session(small_config()).await;
        session.push_frame(&vec![10i16; 16_000]).await.unwrap();
        session.push_frame(&vec![10i16; 16_000]).await.unwrap();

        let paths: Vec<_> = session.finalized.iter().map(|s| s.local_path.clone()).collect();
        assert!(!paths.is_empty());
        session.cancel().await.unwrap();

        for path in paths {
            assert!(!path.exists());
        }
    }

    #[tokio::test]
    async fn test_level_emission() {
        let (mut session, mut streams, _temp) = start_session(small_config()).await;
        session.push_frame(&vec![i16::MAX; 160]).await.unwrap();
        session.push_frame(&vec![0i16; 160]).await.unwrap();

        let loud = streams.levels.recv().await.unwrap();
        let quiet = streams.levels.recv().await.unwrap();
        assert!((loud - 1.0).abs() < 1e-6);
        assert!(quiet.abs() < 1e-6);
    }

    #[test]
    fn test_waveform_bins() {
        let samples = vec![i16::MAX; 1000];
        let waveform = summarize_waveform(&samples, WAVEFORM_BINS);
        assert_eq!(waveform.len(), WAVEFORM_BINS);
        assert!(waveform.iter().all(|v| (*v - 1.0).abs() < 1e-6));

        let empty = summarize_waveform(&[], WAVEFORM_BINS);
        assert_eq!(empty, vec![0.0; WAVEFORM_BINS]);
    }
}
