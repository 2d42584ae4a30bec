//! File import: turn an existing audio file into a pending recording.
//!
//! Imported audio goes through the same segmenting as live capture, so
//! every downstream stage sees identical segments regardless of origin.
//! Raw PCM and WAV (16-bit LE) files are supported; compressed formats
//! are rejected up front rather than failing mid-pipeline.

use std::path::Path;

use tracing::{info, instrument};

use crate::config::Config;
use crate::domain::{Recording, Segment};
use crate::error::{PipelineError, PipelineResult};
use crate::store::Store;

use super::chunker::CaptureSession;

/// Import size ceiling. Several hours of 16kHz mono PCM fits well under
/// this; anything larger is almost certainly not a sermon recording.
const MAX_IMPORT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Samples pushed per frame while re-segmenting an imported file.
const IMPORT_FRAME_SAMPLES: usize = 16_384;

/// Import an audio file: validate it, segment it like a live capture and
/// persist the pending recording with its segments.
#[instrument(skip(store, config), fields(path = %path.display()))]
pub async fn import_file(
    store: &Store,
    config: &Config,
    path: &Path,
    title: &str,
    speaker: Option<String>,
) -> PipelineResult<(Recording, Vec<Segment>)> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(PipelineError::Io(e)),
    };
    if metadata.len() > MAX_IMPORT_BYTES {
        return Err(PipelineError::FileTooLarge {
            actual: metadata.len(),
            limit: MAX_IMPORT_BYTES,
        });
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let bytes = tokio::fs::read(path).await?;
    let pcm = match extension.as_str() {
        "pcm" | "raw" => bytes,
        "wav" => wav_data(&bytes)?,
        other => return Err(PipelineError::UnsupportedFormat(other.to_string())),
    };

    let samples = bytes_to_samples(&pcm);

    let recording = Recording::new(title, speaker);
    store.insert_recording(&recording)?;

    let (mut session, _streams) = CaptureSession::start(
        recording.id,
        config.chunking.clone(),
        config.audio_dir(),
    )
    .await?;
    for frame in samples.chunks(IMPORT_FRAME_SAMPLES) {
        session.push_frame(frame).await?;
    }
    let segments = session.stop().await?;

    for segment in &segments {
        store.insert_segment(segment)?;
    }
    let duration_secs = segments.last().map(|s| s.end_secs()).unwrap_or(0.0);
    store.set_duration(recording.id, duration_secs)?;

    info!(
        recording_id = %recording.id,
        segments = segments.len(),
        duration_secs,
        "file imported"
    );
    let recording = store.get_recording(recording.id)?;
    Ok((recording, segments))
}

/// Extract the sample data from a WAV container, minimally: verify the
/// RIFF/WAVE magic and locate the `data` chunk.
fn wav_data(bytes: &[u8]) -> PipelineResult<Vec<u8>> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(PipelineError::UnsupportedFormat(
            "not a RIFF/WAVE file".to_string(),
        ));
    }

    let mut offset = 12usize;
    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_len = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]) as usize;
        let body = offset + 8;

        if chunk_id == b"data" {
            let end = (body + chunk_len).min(bytes.len());
            return Ok(bytes[body..end].to_vec());
        }
        // Chunks are word-aligned.
        offset = body + chunk_len + (chunk_len & 1);
    }

    Err(PipelineError::UnsupportedFormat(
        "WAV file has no data chunk".to_string(),
    ))
}

fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
