//! End-to-end pipeline tests over mock services.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use sermonflow::audio::CaptureSession;
use sermonflow::config::ChunkingConfig;
use sermonflow::domain::{validate_contiguity, GuideStatus, RecordingStatus, Recording};
use sermonflow::error::PipelineError;
use sermonflow::pipeline::{PipelineDeps, ProcessingJobQueue};
use sermonflow::store::Store;

use common::*;

struct Harness {
    store: Arc<Store>,
    speech: Arc<MockSpeech>,
    generative: Arc<MockGenerative>,
    moderation: Arc<MockModeration>,
    objects: Arc<MockObjects>,
    queue: ProcessingJobQueue,
    _temp: TempDir,
}

fn harness() -> Harness {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let speech = MockSpeech::new();
    let generative = MockGenerative::new();
    let moderation = MockModeration::new();
    let objects = MockObjects::new();

    let queue = ProcessingJobQueue::new(
        PipelineDeps {
            store: Arc::clone(&store),
            speech: speech.clone(),
            generative: generative.clone(),
            moderation: moderation.clone(),
            objects: objects.clone(),
        },
        fast_jobs(),
        "v2".to_string(),
    );

    Harness {
        store,
        speech,
        generative,
        moderation,
        objects,
        queue,
        _temp: temp,
    }
}

#[tokio::test]
async fn test_happy_path_reaches_succeeded() {
    let h = harness();
    let (recording, segments) = seed_recording(&h.store, h._temp.path(), 2, 10.0);

    h.queue.enqueue(recording.id);
    let done = wait_terminal(&h.store, recording.id).await;

    assert_eq!(done.status, RecordingStatus::Succeeded);
    assert_eq!(done.guide_status, GuideStatus::Ready);
    assert!(done.last_error.is_none());

    // One upload and one transcription per segment, one moderation pass,
    // one guide generation.
    assert_eq!(h.objects.put_calls.load(Ordering::SeqCst), segments.len());
    assert_eq!(h.speech.calls.load(Ordering::SeqCst), segments.len());
    assert_eq!(h.moderation.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.generative.calls.load(Ordering::SeqCst), 1);

    // References spoken in the transcript end up on the recording.
    assert!(done
        .scripture_refs
        .iter()
        .any(|r| r.book == "John" && r.chapter == 3 && r.verse_start == 16));

    // Segments carry their remote paths and fragments.
    for segment in h.store.segments_for(recording.id).unwrap() {
        assert!(segment.remote_path.is_some());
        assert!(segment.transcript_fragment.is_some());
    }
}

#[tokio::test]
async fn test_progress_fractions_are_monotonic() {
    let h = harness();
    let (recording, _) = seed_recording(&h.store, h._temp.path(), 2, 10.0);

    let mut rx = h.queue.subscribe(recording.id);
    h.queue.enqueue(recording.id);
    wait_terminal(&h.store, recording.id).await;

    let mut last = -1.0f32;
    let mut saw_terminal = false;
    while let Ok(update) = rx.try_recv() {
        assert!(update.fraction >= last, "progress went backwards");
        assert!((0.0..=1.0).contains(&update.fraction));
        last = update.fraction;
        if update.status == RecordingStatus::Succeeded {
            saw_terminal = true;
        }
    }
    assert!(saw_terminal);
    assert_eq!(last, 1.0);
}

/// A 22-minute recording with 10-minute chunks becomes three segments
/// (10m, 10m, 2m) whose merged transcript ends near the 22-minute mark.
#[tokio::test]
async fn test_twenty_two_minute_recording() {
    let h = harness();

    let chunking = ChunkingConfig {
        max_segment_secs: 600,
        max_segment_bytes: 25 * 1024 * 1024,
        sample_rate: TEST_SAMPLE_RATE,
    };
    let recording = Recording::new("Long sermon", None);
    h.store.insert_recording(&recording).unwrap();

    let (mut session, _streams) = CaptureSession::start(
        recording.id,
        chunking,
        h._temp.path().to_path_buf(),
    )
    .await
    .unwrap();

    // 22 minutes of audio in 60-second frames.
    let frame = vec![64i16; 60 * TEST_SAMPLE_RATE as usize];
    for _ in 0..22 {
        session.push_frame(&frame).await.unwrap();
    }
    let segments = session.stop().await.unwrap();

    assert_eq!(segments.len(), 3);
    assert!((segments[0].duration_secs - 600.0).abs() < 1e-6);
    assert!((segments[1].duration_secs - 600.0).abs() < 1e-6);
    assert!((segments[2].duration_secs - 120.0).abs() < 1e-6);
    validate_contiguity(&segments, 1e-6).unwrap();

    for segment in &segments {
        h.store.insert_segment(segment).unwrap();
    }

    h.queue.enqueue(recording.id);
    let done = wait_terminal(&h.store, recording.id).await;
    assert_eq!(done.status, RecordingStatus::Succeeded);

    let transcript = h.store.get_transcript(recording.id).unwrap().unwrap();
    assert!(transcript.is_monotonic());
    let end = transcript.end_secs();
    assert!(
        (end - 22.0 * 60.0).abs() < 1.0,
        "final word ends at {end}, expected about 1320"
    );
}

#[tokio::test]
async fn test_flagged_content_fails_terminally() {
    let h = harness();
    let (recording, _) = seed_recording(&h.store, h._temp.path(), 1, 5.0);
    h.moderation.flag_with("graphic content");

    h.queue.enqueue(recording.id);
    let done = wait_terminal(&h.store, recording.id).await;

    assert_eq!(done.status, RecordingStatus::Failed);
    assert!(done.last_error.unwrap().contains("graphic content"));
    // Generation never ran.
    assert_eq!(h.generative.calls.load(Ordering::SeqCst), 0);

    // Flagged recordings cannot be retried.
    let err = h.queue.retry(recording.id).unwrap_err();
    assert!(matches!(err, PipelineError::ContentFlagged { .. }));
}

#[tokio::test]
async fn test_cancel_leaves_last_committed_stage() {
    let h = harness();
    let (recording, _) = seed_recording(&h.store, h._temp.path(), 1, 5.0);

    h.queue.enqueue(recording.id);
    // Cancel immediately; whatever stage was committed stays put.
    h.queue.cancel(recording.id);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let after = h.store.get_recording(recording.id).unwrap();
    assert!(
        !after.status.is_terminal() || after.status == RecordingStatus::Succeeded,
        "cancel must not fabricate a failure, got {:?}",
        after.status
    );
}

#[tokio::test]
async fn test_unknown_recording_is_an_error() {
    let h = harness();
    let missing = Uuid::new_v4();
    assert!(matches!(
        h.store.get_recording(missing),
        Err(PipelineError::RecordNotFound { .. })
    ));
}

/// A finished job releases its progress channel: subscribers drain the
/// terminal update and then see the channel close, instead of the queue
/// holding a sender per past recording forever.
#[tokio::test]
async fn test_progress_channel_closes_after_terminal() {
    use tokio::sync::broadcast::error::RecvError;

    let h = harness();
    let (recording, _) = seed_recording(&h.store, h._temp.path(), 1, 5.0);

    let mut progress = h.queue.subscribe(recording.id);
    h.queue.enqueue(recording.id);
    let done = wait_terminal(&h.store, recording.id).await;
    assert_eq!(done.status, RecordingStatus::Succeeded);

    let drained = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let mut saw_terminal = false;
        loop {
            match progress.recv().await {
                Ok(update) => saw_terminal |= update.status.is_terminal(),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return saw_terminal,
            }
        }
    })
    .await
    .expect("progress channel never closed");
    assert!(drained);
}
