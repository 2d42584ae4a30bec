//! Transcript-ok/guide-fails: the degraded state and guide-only retry.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::TempDir;

use sermonflow::domain::{GuideStatus, RecordingStatus};
use sermonflow::pipeline::{PipelineDeps, ProcessingJobQueue};
use sermonflow::store::Store;

use common::*;

struct Harness {
    store: Arc<Store>,
    speech: Arc<MockSpeech>,
    generative: Arc<MockGenerative>,
    moderation: Arc<MockModeration>,
    queue: ProcessingJobQueue,
    temp: TempDir,
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
            objects,
        },
        fast_jobs(),
        "v2".to_string(),
    );

    Harness {
        store,
        speech,
        generative,
        moderation,
        queue,
        temp,
    }
}

#[tokio::test]
async fn test_guide_failure_degrades_and_preserves_transcript() {
    let h = harness();
    let (recording, _) = seed_recording(&h.store, h.temp.path(), 2, 10.0);

    // Every generation attempt fails (both retry attempts).
    h.generative.fail_next(usize::MAX);

    h.queue.enqueue(recording.id);
    let done = wait_terminal(&h.store, recording.id).await;

    assert_eq!(done.status, RecordingStatus::Degraded);
    assert_eq!(done.guide_status, GuideStatus::Failed);
    assert!(done.last_error.is_some());

    // Attempts were capped by the jobs config.
    assert_eq!(
        h.generative.calls.load(Ordering::SeqCst),
        fast_jobs().max_attempts as usize
    );

    // The transcript is persisted and queryable despite the degradation.
    let transcript = h.store.get_transcript(recording.id).unwrap().unwrap();
    assert!(transcript.text.contains("segment 0"));
    let hits = h.store.search_transcripts("sermon", 10).unwrap();
    assert!(hits.iter().any(|hit| hit.recording_id == recording.id));

    // No guide was stored.
    assert!(h.store.get_study_guide(recording.id).unwrap().is_none());
}

#[tokio::test]
async fn test_guide_only_retry_succeeds_without_retranscribing() {
    let h = harness();
    let (recording, _) = seed_recording(&h.store, h.temp.path(), 2, 10.0);

    h.generative.fail_next(usize::MAX);
    h.queue.enqueue(recording.id);
    let degraded = wait_terminal(&h.store, recording.id).await;
    assert_eq!(degraded.status, RecordingStatus::Degraded);

    let speech_calls = h.speech.calls.load(Ordering::SeqCst);
    let moderation_calls = h.moderation.calls.load(Ordering::SeqCst);

    // Service recovers; retry regenerates the guide only.
    h.generative.fail_next(0);
    h.queue.retry(recording.id).unwrap();
    let done = wait_terminal(&h.store, recording.id).await;

    assert_eq!(done.status, RecordingStatus::Succeeded);
    assert_eq!(done.guide_status, GuideStatus::Ready);
    assert!(done.last_error.is_none());

    // Transcription and moderation were not redone.
    assert_eq!(h.speech.calls.load(Ordering::SeqCst), speech_calls);
    assert_eq!(h.moderation.calls.load(Ordering::SeqCst), moderation_calls);

    let guide = h.store.get_study_guide(recording.id).unwrap().unwrap();
    assert_eq!(guide.prompt_version, "v2");
    assert!(!guide.content.summary.is_empty());
}

/// One generation per distinct transcript hash: regenerating with an
/// unchanged transcript serves the stored guide without calling the
/// service; only an edited transcript reaches it again.
#[tokio::test]
async fn test_guide_cache_skips_regeneration() {
    use sermonflow::domain::Transcript;
    use sermonflow::services::StudyGuideGenerator;
    use uuid::Uuid;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let generative = MockGenerative::new();
    let generator =
        StudyGuideGenerator::new(generative.clone(), Arc::clone(&store), "v2".to_string());

    let recording_id = Uuid::new_v4();
    let transcript = Transcript::new(
        recording_id,
        "Grace upon grace, John 1:16.".to_string(),
        "en".to_string(),
        vec![],
        0.9,
        "mock-stt".to_string(),
    );

    let first = generator.generate(&transcript).await.unwrap();
    let second = generator.generate(&transcript).await.unwrap();
    assert_eq!(generative.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.transcript_hash, second.transcript_hash);

    // An edited transcript has a different hash and regenerates.
    let edited = Transcript::new(
        recording_id,
        "Grace upon grace, John 1:16. (edited)".to_string(),
        "en".to_string(),
        vec![],
        0.9,
        "mock-stt".to_string(),
    );
    let third = generator.generate(&edited).await.unwrap();
    assert_eq!(generative.calls.load(Ordering::SeqCst), 2);
    assert_ne!(third.transcript_hash, first.transcript_hash);
}
