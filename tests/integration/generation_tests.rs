/*!
 * End-to-end generation tests over scripted collaborators
 */

use std::path::Path;
use std::sync::Arc;

use subloom::errors::PipelineError;
use subloom::pipeline::progress::{CancellationFlag, ChunkStage, ProgressRecorder};
use subloom::pipeline::retry::RetryPolicy;
use subloom::pipeline::segmentation::plan_fixed_chunks;
use subloom::providers::TranscriptSegment;
use subloom::providers::mock::{InMemoryMedia, MockTranscriber};
use subloom::GenerationOrchestrator;

use crate::common::{generation_model, init_test_logging, test_config};

/// Three 2s lines every 5s, tagged with the clip start
fn three_lines_per_clip() -> MockTranscriber {
    MockTranscriber::new(|clip| {
        Ok((0..3)
            .map(|k| TranscriptSegment {
                start: k as f64 * 5.0,
                end: k as f64 * 5.0 + 2.0,
                text: format!("chunk at {} line {}", clip.start as u64, k),
            })
            .collect())
    })
}

#[test]
fn test_planFixedChunks_with720Seconds_shouldCoverThreeChunks() {
    let chunks = plan_fixed_chunks(720.0, 300.0);
    let bounds: Vec<(f64, f64)> = chunks.iter().map(|c| (c.start, c.end)).collect();
    assert_eq!(bounds, vec![(0.0, 300.0), (300.0, 600.0), (600.0, 720.0)]);
}

#[tokio::test]
async fn test_generate_720sFile_shouldProduceDenseBilingualList() {
    init_test_logging();
    let recorder = Arc::new(ProgressRecorder::new());
    let orchestrator = GenerationOrchestrator::new(
        test_config(),
        Arc::new(three_lines_per_clip()),
        Arc::new(generation_model()),
        Arc::new(InMemoryMedia::new(720.0)),
    )
    .with_progress(recorder.clone())
    .with_retry_policy(RetryPolicy::immediate(1));

    let items = orchestrator.generate(Path::new("episode.mkv")).await.unwrap();

    assert_eq!(items.len(), 9);
    assert_eq!(items.iter().map(|s| s.id).collect::<Vec<_>>(), (1..=9).collect::<Vec<_>>());
    assert!(items.windows(2).all(|w| w[0].start_ms < w[1].start_ms));

    assert_eq!(items[3].original, "chunk at 300 line 0");
    assert_eq!(items[3].start_ms, 300_000);
    assert_eq!(items[3].end_ms, 302_000);
    assert_eq!(items[8].translated, "FR chunk at 600 line 2");
    assert_eq!(items[8].start_ms, 610_000);

    assert!(recorder.notices().is_empty());
    for chunk in 0..3 {
        assert_eq!(recorder.stages_for(chunk).last(), Some(&ChunkStage::Done));
    }
}

#[test]
fn test_generate_whenCancelledUpFront_shouldReturnCancelled() {
    init_test_logging();
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let transcriber = Arc::new(three_lines_per_clip());
    let orchestrator = GenerationOrchestrator::new(
        test_config(),
        transcriber.clone(),
        Arc::new(generation_model()),
        Arc::new(InMemoryMedia::new(720.0)),
    )
    .with_cancellation(cancel);

    let result = tokio_test::block_on(async { orchestrator.generate(Path::new("episode.mkv")).await });
    let err = result.unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(transcriber.call_count(), 0);
}
