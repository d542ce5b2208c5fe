/*!
 * Quality-control runs over scripted collaborators
 */

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use subloom::pipeline::progress::CancellationFlag;
use subloom::pipeline::retry::RetryPolicy;
use subloom::providers::MediaService;
use subloom::providers::mock::{InMemoryMedia, ScriptedModel};
use subloom::quality::{HookDecision, IterationHook, PipelineContext, QcData, QcState, TerminationReason};
use subloom::QualityControlRunner;

use crate::common::{init_test_logging, prompt_records, sample_lines, test_config};

/// Review always finds a medium issue on line 1; fix echoes; validate resolves nothing
fn stubborn_model() -> ScriptedModel {
    ScriptedModel::new(|request, _| {
        let system = &request.system_instruction;
        let prompt = request.prompt_text();
        let reply = if system.contains("semantic consistency") {
            json!([])
        } else if system.contains("quality reviewer") {
            json!([{"segmentId": 1, "type": "style", "severity": "medium", "description": "awkward phrasing"}])
        } else if system.contains("fixing issues") {
            let subtitles = prompt.split_once("Subtitles (times").map(|(_, rest)| rest).unwrap_or("");
            Value::Array(prompt_records(subtitles))
        } else {
            json!({"resolved": [], "unresolved": [], "newIssues": []})
        };
        Ok(reply.to_string())
    })
}

struct CountingHook {
    decision: HookDecision,
    calls: AtomicUsize,
}

#[async_trait]
impl IterationHook<QcState, QcData> for CountingHook {
    async fn after_iteration(&self, output: &QcState, context: &PipelineContext<QcData>) -> HookDecision {
        assert_eq!(output.issues.len(), 1);
        assert!(!output.accepted);
        assert!(context.iteration < context.max_iterations);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}

async fn runner_parts() -> (Arc<InMemoryMedia>, subloom::providers::AudioBuffer) {
    let media = Arc::new(InMemoryMedia::new(200.0));
    let audio = media.decode_audio(Path::new("episode.mkv")).await.unwrap();
    (media, audio)
}

#[tokio::test]
async fn test_qc_withUnresolvedIssues_shouldStopAtMaxIterations() {
    init_test_logging();
    let (media, audio) = runner_parts().await;
    let mut config = test_config();
    config.quality.max_iterations = 3;
    let model = Arc::new(stubborn_model());
    let runner = QualityControlRunner::new(&config, model.clone(), media).with_retry_policy(RetryPolicy::immediate(1));

    let outcome = runner.run(&sample_lines(4, 100_000), 0..=3, Some(&audio)).await.unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.termination_reason, TerminationReason::MaxIterations);
    assert_eq!(outcome.result.iterations, 3);
    assert_eq!(outcome.result.history.len(), 9);
    assert_eq!(outcome.result.output.issue_log.len(), 3);
    let rounds: Vec<usize> = outcome.result.output.issue_log.iter().map(|i| i.round_identified).collect();
    assert_eq!(rounds, vec![1, 2, 3]);
    let report = outcome.result.output.validation.clone().unwrap();
    assert_eq!(report.unresolved.len(), 1);
    assert!(!report.accepted);
    assert_eq!(outcome.subtitles, sample_lines(4, 100_000));
}

#[tokio::test]
async fn test_qc_hookAccepts_shouldEndAsUserAccepted() {
    init_test_logging();
    let (media, audio) = runner_parts().await;
    let mut config = test_config();
    config.quality.max_iterations = 3;
    let hook = Arc::new(CountingHook { decision: HookDecision::Accept, calls: AtomicUsize::new(0) });
    let runner = QualityControlRunner::new(&config, Arc::new(stubborn_model()), media)
        .with_retry_policy(RetryPolicy::immediate(1))
        .with_hook(hook.clone());

    let outcome = runner.run(&sample_lines(4, 100_000), 1..=2, Some(&audio)).await.unwrap();

    assert!(outcome.result.success);
    assert_eq!(outcome.result.termination_reason, TerminationReason::UserAccepted);
    assert_eq!(outcome.result.iterations, 1);
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.subtitles.len(), 4);
}

#[tokio::test]
async fn test_qc_whenCancelled_shouldNotCallModel() {
    init_test_logging();
    let (media, audio) = runner_parts().await;
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let model = Arc::new(stubborn_model());
    let runner = QualityControlRunner::new(&test_config(), model.clone(), media).with_cancellation(cancel);

    let outcome = runner.run(&sample_lines(4, 100_000), 0..=3, Some(&audio)).await.unwrap();

    assert_eq!(outcome.result.termination_reason, TerminationReason::UserCancelled);
    assert_eq!(model.call_count(), 0);
    assert_eq!(outcome.subtitles, sample_lines(4, 100_000));
}
