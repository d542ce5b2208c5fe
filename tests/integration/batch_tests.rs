/*!
 * Batch edit tests over a generated list
 */

use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

use subloom::batch::{BatchExecutor, BatchMode, BatchRequest, BatchSettings};
use subloom::pipeline::retry::RetryPolicy;
use subloom::providers::MediaService;
use subloom::providers::mock::{InMemoryMedia, ScriptedModel};

use crate::common::{init_test_logging, prompt_records, sample_lines, test_config};

fn settings(batch_size: usize) -> BatchSettings {
    let mut config = test_config();
    config.batch.batch_size = batch_size;
    BatchSettings::from_config(&config)
}

#[tokio::test]
async fn test_retranslate_selectedBatches_shouldOnlyTouchThoseLines() {
    init_test_logging();
    let model = Arc::new(ScriptedModel::new(|request, _| {
        let records: Vec<Value> = prompt_records(&request.prompt_text())
            .into_iter()
            .map(|mut r| {
                r["translated"] = json!(format!("nouveau {}", r["original"].as_str().unwrap_or("")));
                r
            })
            .collect();
        Ok(Value::Array(records).to_string())
    }));
    let executor = BatchExecutor::new(model.clone(), Arc::new(InMemoryMedia::new(200.0)), settings(2))
        .with_retry_policy(RetryPolicy::immediate(1));
    let lines = sample_lines(6, 100_000);

    let outcome = executor
        .execute(&lines, None, &BatchRequest::new(BatchMode::Retranslate, vec![0, 2]))
        .await
        .unwrap();

    let translated: Vec<&str> = outcome.subtitles.iter().map(|s| s.translated.as_str()).collect();
    assert_eq!(
        translated,
        vec!["nouveau line 1", "nouveau line 2", "ligne 3", "ligne 4", "nouveau line 5", "nouveau line 6"]
    );
    assert_eq!(outcome.edited_groups, vec![vec![0], vec![2]]);
    assert!(outcome.failed_groups.is_empty());
    assert!(outcome.subtitles.iter().zip(&lines).all(|(a, b)| a.start_ms == b.start_ms && a.end_ms == b.end_ms));
    assert!(model.requests().iter().all(|r| !r.has_audio()));
}

#[tokio::test]
async fn test_proofread_withMissedLine_shouldInsertAndResequence() {
    init_test_logging();
    let model = Arc::new(ScriptedModel::new(|request, _| {
        let mut records: Vec<Value> = prompt_records(&request.prompt_text())
            .into_iter()
            .map(|mut r| {
                r["translated"] = json!("relu");
                r
            })
            .collect();
        records.push(json!({"id": 0, "start": "00:00:07,200", "end": "00:00:07,900", "original": "missed", "translated": "manqué"}));
        Ok(Value::Array(records).to_string())
    }));
    let media = Arc::new(InMemoryMedia::new(200.0));
    let audio = media.decode_audio(Path::new("episode.mkv")).await.unwrap();
    let executor = BatchExecutor::new(model.clone(), media, settings(2)).with_retry_policy(RetryPolicy::immediate(1));
    let lines = sample_lines(6, 100_000);

    let outcome = executor
        .execute(&lines, Some(&audio), &BatchRequest::new(BatchMode::Proofread, vec![1]))
        .await
        .unwrap();

    let subtitles = &outcome.subtitles;
    assert_eq!(subtitles.len(), 7);
    assert_eq!(subtitles.iter().map(|s| s.id).collect::<Vec<_>>(), (1..=7).collect::<Vec<_>>());
    assert_eq!(subtitles[2].translated, "relu");
    assert_eq!(subtitles[2].start_ms, 106_000);
    assert_eq!(subtitles[3].original, "missed");
    assert_eq!(subtitles[3].start_ms, 108_200);
    assert_eq!(subtitles[4].start_ms, 109_000);
    assert_eq!(subtitles[5].translated, "ligne 5");
    assert!(model.requests()[0].has_audio());
}
