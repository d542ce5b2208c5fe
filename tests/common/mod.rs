/*!
 * Common test utilities for the subloom test suite
 */

#![allow(dead_code)]

use anyhow::Result;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use subloom::Config;
use subloom::providers::mock::ScriptedModel;
use subloom::subtitle::SubtitleItem;

/// Route library logs through the test harness; repeated calls are no-ops
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// English to French config with fixed 300s chunks and no glossary
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.source_language = "en".into();
    config.target_language = "fr".into();
    config.generation.smart_split = false;
    config.generation.chunk_duration_secs = 300.0;
    config.generation.enable_glossary = false;
    config
}

/// `count` lines of 2s every 3s starting at `start_ms`
pub fn sample_lines(count: usize, start_ms: u64) -> Vec<SubtitleItem> {
    (0..count)
        .map(|i| {
            let start = start_ms + i as u64 * 3_000;
            SubtitleItem::new(i + 1, start, start + 2_000, format!("line {}", i + 1), format!("ligne {}", i + 1))
        })
        .collect()
}

/// First JSON array in a prompt
pub fn prompt_records(prompt: &str) -> Vec<Value> {
    let payload = prompt.find('[').map(|i| &prompt[i..]).unwrap_or("[]");
    serde_json::from_str(payload).unwrap_or_default()
}

/// Model for generation runs: refinement echoes the transcript, translation
/// prefixes each original with `FR `
pub fn generation_model() -> ScriptedModel {
    ScriptedModel::new(|request, _| {
        let records = prompt_records(&request.prompt_text());
        if request.system_instruction.contains("professional subtitle editor") {
            return Ok(Value::Array(records).to_string());
        }
        let translated: Vec<Value> = records
            .iter()
            .map(|r| json!({"id": r["id"], "translated": format!("FR {}", r["original"].as_str().unwrap_or(""))}))
            .collect();
        Ok(Value::Array(translated).to_string())
    })
}
