/*!
 * Two-pass glossary extraction from sample chunks.
 *
 * Pass 1 extracts terms from every sample chunk under the configured
 * concurrency, each call retried by the retry layer. Pass 2 re-attempts only
 * the chunks that still failed, at half the concurrency (minimum 1). A chunk
 * that fails both passes contributes no terms and marks the result as
 * partially failed; extraction itself never fails the job.
 */

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{GlossaryItem, merge_unique};
use crate::errors::ProviderError;
use crate::pipeline::concurrency::map_in_order;
use crate::pipeline::progress::{DegradedNotice, DegradedScope, LogProgress, SharedProgress};
use crate::pipeline::prompts::{GLOSSARY_SYSTEM, PromptVars, glossary_user_message};
use crate::pipeline::response::{extract_json_array, extract_json_object, generate_with_continuation};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::segmentation::Chunk;
use crate::providers::{AudioBuffer, ContentPart, GenerateRequest, GenerativeModel, MediaService};

/// How sure the model was about a chunk's terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermConfidence {
    High,
    Low,
}

/// Terms extracted from one sample chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkGlossary {
    pub chunk_index: usize,
    pub terms: Vec<GlossaryItem>,
    pub confidence: TermConfidence,
    /// Set when the chunk failed both passes
    pub error: Option<String>,
}

/// Outcome of a full extraction run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlossaryExtractionResult {
    /// Per-chunk results in sample order
    pub chunks: Vec<ChunkGlossary>,
    /// Number of terms across all chunks, before merging
    pub total_terms: usize,
    /// Whether any chunk failed both passes
    pub has_failures: bool,
}

impl GlossaryExtractionResult {
    fn from_chunks(chunks: Vec<ChunkGlossary>) -> Self {
        let total_terms = chunks.iter().map(|c| c.terms.len()).sum();
        let has_failures = chunks.iter().any(|c| c.error.is_some());
        Self { chunks, total_terms, has_failures }
    }

    /// Merge with a user glossary; user terms win, then high-confidence chunks, then low.
    pub fn merged(&self, base: &[GlossaryItem]) -> Vec<GlossaryItem> {
        let by_confidence = |confidence: TermConfidence| {
            self.chunks
                .iter()
                .filter(move |c| c.confidence == confidence)
                .flat_map(|c| c.terms.iter())
        };
        merge_unique(
            base.iter()
                .chain(by_confidence(TermConfidence::High))
                .chain(by_confidence(TermConfidence::Low)),
        )
    }
}

/// Optional human or automated edit of the merged glossary before it is frozen
#[async_trait]
pub trait GlossaryReviewer: Send + Sync {
    async fn review(&self, merged: Vec<GlossaryItem>, result: &GlossaryExtractionResult) -> Vec<GlossaryItem>;
}

/// Decode a glossary reply: `{confidence, terms}` or a bare term array
pub fn parse_glossary_response(text: &str) -> Option<(TermConfidence, Vec<GlossaryItem>)> {
    let to_terms = |values: Vec<Value>| -> Vec<GlossaryItem> {
        values
            .into_iter()
            .filter_map(|v| serde_json::from_value::<GlossaryItem>(v).ok())
            .map(|item| GlossaryItem { term: item.term.trim().to_string(), translation: item.translation.trim().to_string(), ..item })
            .filter(|item| !item.term.is_empty() && !item.translation.is_empty())
            .collect()
    };

    if let Some(object) = extract_json_object(text) {
        if let Some(Value::Array(terms)) = object.get("terms") {
            let confidence = match object.get("confidence").and_then(Value::as_str) {
                Some(c) if c.eq_ignore_ascii_case("high") => TermConfidence::High,
                _ => TermConfidence::Low,
            };
            return Some((confidence, to_terms(terms.clone())));
        }
    }

    extract_json_array(text).map(|values| (TermConfidence::Low, to_terms(values)))
}

/// Evenly spaced sample of `sample_size` chunks (0 or oversize = all)
pub fn select_sample_chunks(chunks: &[Chunk], sample_size: usize) -> Vec<Chunk> {
    if sample_size == 0 || sample_size >= chunks.len() {
        return chunks.to_vec();
    }
    let step = chunks.len() as f64 / sample_size as f64;
    (0..sample_size)
        .map(|k| chunks[((k as f64 * step) as usize).min(chunks.len() - 1)])
        .collect()
}

/// Glossary extractor over a decoded audio buffer
#[derive(Clone)]
pub struct GlossaryExtractor {
    model: Arc<dyn GenerativeModel>,
    media: Arc<dyn MediaService>,
    model_name: String,
    prompt: PromptVars,
    concurrency: usize,
    retry: RetryPolicy,
    progress: SharedProgress,
}

impl GlossaryExtractor {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        media: Arc<dyn MediaService>,
        model_name: &str,
        prompt: PromptVars,
        concurrency: usize,
    ) -> Self {
        Self {
            model,
            media,
            model_name: model_name.to_string(),
            prompt,
            concurrency: concurrency.max(1),
            retry: RetryPolicy::default(),
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    async fn extract_chunk(&self, audio: &AudioBuffer, chunk: &Chunk) -> Result<ChunkGlossary, ProviderError> {
        let clip = self.media.slice_audio(audio, chunk.start, chunk.end).await?;
        let request = GenerateRequest::new(
            &self.model_name,
            self.prompt.render(GLOSSARY_SYSTEM),
            vec![
                ContentPart::InlineAudio(clip),
                ContentPart::Text(glossary_user_message(chunk.start, chunk.end)),
            ],
        );

        let parsed = generate_with_continuation(self.model.as_ref(), &request, &self.retry, parse_glossary_response)
            .await?
            .ok_or_else(|| ProviderError::ParseError(format!("unreadable glossary reply for chunk {}", chunk.index)))?;

        let (confidence, terms) = parsed;
        Ok(ChunkGlossary { chunk_index: chunk.index, terms, confidence, error: None })
    }

    async fn run_pass(
        &self,
        audio: &AudioBuffer,
        chunks: Vec<Chunk>,
        concurrency: usize,
    ) -> Vec<(Chunk, Result<ChunkGlossary, ProviderError>)> {
        map_in_order(chunks, concurrency, |chunk, _| async move {
            let result = self.extract_chunk(audio, &chunk).await;
            (chunk, result)
        })
        .await
    }

    /// Extract terms from the given sample chunks
    pub async fn extract(&self, audio: &AudioBuffer, samples: &[Chunk]) -> GlossaryExtractionResult {
        info!("Extracting glossary from {} sample chunks", samples.len());
        let first = self.run_pass(audio, samples.to_vec(), self.concurrency).await;

        let mut slots: Vec<Option<ChunkGlossary>> = Vec::with_capacity(first.len());
        let mut failed: Vec<(usize, Chunk)> = Vec::new();
        for (position, (chunk, result)) in first.into_iter().enumerate() {
            match result {
                Ok(glossary) => slots.push(Some(glossary)),
                Err(e) => {
                    warn!("Glossary pass 1 failed for chunk {}: {}", chunk.index, e);
                    failed.push((position, chunk));
                    slots.push(None);
                }
            }
        }

        if !failed.is_empty() {
            let retry_concurrency = (self.concurrency / 2).max(1);
            info!("Retrying glossary for {} chunks at concurrency {}", failed.len(), retry_concurrency);
            let chunks: Vec<Chunk> = failed.iter().map(|(_, c)| *c).collect();
            let second = self.run_pass(audio, chunks, retry_concurrency).await;

            for ((position, _), (chunk, result)) in failed.iter().zip(second) {
                slots[*position] = Some(match result {
                    Ok(glossary) => glossary,
                    Err(e) => {
                        self.progress.on_degraded(&DegradedNotice::new(
                            DegradedScope::GlossaryChunk,
                            format!("chunk {}", chunk.index),
                            e.to_string(),
                        ));
                        ChunkGlossary {
                            chunk_index: chunk.index,
                            terms: Vec::new(),
                            confidence: TermConfidence::Low,
                            error: Some(e.to_string()),
                        }
                    }
                });
            }
        }

        let result = GlossaryExtractionResult::from_chunks(slots.into_iter().flatten().collect());
        info!(
            "Glossary extraction found {} terms{}",
            result.total_terms,
            if result.has_failures { " (some chunks failed)" } else { "" }
        );
        result
    }

    /// Extract, merge with `base` and pass through the optional reviewer
    pub async fn build_glossary(
        &self,
        audio: &AudioBuffer,
        samples: &[Chunk],
        base: &[GlossaryItem],
        reviewer: Option<Arc<dyn GlossaryReviewer>>,
    ) -> Vec<GlossaryItem> {
        let result = self.extract(audio, samples).await;
        let merged = result.merged(base);
        match reviewer {
            Some(reviewer) => {
                let reviewed = reviewer.review(merged, &result).await;
                merge_unique(reviewed.iter())
            }
            None => merged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::progress::ProgressRecorder;
    use crate::providers::mock::{InMemoryMedia, ScriptedModel};
    use crate::providers::ContentPart;

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk { index: i, start: i as f64 * 10.0, end: (i + 1) as f64 * 10.0 })
            .collect()
    }

    fn clip_start(request: &GenerateRequest) -> f64 {
        request.turns[0]
            .parts
            .iter()
            .find_map(|p| match p {
                ContentPart::InlineAudio(clip) => Some(clip.start),
                ContentPart::Text(_) => None,
            })
            .unwrap_or(-1.0)
    }

    async fn buffer(seconds: f64) -> AudioBuffer {
        InMemoryMedia::new(seconds).decode_audio(std::path::Path::new("x")).await.unwrap()
    }

    #[test]
    fn test_parseGlossaryResponse_shouldReadBothShapes() {
        let (confidence, terms) =
            parse_glossary_response(r#"{"confidence": "high", "terms": [{"term": "Edo", "translation": "江户"}]}"#).unwrap();
        assert_eq!(confidence, TermConfidence::High);
        assert_eq!(terms, vec![GlossaryItem::new("Edo", "江户")]);

        let (confidence, terms) = parse_glossary_response(r#"```json
[{"term": "Edo", "translation": "江户", "notes": "city"}]
```"#)
        .unwrap();
        assert_eq!(confidence, TermConfidence::Low);
        assert_eq!(terms[0].notes.as_deref(), Some("city"));

        assert!(parse_glossary_response(r#"{"confidence": "high", "terms": [{"term": "E"#).is_none());
    }

    #[test]
    fn test_selectSampleChunks_shouldSpreadEvenly() {
        let all = chunks(10);
        let picked: Vec<usize> = select_sample_chunks(&all, 3).iter().map(|c| c.index).collect();
        assert_eq!(picked, vec![0, 3, 6]);
        assert_eq!(select_sample_chunks(&all, 0).len(), 10);
    }

    #[test]
    fn test_merged_shouldPreferBaseThenHighConfidence() {
        let result = GlossaryExtractionResult::from_chunks(vec![
            ChunkGlossary {
                chunk_index: 0,
                terms: vec![GlossaryItem::new("Edo", "江都"), GlossaryItem::new("Kyoto", "京都")],
                confidence: TermConfidence::Low,
                error: None,
            },
            ChunkGlossary {
                chunk_index: 1,
                terms: vec![GlossaryItem::new("edo", "江户"), GlossaryItem::new("Oda", "织田")],
                confidence: TermConfidence::High,
                error: None,
            },
        ]);
        let base = vec![GlossaryItem::new("Oda", "小田")];

        let merged = result.merged(&base);
        let pairs: Vec<(&str, &str)> = merged.iter().map(|g| (g.term.as_str(), g.translation.as_str())).collect();

        assert_eq!(pairs, vec![("Oda", "小田"), ("edo", "江户"), ("Kyoto", "京都")]);
        assert_eq!(result.total_terms, 4);
        assert!(!result.has_failures);
    }

    /// Fails every chunk once, then succeeds; tracks peak in-flight calls per pass
    #[derive(Debug, Default)]
    struct InFlightModel {
        state: parking_lot::Mutex<InFlightState>,
    }

    #[derive(Debug, Default)]
    struct InFlightState {
        attempts: std::collections::HashMap<i64, usize>,
        in_flight: usize,
        peak_first: usize,
        peak_retry: usize,
    }

    #[async_trait]
    impl GenerativeModel for InFlightModel {
        async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError> {
            let start = clip_start(&request) as i64;
            let attempt = {
                let mut state = self.state.lock();
                let attempt = {
                    let count = state.attempts.entry(start).or_insert(0);
                    *count += 1;
                    *count
                };
                state.in_flight += 1;
                let in_flight = state.in_flight;
                if attempt == 1 {
                    state.peak_first = state.peak_first.max(in_flight);
                } else {
                    state.peak_retry = state.peak_retry.max(in_flight);
                }
                attempt
            };
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.state.lock().in_flight -= 1;

            if attempt == 1 {
                return Err(ProviderError::ApiError { status_code: 503, message: "busy".into() });
            }
            Ok(format!(r#"{{"confidence": "low", "terms": [{{"term": "T{}", "translation": "X"}}]}}"#, start))
        }
    }

    #[tokio::test]
    async fn test_extract_secondPass_shouldRunAtHalfConcurrency() {
        let model = Arc::new(InFlightModel::default());
        let concurrency = 4;
        let extractor = GlossaryExtractor::new(
            model.clone(),
            Arc::new(InMemoryMedia::new(80.0)),
            "pro",
            PromptVars::new("en", "zh"),
            concurrency,
        )
        .with_retry_policy(RetryPolicy::immediate(1));

        let audio = buffer(80.0).await;
        let result = extractor.extract(&audio, &chunks(8)).await;

        assert!(!result.has_failures);
        assert_eq!(result.total_terms, 8);
        let state = model.state.lock();
        assert_eq!(state.peak_first, concurrency);
        assert!(state.peak_retry <= concurrency / 2, "retry pass peaked at {}", state.peak_retry);
        assert!(state.peak_retry >= 1);
    }

    #[tokio::test]
    async fn test_extract_shouldRetryFailedChunksInSecondPass() {
        let attempts = Arc::new(parking_lot::Mutex::new(std::collections::HashMap::<i64, usize>::new()));
        let seen = attempts.clone();
        let model = ScriptedModel::new(move |request, _| {
            let start = clip_start(request) as i64;
            let mut map = seen.lock();
            let count = map.entry(start).or_insert(0);
            *count += 1;
            // Chunk at 10s fails its whole first pass (one attempt), then succeeds
            if start == 10 && *count == 1 {
                return Err(ProviderError::ApiError { status_code: 503, message: "busy".into() });
            }
            // Chunk at 20s never succeeds
            if start == 20 {
                return Err(ProviderError::ApiError { status_code: 503, message: "busy".into() });
            }
            Ok(format!(r#"{{"confidence": "high", "terms": [{{"term": "T{}", "translation": "X"}}]}}"#, start))
        });
        let recorder = Arc::new(ProgressRecorder::new());
        let extractor = GlossaryExtractor::new(
            Arc::new(model),
            Arc::new(InMemoryMedia::new(30.0)),
            "pro",
            PromptVars::new("en", "zh"),
            4,
        )
        .with_retry_policy(RetryPolicy::immediate(1))
        .with_progress(recorder.clone());

        let audio = buffer(30.0).await;
        let result = extractor.extract(&audio, &chunks(3)).await;

        assert_eq!(result.chunks.len(), 3);
        assert_eq!(result.chunks[1].terms[0].term, "T10");
        assert!(result.chunks[2].error.is_some());
        assert!(result.has_failures);
        assert_eq!(result.total_terms, 2);
        assert_eq!(attempts.lock()[&0], 1);
        assert_eq!(attempts.lock()[&10], 2);
        assert_eq!(attempts.lock()[&20], 2);
        assert_eq!(recorder.notices().len(), 1);
    }

    struct DropTerm(&'static str);

    #[async_trait]
    impl GlossaryReviewer for DropTerm {
        async fn review(&self, merged: Vec<GlossaryItem>, _result: &GlossaryExtractionResult) -> Vec<GlossaryItem> {
            merged.into_iter().filter(|g| g.term != self.0).collect()
        }
    }

    #[tokio::test]
    async fn test_buildGlossary_shouldApplyReviewer() {
        let model = ScriptedModel::replying(
            r#"{"confidence": "high", "terms": [{"term": "Edo", "translation": "江户"}, {"term": "um", "translation": "嗯"}]}"#,
        );
        let extractor = GlossaryExtractor::new(
            Arc::new(model),
            Arc::new(InMemoryMedia::new(10.0)),
            "pro",
            PromptVars::new("ja", "zh"),
            2,
        )
        .with_retry_policy(RetryPolicy::immediate(1));

        let audio = buffer(10.0).await;
        let glossary = extractor.build_glossary(&audio, &chunks(1), &[], Some(Arc::new(DropTerm("um")))).await;

        assert_eq!(glossary, vec![GlossaryItem::new("Edo", "江户")]);
    }
}
