/*!
 * Per-chunk pipeline: transcribe, wait for the glossary, refine, translate.
 *
 * Stages run strictly in sequence for one chunk while different chunks run
 * in parallel. Degradable failures fall back locally:
 * - refinement keeps the raw transcript
 * - a translation sub-batch that fails all attempts echoes its source text
 *
 * Transcription failures, permanent provider errors and cancellation are
 * fatal for the chunk, and the orchestrator aborts the job on them.
 */

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{ErrorClass, PipelineError, ProviderError};
use crate::glossary::{GlossaryItem, GlossaryState};
use crate::pipeline::concurrency::map_in_order;
use crate::pipeline::postprocess::{enforce_segment_limits, strip_fillers};
use crate::pipeline::progress::{
    CancellationFlag, ChunkStage, ChunkStatus, DegradedNotice, DegradedScope, SharedProgress,
};
use crate::pipeline::prompts::{
    PromptVars, REFINE_SYSTEM, TRANSLATE_SYSTEM, refine_user_message, subtitle_array_schema, translate_user_message,
};
use crate::pipeline::response::{generate_json_array, parse_subtitle_records};
use crate::pipeline::retry::{RetryPolicy, with_retry};
use crate::pipeline::segmentation::Chunk;
use crate::providers::{AudioBuffer, AudioClip, ContentPart, GenerateRequest, GenerativeModel, MediaService, Transcriber};
use crate::subtitle::{SubtitleItem, resequence};
use crate::timestamp_utils::{TimestampNormalizer, seconds_to_ms};

/// Attempts per translation sub-batch before echoing source text
pub const TRANSLATION_BATCH_ATTEMPTS: usize = 3;

/// Settings shared by all chunk workers of a job
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub transcription_model: String,
    pub refine_model: String,
    pub translate_model: String,
    /// Prompt variables without the glossary
    pub prompt: PromptVars,
    pub refinement_instructions: Option<String>,
    pub translation_instructions: Option<String>,
    pub translation_batch_size: usize,
    pub translation_concurrency: usize,
    pub retry: RetryPolicy,
}

/// Collaborators and shared state for chunk workers
#[derive(Clone)]
pub struct ChunkContext {
    pub transcriber: Arc<dyn Transcriber>,
    pub model: Arc<dyn GenerativeModel>,
    pub media: Arc<dyn MediaService>,
    pub audio: AudioBuffer,
    pub glossary: GlossaryState,
    pub settings: ChunkSettings,
    pub progress: SharedProgress,
    pub cancel: CancellationFlag,
    pub total_chunks: usize,
}

fn fatal(chunk: &Chunk, stage: ChunkStage, message: impl ToString) -> PipelineError {
    PipelineError::ChunkFailed { index: chunk.index, stage: stage.to_string(), message: message.to_string() }
}

impl ChunkContext {
    fn report(&self, chunk: &Chunk, stage: ChunkStage, message: impl Into<String>) {
        self.progress.on_status(&ChunkStatus::new(chunk.index, self.total_chunks, stage, message));
    }

    fn degraded(&self, scope: DegradedScope, unit: String, message: impl Into<String>) {
        let notice = DegradedNotice::new(scope, unit, message);
        warn!("{}: {}", notice.unit, notice.message);
        self.progress.on_degraded(&notice);
    }

    fn checkpoint(&self, chunk: &Chunk) -> Result<(), PipelineError> {
        self.cancel.check().inspect(|_| debug!("Chunk {} passed checkpoint", chunk.index))
    }

    async fn transcribe(&self, chunk: &Chunk, clip: &AudioClip) -> Result<Vec<SubtitleItem>, PipelineError> {
        let segments = with_retry(&self.settings.retry, "transcribe", || {
            self.transcriber.transcribe(clip, &self.settings.transcription_model)
        })
        .await
        .map_err(|e| fatal(chunk, ChunkStage::Transcribing, e))?;

        let mut items: Vec<SubtitleItem> = segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| SubtitleItem::new(0, seconds_to_ms(s.start), seconds_to_ms(s.end), s.text.trim(), ""))
            .collect();
        resequence(&mut items);
        Ok(items)
    }

    async fn refine(
        &self,
        chunk: &Chunk,
        clip: &AudioClip,
        raw: &[SubtitleItem],
        glossary: &[GlossaryItem],
    ) -> Result<Vec<SubtitleItem>, PipelineError> {
        let system = self
            .settings
            .prompt
            .clone()
            .with_glossary(glossary)
            .with_custom_instructions(self.settings.refinement_instructions.as_deref())
            .render(REFINE_SYSTEM);
        let request = GenerateRequest::new(
            &self.settings.refine_model,
            system,
            vec![ContentPart::InlineAudio(clip.clone()), ContentPart::Text(refine_user_message(raw))],
        )
        .with_schema(subtitle_array_schema());

        let normalizer = TimestampNormalizer::with_media_duration(chunk.duration());
        let refined = match generate_json_array(self.model.as_ref(), &request, &self.settings.retry).await {
            Ok(values) => parse_subtitle_records(values, &normalizer),
            Err(e) if e.class() == ErrorClass::Permanent => return Err(fatal(chunk, ChunkStage::Refining, e)),
            Err(e) => {
                self.degraded(DegradedScope::Refinement, format!("chunk {}", chunk.index), format!("refinement failed, keeping raw transcript: {}", e));
                return Ok(raw.to_vec());
            }
        };

        if refined.is_empty() {
            self.degraded(
                DegradedScope::Refinement,
                format!("chunk {}", chunk.index),
                "refinement returned no lines, keeping raw transcript",
            );
            return Ok(raw.to_vec());
        }

        let cleaned: Vec<SubtitleItem> = refined
            .into_iter()
            .map(|item| SubtitleItem { translated: String::new(), ..item })
            .collect();
        let cleaned = enforce_segment_limits(strip_fillers(cleaned));
        debug!("Chunk {}: {} raw -> {} refined segments", chunk.index, raw.len(), cleaned.len());
        Ok(cleaned)
    }

    /// One translation attempt; `Ok(None)` when nothing usable came back
    async fn translate_once(
        &self,
        batch: &[SubtitleItem],
        system: &str,
    ) -> Result<Option<HashMap<usize, String>>, ProviderError> {
        let request = GenerateRequest::new(
            &self.settings.translate_model,
            system,
            vec![ContentPart::Text(translate_user_message(batch))],
        );
        let values = generate_json_array(self.model.as_ref(), &request, &self.settings.retry).await?;
        let translations: HashMap<usize, String> = parse_subtitle_records(values, &TimestampNormalizer::new())
            .into_iter()
            .filter(|item| item.id > 0 && !item.translated.is_empty())
            .map(|item| (item.id, item.translated))
            .collect();
        let matched = batch.iter().filter(|b| translations.contains_key(&b.id)).count();
        Ok((matched > 0).then_some(translations))
    }

    async fn translate_batch(
        &self,
        chunk: &Chunk,
        batch_index: usize,
        batch: Vec<SubtitleItem>,
        system: &str,
    ) -> Result<Vec<SubtitleItem>, PipelineError> {
        let mut last_error = String::from("no usable translations");
        for attempt in 1..=TRANSLATION_BATCH_ATTEMPTS {
            match self.translate_once(&batch, system).await {
                Ok(Some(translations)) => {
                    return Ok(batch
                        .into_iter()
                        .map(|item| {
                            let translated =
                                translations.get(&item.id).cloned().unwrap_or_else(|| item.original.clone());
                            SubtitleItem { translated, ..item }
                        })
                        .collect());
                }
                Ok(None) => {}
                Err(e) if e.class() == ErrorClass::Permanent => {
                    return Err(fatal(chunk, ChunkStage::Translating, e));
                }
                Err(e) => last_error = e.to_string(),
            }
            debug!(
                "Chunk {} batch {}: translation attempt {}/{} failed",
                chunk.index, batch_index, attempt, TRANSLATION_BATCH_ATTEMPTS
            );
        }

        self.degraded(
            DegradedScope::TranslationBatch,
            format!("chunk {} batch {}", chunk.index, batch_index),
            format!("translation failed, echoing source text: {}", last_error),
        );
        Ok(batch
            .into_iter()
            .map(|item| SubtitleItem { translated: item.original.clone(), ..item })
            .collect())
    }

    async fn translate(
        &self,
        chunk: &Chunk,
        items: Vec<SubtitleItem>,
        glossary: &[GlossaryItem],
    ) -> Result<Vec<SubtitleItem>, PipelineError> {
        let system = self
            .settings
            .prompt
            .clone()
            .with_glossary(glossary)
            .with_custom_instructions(self.settings.translation_instructions.as_deref())
            .render(TRANSLATE_SYSTEM);
        let batches: Vec<Vec<SubtitleItem>> = items
            .chunks(self.settings.translation_batch_size.max(1))
            .map(<[SubtitleItem]>::to_vec)
            .collect();

        let system = system.as_str();
        let translated = map_in_order(batches, self.settings.translation_concurrency, |batch, batch_index| async move {
            self.translate_batch(chunk, batch_index, batch, system).await
        })
        .await;

        Ok(translated.into_iter().collect::<Result<Vec<_>, _>>()?.into_iter().flatten().collect())
    }

    /// Run one chunk to completion; times in the result are absolute.
    pub async fn process(&self, chunk: Chunk) -> Result<Vec<SubtitleItem>, PipelineError> {
        let result = self.run_stages(&chunk).await;
        if let Err(e) = &result {
            self.report(&chunk, ChunkStage::Error, e.to_string());
        }
        result
    }

    async fn run_stages(&self, chunk: &Chunk) -> Result<Vec<SubtitleItem>, PipelineError> {
        self.checkpoint(chunk)?;
        self.report(chunk, ChunkStage::Transcribing, format!("{:.1}s - {:.1}s", chunk.start, chunk.end));
        let clip = self
            .media
            .slice_audio(&self.audio, chunk.start, chunk.end)
            .await
            .map_err(|e| fatal(chunk, ChunkStage::Transcribing, e))?;
        let raw = self.transcribe(chunk, &clip).await?;
        if raw.is_empty() {
            info!("Chunk {}: no speech detected", chunk.index);
            self.report(chunk, ChunkStage::Done, "no speech");
            return Ok(Vec::new());
        }

        self.report(chunk, ChunkStage::WaitingGlossary, "waiting for glossary");
        let glossary = self.glossary.get().await;

        self.checkpoint(chunk)?;
        self.report(chunk, ChunkStage::Refining, format!("{} segments", raw.len()));
        let refined = self.refine(chunk, &clip, &raw, &glossary).await?;

        self.checkpoint(chunk)?;
        self.report(chunk, ChunkStage::Translating, format!("{} segments", refined.len()));
        let mut translated = self.translate(chunk, refined, &glossary).await?;

        let offset_ms = chunk.start_ms();
        for item in translated.iter_mut() {
            item.shift(offset_ms);
            item.sanitize();
        }

        self.report(chunk, ChunkStage::Done, format!("{} subtitles", translated.len()));
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::progress::ProgressRecorder;
    use crate::providers::mock::{InMemoryMedia, MockTranscriber, ScriptedModel};
    use serde_json::{Value, json};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> ChunkSettings {
        ChunkSettings {
            transcription_model: "whisper".into(),
            refine_model: "fast".into(),
            translate_model: "fast".into(),
            prompt: PromptVars::new("en", "fr"),
            refinement_instructions: None,
            translation_instructions: None,
            translation_batch_size: 2,
            translation_concurrency: 2,
            retry: RetryPolicy::immediate(1),
        }
    }

    /// Refine echoes the raw transcript; translate upper-cases the originals
    fn echo_model() -> ScriptedModel {
        ScriptedModel::new(|request, _| Ok(echo_reply(request)))
    }

    fn echo_reply(request: &GenerateRequest) -> String {
        let prompt = request.prompt_text();
        let payload = prompt.find('[').map(|i| &prompt[i..]).unwrap_or("[]");
        let records: Vec<Value> = serde_json::from_str(payload).unwrap_or_default();
        if request.system_instruction.contains("subtitle editor") {
            return serde_json::to_string(&records).unwrap();
        }
        let out: Vec<Value> = records
            .iter()
            .map(|r| json!({"id": r["id"], "translated": r["original"].as_str().unwrap_or("").to_uppercase()}))
            .collect();
        serde_json::to_string(&out).unwrap()
    }

    /// Refine echoes; translation answers with unknown ids for the first
    /// `misses` attempts, then upper-cases the originals. Counts translate requests.
    fn flaky_translator(misses: usize, translate_calls: Arc<AtomicUsize>) -> ScriptedModel {
        ScriptedModel::new(move |request, _| {
            if !request.system_instruction.contains("subtitle editor")
                && translate_calls.fetch_add(1, Ordering::SeqCst) < misses
            {
                return Ok(json!([{"id": 99, "translated": "wrong line"}]).to_string());
            }
            Ok(echo_reply(request))
        })
    }

    async fn context(model: ScriptedModel, transcriber: MockTranscriber, recorder: Arc<ProgressRecorder>) -> ChunkContext {
        let media = InMemoryMedia::new(120.0);
        let audio = media.decode_audio(Path::new("in.wav")).await.unwrap();
        ChunkContext {
            transcriber: Arc::new(transcriber),
            model: Arc::new(model),
            media: Arc::new(media),
            audio,
            glossary: GlossaryState::empty(),
            settings: settings(),
            progress: recorder,
            cancel: CancellationFlag::new(),
            total_chunks: 2,
        }
    }

    #[tokio::test]
    async fn test_process_shouldProduceAbsoluteTranslatedLines() {
        let recorder = Arc::new(ProgressRecorder::new());
        let ctx = context(echo_model(), MockTranscriber::evenly_spaced(3), recorder.clone()).await;
        let chunk = Chunk { index: 1, start: 60.0, end: 70.0 };

        let items = ctx.process(chunk).await.unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].start_ms, 60_000);
        assert_eq!(items[0].translated, "CLIP 60 LINE 0");
        assert!(items.iter().all(|i| i.start_ms >= 60_000 && i.end_ms <= 70_000));
        assert_eq!(
            recorder.stages_for(1),
            vec![
                ChunkStage::Transcribing,
                ChunkStage::WaitingGlossary,
                ChunkStage::Refining,
                ChunkStage::Translating,
                ChunkStage::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_process_withEmptyTranscript_shouldFinishEarly() {
        let recorder = Arc::new(ProgressRecorder::new());
        let model = ScriptedModel::replying("[]");
        let ctx = context(model, MockTranscriber::new(|_| Ok(Vec::new())), recorder.clone()).await;

        let items = ctx.process(Chunk { index: 0, start: 0.0, end: 30.0 }).await.unwrap();

        assert!(items.is_empty());
        assert_eq!(recorder.stages_for(0), vec![ChunkStage::Transcribing, ChunkStage::Done]);
    }

    #[tokio::test]
    async fn test_process_withFailingModel_shouldFallBackAndEchoSource() {
        let recorder = Arc::new(ProgressRecorder::new());
        let model = ScriptedModel::failing(ProviderError::ApiError { status_code: 503, message: "busy".into() });
        let ctx = context(model, MockTranscriber::evenly_spaced(2), recorder.clone()).await;

        let items = ctx.process(Chunk { index: 0, start: 0.0, end: 30.0 }).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].translated, items[0].original);
        let scopes: Vec<DegradedScope> = recorder.notices().iter().map(|n| n.scope).collect();
        assert_eq!(scopes, vec![DegradedScope::Refinement, DegradedScope::TranslationBatch]);
    }

    #[tokio::test]
    async fn test_process_withMismatchedTranslation_shouldRetryWholeBatch() {
        let recorder = Arc::new(ProgressRecorder::new());
        let translate_calls = Arc::new(AtomicUsize::new(0));
        let model = flaky_translator(1, translate_calls.clone());
        let ctx = context(model, MockTranscriber::evenly_spaced(2), recorder.clone()).await;

        let items = ctx.process(Chunk { index: 0, start: 0.0, end: 6.0 }).await.unwrap();

        assert_eq!(translate_calls.load(Ordering::SeqCst), 2);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].translated, "CLIP 0 LINE 0");
        assert_eq!(items[1].translated, "CLIP 0 LINE 1");
        assert!(recorder.notices().is_empty());
    }

    #[tokio::test]
    async fn test_process_withTranslationNeverMatching_shouldStopAfterAttemptBudget() {
        let recorder = Arc::new(ProgressRecorder::new());
        let translate_calls = Arc::new(AtomicUsize::new(0));
        let model = flaky_translator(usize::MAX, translate_calls.clone());
        let ctx = context(model, MockTranscriber::evenly_spaced(2), recorder.clone()).await;

        let items = ctx.process(Chunk { index: 0, start: 0.0, end: 6.0 }).await.unwrap();

        assert_eq!(translate_calls.load(Ordering::SeqCst), TRANSLATION_BATCH_ATTEMPTS);
        assert!(items.iter().all(|i| i.translated == i.original));
        let scopes: Vec<DegradedScope> = recorder.notices().iter().map(|n| n.scope).collect();
        assert_eq!(scopes, vec![DegradedScope::TranslationBatch]);
    }

    #[tokio::test]
    async fn test_process_withTranscriptionFailure_shouldBeFatal() {
        let recorder = Arc::new(ProgressRecorder::new());
        let transcriber = MockTranscriber::new(|_| Err(ProviderError::ConnectionError("reset".into())));
        let ctx = context(echo_model(), transcriber, recorder.clone()).await;

        let err = ctx.process(Chunk { index: 1, start: 30.0, end: 60.0 }).await.unwrap_err();

        assert!(matches!(err, PipelineError::ChunkFailed { index: 1, .. }));
        assert_eq!(recorder.stages_for(1).last(), Some(&ChunkStage::Error));
    }

    #[tokio::test]
    async fn test_process_withPermanentTranslationError_shouldBeFatal() {
        let recorder = Arc::new(ProgressRecorder::new());
        let model = ScriptedModel::new(|request, _| {
            if request.system_instruction.contains("subtitle editor") {
                Ok("[]".into())
            } else {
                Err(ProviderError::AuthenticationError("bad key".into()))
            }
        });
        let ctx = context(model, MockTranscriber::evenly_spaced(2), recorder).await;

        let err = ctx.process(Chunk { index: 0, start: 0.0, end: 30.0 }).await.unwrap_err();

        assert!(matches!(err, PipelineError::ChunkFailed { ref stage, .. } if stage == "translating"));
    }

    #[tokio::test]
    async fn test_process_whenCancelled_shouldStop() {
        let recorder = Arc::new(ProgressRecorder::new());
        let ctx = context(echo_model(), MockTranscriber::evenly_spaced(2), recorder).await;
        ctx.cancel.cancel();

        let err = ctx.process(Chunk { index: 0, start: 0.0, end: 30.0 }).await.unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
    }
}
