/*!
 * Generation orchestrator: media file in, ordered bilingual subtitles out.
 *
 * The audio track is decoded once and shared by every chunk worker. Glossary
 * extraction starts in the background and is consumed through a
 * `GlossaryState`; workers only block on it after transcription. Chunk
 * results are flattened in chunk order and renumbered 1..N. A fatal chunk
 * failure aborts the job.
 */

use log::{error, info};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::app_config::Config;
use crate::errors::PipelineError;
use crate::glossary::{GlossaryExtractor, GlossaryReviewer, GlossaryState};
use crate::glossary::extraction::select_sample_chunks;
use crate::pipeline::chunk_worker::{ChunkContext, ChunkSettings};
use crate::pipeline::concurrency::{ModelTier, try_map_in_order};
use crate::pipeline::progress::{CancellationFlag, LogProgress, SharedProgress};
use crate::pipeline::prompts::PromptVars;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::segmentation::{Chunk, plan_chunks};
use crate::providers::{AudioBuffer, GenerativeModel, MediaService, Transcriber};
use crate::subtitle::{SubtitleItem, flatten_and_resequence};

/// Drives a full generation job
pub struct GenerationOrchestrator {
    config: Config,
    transcriber: Arc<dyn Transcriber>,
    model: Arc<dyn GenerativeModel>,
    media: Arc<dyn MediaService>,
    progress: SharedProgress,
    cancel: CancellationFlag,
    reviewer: Option<Arc<dyn GlossaryReviewer>>,
    retry: RetryPolicy,
}

impl GenerationOrchestrator {
    pub fn new(
        config: Config,
        transcriber: Arc<dyn Transcriber>,
        model: Arc<dyn GenerativeModel>,
        media: Arc<dyn MediaService>,
    ) -> Self {
        let retry = config.retry.policy();
        Self {
            config,
            transcriber,
            model,
            media,
            progress: Arc::new(LogProgress),
            cancel: CancellationFlag::new(),
            reviewer: None,
            retry,
        }
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Let a reviewer edit the extracted glossary before workers use it
    pub fn with_glossary_reviewer(mut self, reviewer: Arc<dyn GlossaryReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn prompt_vars(&self) -> PromptVars {
        PromptVars::new(&self.config.source_language, &self.config.target_language)
            .with_genre(self.config.generation.genre.as_deref())
    }

    fn start_glossary(&self, audio: &AudioBuffer, chunks: &[Chunk]) -> GlossaryState {
        let generation = &self.config.generation;
        if !generation.enable_glossary {
            return GlossaryState::resolved(generation.glossary.clone());
        }

        let limits = generation.tier_limits();
        let extractor = GlossaryExtractor::new(
            self.model.clone(),
            self.media.clone(),
            &self.config.models.pro_model,
            self.prompt_vars(),
            limits.for_tier(ModelTier::HighQuality),
        )
        .with_retry_policy(self.retry)
        .with_progress(self.progress.clone());

        let samples = select_sample_chunks(chunks, generation.glossary_sample_size);
        let base = generation.glossary.clone();
        let reviewer = self.reviewer.clone();
        let audio = audio.clone();
        GlossaryState::spawn(async move { Ok(extractor.build_glossary(&audio, &samples, &base, reviewer).await) })
    }

    fn chunk_context(&self, audio: AudioBuffer, glossary: GlossaryState, total_chunks: usize) -> ChunkContext {
        let generation = &self.config.generation;
        ChunkContext {
            transcriber: self.transcriber.clone(),
            model: self.model.clone(),
            media: self.media.clone(),
            audio,
            glossary,
            settings: ChunkSettings {
                transcription_model: self.config.models.transcription_model.clone(),
                refine_model: self.config.models.fast_model.clone(),
                translate_model: self.config.models.fast_model.clone(),
                prompt: self.prompt_vars(),
                refinement_instructions: generation.custom_refinement_prompt.clone(),
                translation_instructions: generation.custom_translation_prompt.clone(),
                translation_batch_size: generation.translation_batch_size,
                translation_concurrency: generation.effective_translation_concurrency(),
                retry: self.retry,
            },
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
            total_chunks,
        }
    }

    /// Generate subtitles for a media file
    pub async fn generate(&self, media_path: &Path) -> Result<Vec<SubtitleItem>, PipelineError> {
        self.generate_with_updates(media_path, |_| {}).await
    }

    /// Generate subtitles, calling `on_update` with the flattened partial result after each chunk
    pub async fn generate_with_updates<F>(&self, media_path: &Path, on_update: F) -> Result<Vec<SubtitleItem>, PipelineError>
    where
        F: Fn(&[SubtitleItem]),
    {
        let started = Instant::now();
        self.cancel.check()?;

        let audio = self.media.decode_audio(media_path).await?;
        let chunks = plan_chunks(
            &audio,
            self.config.generation.chunk_duration_secs,
            self.config.generation.smart_split,
        );
        if chunks.is_empty() {
            return Err(PipelineError::InvalidInput(format!("{} has no audio", media_path.display())));
        }
        info!(
            "Processing {:.1}s of audio in {} chunks",
            audio.duration(),
            chunks.len()
        );

        let glossary = self.start_glossary(&audio, &chunks);
        let context = self.chunk_context(audio, glossary, chunks.len());
        let concurrency = self.config.generation.tier_limits().for_tier(ModelTier::Fast);

        let completed: Mutex<Vec<Option<Vec<SubtitleItem>>>> = Mutex::new(vec![None; chunks.len()]);
        let context = &context;
        let completed_ref = &completed;
        let on_update = &on_update;

        let results = try_map_in_order(chunks, concurrency, |chunk, index| async move {
            let items = context.process(chunk).await.inspect_err(|e| error!("Aborting job: {}", e))?;
            let snapshot = {
                let mut slots = completed_ref.lock();
                slots[index] = Some(items.clone());
                flatten_and_resequence(slots.iter().flatten().cloned())
            };
            on_update(&snapshot);
            Ok::<_, PipelineError>(items)
        })
        .await?;

        let subtitles = flatten_and_resequence(results);
        info!(
            "Generated {} subtitles in {:.1}s",
            subtitles.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(subtitles)
    }
}
