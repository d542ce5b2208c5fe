/*!
 * Quality-control runner: Review -> Fix -> Validate over a range of lines.
 *
 * The selected range is copied into a working list numbered 1..K, reviewed
 * against a padded audio window, and spliced back into the full list when the
 * run ends, whatever the termination reason.
 */

use log::{info, warn};
use std::ops::RangeInclusive;
use std::sync::Arc;

use super::engine::{
    IterationHook, PipelineConfig, PipelineContext, PipelineResult, PipelineStage, TerminationReason, execute_pipeline,
};
use super::fix::FixStage;
use super::issues::{QcData, QcState};
use super::review::ReviewStage;
use super::validate::ValidateStage;
use crate::app_config::{Config, QualityControlConfig};
use crate::errors::PipelineError;
use crate::glossary::GlossaryItem;
use crate::language_utils::language_codes_match;
use crate::pipeline::progress::{CancellationFlag, LogProgress, SharedProgress};
use crate::pipeline::prompts::PromptVars;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::window::AudioWindow;
use crate::providers::{AudioBuffer, GenerativeModel, MediaService};
use crate::subtitle::{SubtitleItem, resequence, splice_range};
use crate::timestamp_utils::ms_to_seconds;

/// Hook type accepted by the runner
pub type QcHook = Arc<dyn IterationHook<QcState, QcData>>;

/// Result of a quality-control run
#[derive(Debug, Clone)]
pub struct QcOutcome {
    /// Full list with the reviewed range replaced, ids 1..N
    pub subtitles: Vec<SubtitleItem>,
    /// Engine result carrying the final working state
    pub result: PipelineResult<QcState>,
}

impl QcOutcome {
    /// Turn an aborted run into an error
    pub fn into_result(self) -> Result<Self, PipelineError> {
        match (self.result.termination_reason, &self.result.error) {
            (TerminationReason::Error, Some(message)) => {
                let (stage, message) = message.split_once(": ").unwrap_or(("unknown", message.as_str()));
                Err(PipelineError::StageFailed { stage: stage.to_string(), message: message.to_string() })
            }
            _ => Ok(self),
        }
    }
}

/// Runs quality-control rounds on subtitle ranges
pub struct QualityControlRunner {
    config: QualityControlConfig,
    model: Arc<dyn GenerativeModel>,
    media: Arc<dyn MediaService>,
    prompt: PromptVars,
    glossary: Vec<GlossaryItem>,
    expects_translation: bool,
    retry: RetryPolicy,
    progress: SharedProgress,
    cancel: CancellationFlag,
    hook: Option<QcHook>,
}

impl QualityControlRunner {
    pub fn new(config: &Config, model: Arc<dyn GenerativeModel>, media: Arc<dyn MediaService>) -> Self {
        let source = config.source_language.trim();
        let expects_translation =
            source.eq_ignore_ascii_case("auto") || !language_codes_match(source, &config.target_language);
        Self {
            config: config.quality_control(),
            model,
            media,
            prompt: PromptVars::new(&config.source_language, &config.target_language)
                .with_genre(config.generation.genre.as_deref()),
            glossary: config.generation.glossary.clone(),
            expects_translation,
            retry: config.retry.policy(),
            progress: Arc::new(LogProgress),
            cancel: CancellationFlag::new(),
            hook: None,
        }
    }

    /// Glossary enforced by review and fix (replaces the configured one)
    pub fn with_glossary(mut self, glossary: Vec<GlossaryItem>) -> Self {
        self.glossary = glossary;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ask `hook` between rounds whether to continue
    pub fn with_hook(mut self, hook: QcHook) -> Self {
        self.hook = Some(hook);
        self
    }

    fn pipeline_config(&self) -> PipelineConfig<QcState, QcData> {
        let stages: Vec<Arc<dyn PipelineStage<QcState, QcData>>> = vec![
            Arc::new(ReviewStage {
                model: self.model.clone(),
                model_name: self.config.review_model.clone(),
                prompt: self.prompt.clone(),
                semantic_consistency: self.config.semantic_consistency,
                retry: self.retry,
                progress: self.progress.clone(),
            }),
            Arc::new(FixStage {
                model: self.model.clone(),
                model_name: self.config.fix_model.clone(),
                prompt: self.prompt.clone(),
                retry: self.retry,
            }),
            Arc::new(ValidateStage {
                model: self.model.clone(),
                model_name: self.config.validate_model.clone(),
                prompt: self.prompt.clone(),
                criteria: self.config.acceptance,
                retry: self.retry,
            }),
        ];
        let should_continue = Box::new(|state: &QcState, _: &PipelineContext<QcData>| !state.accepted);
        let config =
            PipelineConfig::new(stages, self.config.max_iterations, should_continue).with_cancellation(self.cancel.clone());
        match &self.hook {
            Some(hook) => config.with_hook(hook.clone()),
            None => config,
        }
    }

    /// Run quality control on `subtitles[range]`.
    ///
    /// `audio` is the decoded source track; without it the stages work on text only.
    pub async fn run(
        &self,
        subtitles: &[SubtitleItem],
        range: RangeInclusive<usize>,
        audio: Option<&AudioBuffer>,
    ) -> Result<QcOutcome, PipelineError> {
        let (start, end) = (*range.start(), *range.end());
        if start > end || end >= subtitles.len() {
            return Err(PipelineError::InvalidInput(format!(
                "range {}..={} is outside {} subtitles",
                start,
                end,
                subtitles.len()
            )));
        }

        let mut working = subtitles[start..=end].to_vec();
        resequence(&mut working);

        let (window, clip) = match audio {
            Some(audio) => match AudioWindow::around(&working, self.config.context_padding_secs, audio.duration()) {
                Some(window) => {
                    let clip = self.media.slice_audio(audio, window.start, window.end).await?;
                    (Some(window), Some(clip))
                }
                None => {
                    warn!("Lines {}..={} lie outside the audio; reviewing text only", start + 1, end + 1);
                    (None, None)
                }
            },
            None => (None, None),
        };

        let first_ms = working.iter().map(|item| item.start_ms).min().unwrap_or(0);
        let last_ms = working.iter().map(|item| item.end_ms).max().unwrap_or(0);
        let data = QcData {
            glossary: self.glossary.clone(),
            window,
            duration_minutes: ms_to_seconds(last_ms.saturating_sub(first_ms)) / 60.0,
            expects_translation: self.expects_translation,
        };

        info!(
            "Quality control on lines {}..={} ({} lines, up to {} rounds)",
            start + 1,
            end + 1,
            working.len(),
            self.config.max_iterations
        );
        let result = execute_pipeline(&self.pipeline_config(), QcState::new(working), data, clip).await;

        let merged = splice_range(subtitles, start, end, result.output.subtitles.clone());
        Ok(QcOutcome { subtitles: merged, result })
    }
}
