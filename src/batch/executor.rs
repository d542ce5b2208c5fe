/*!
 * Post-hoc batch edits over an existing subtitle list.
 *
 * Each request group gets the padded audio context of its lines (except
 * `Retranslate`, which is text-only), the user's instructions and the mode
 * rules. Mode rules are enforced again locally by id after the call:
 * - `FixTimestamps` keeps every matched line's translated text
 * - `Proofread` keeps every matched line's timing; only new lines bring their own
 * - `Retranslate` only replaces translated text
 *
 * A failing group keeps its original lines and does not affect its siblings.
 */

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::grouping::{batch_count, group_range, group_selected_batches};
use crate::app_config::{BatchConfig, Config};
use crate::errors::{PipelineError, ProviderError};
use crate::pipeline::concurrency::{ModelTier, TierLimits, map_in_order};
use crate::pipeline::progress::{CancellationFlag, DegradedNotice, DegradedScope, LogProgress, SharedProgress};
use crate::pipeline::prompts::{
    FIX_TIMESTAMPS_SYSTEM, PROOFREAD_SYSTEM, PromptVars, RETRANSLATE_SYSTEM, subtitle_array_schema, subtitles_payload,
};
use crate::pipeline::response::{generate_json_array, parse_subtitle_records};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::window::AudioWindow;
use crate::providers::{AudioBuffer, ContentPart, GenerateRequest, GenerativeModel, MediaService};
use crate::subtitle::{SubtitleItem, resequence};
use crate::timestamp_utils::TimestampNormalizer;

/// Kind of batch edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    FixTimestamps,
    Retranslate,
    Proofread,
}

impl BatchMode {
    /// Model tier used by the mode
    pub fn tier(&self) -> ModelTier {
        match self {
            BatchMode::Proofread => ModelTier::HighQuality,
            BatchMode::FixTimestamps | BatchMode::Retranslate => ModelTier::Fast,
        }
    }

    /// Whether the request carries audio
    pub fn uses_audio(&self) -> bool {
        !matches!(self, BatchMode::Retranslate)
    }

    fn system_template(&self) -> &'static str {
        match self {
            BatchMode::FixTimestamps => FIX_TIMESTAMPS_SYSTEM,
            BatchMode::Retranslate => RETRANSLATE_SYSTEM,
            BatchMode::Proofread => PROOFREAD_SYSTEM,
        }
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchMode::FixTimestamps => "fix_timestamps",
            BatchMode::Retranslate => "retranslate",
            BatchMode::Proofread => "proofread",
        };
        f.write_str(name)
    }
}

/// A batch edit to run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub mode: BatchMode,
    /// Selected batch indices (0-based)
    pub selected_batches: Vec<usize>,
    /// Instructions applying to every selected line
    pub instructions: Option<String>,
}

impl BatchRequest {
    pub fn new(mode: BatchMode, selected_batches: Vec<usize>) -> Self {
        Self { mode, selected_batches, instructions: None }
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }
}

/// Result of a batch edit
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Full list, renumbered 1..N
    pub subtitles: Vec<SubtitleItem>,
    /// Request groups that were applied
    pub edited_groups: Vec<Vec<usize>>,
    /// Request groups that kept their original lines
    pub failed_groups: Vec<Vec<usize>>,
}

/// Build the instruction block for a group.
///
/// When only per-line comments are given, lines without a comment must come
/// back verbatim.
pub fn build_instructions(global: Option<&str>, items: &[SubtitleItem]) -> String {
    let global = global.map(str::trim).filter(|g| !g.is_empty());
    let commented: Vec<String> = items
        .iter()
        .filter_map(|item| {
            item.comment
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| format!("- Line {}: {}", item.id, c))
        })
        .collect();

    let mut sections = Vec::new();
    if let Some(global) = global {
        sections.push(format!("Instructions for all lines:\n{}", global));
    }
    if !commented.is_empty() {
        sections.push(format!("Instructions for specific lines:\n{}", commented.join("\n")));
        if global.is_none() {
            sections.push("Return every line without an instruction exactly as given (verbatim).".to_string());
        }
    }
    sections.join("\n\n")
}

/// Re-apply the mode rules on returned lines, matching by id
pub fn enforce_mode_rules(mode: BatchMode, original: &[SubtitleItem], returned: Vec<SubtitleItem>) -> Vec<SubtitleItem> {
    let by_id: HashMap<usize, &SubtitleItem> = original.iter().map(|item| (item.id, item)).collect();

    match mode {
        BatchMode::Retranslate => {
            let translations: HashMap<usize, String> = returned
                .into_iter()
                .filter(|item| item.id > 0 && !item.translated.trim().is_empty())
                .map(|item| (item.id, item.translated))
                .collect();
            original
                .iter()
                .map(|item| SubtitleItem {
                    translated: translations.get(&item.id).cloned().unwrap_or_else(|| item.translated.clone()),
                    comment: None,
                    ..item.clone()
                })
                .collect()
        }
        BatchMode::FixTimestamps => returned
            .into_iter()
            .map(|item| match by_id.get(&item.id) {
                Some(source) => SubtitleItem { translated: source.translated.clone(), comment: None, ..item },
                None => SubtitleItem { comment: None, ..item },
            })
            .collect(),
        BatchMode::Proofread => returned
            .into_iter()
            .map(|item| match by_id.get(&item.id) {
                Some(source) => SubtitleItem {
                    start_ms: source.start_ms,
                    end_ms: source.end_ms,
                    comment: None,
                    ..item
                },
                None => SubtitleItem { comment: None, ..item },
            })
            .collect(),
    }
}

/// Settings for the batch executor
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch: BatchConfig,
    pub fast_model: String,
    pub pro_model: String,
    pub limits: TierLimits,
    pub prompt: PromptVars,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch: config.batch.clone(),
            fast_model: config.models.fast_model.clone(),
            pro_model: config.models.pro_model.clone(),
            limits: config.generation.tier_limits(),
            prompt: PromptVars::new(&config.source_language, &config.target_language)
                .with_genre(config.generation.genre.as_deref())
                .with_glossary(&config.generation.glossary),
        }
    }
}

struct GroupJob {
    batches: Vec<usize>,
    start: usize,
    end: usize,
}

/// Runs batch edits
pub struct BatchExecutor {
    model: Arc<dyn GenerativeModel>,
    media: Arc<dyn MediaService>,
    settings: BatchSettings,
    retry: RetryPolicy,
    progress: SharedProgress,
    cancel: CancellationFlag,
}

impl BatchExecutor {
    pub fn new(model: Arc<dyn GenerativeModel>, media: Arc<dyn MediaService>, settings: BatchSettings) -> Self {
        Self {
            model,
            media,
            settings,
            retry: RetryPolicy::default(),
            progress: Arc::new(LogProgress),
            cancel: CancellationFlag::new(),
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

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn model_name(&self, mode: BatchMode) -> &str {
        match mode.tier() {
            ModelTier::HighQuality => &self.settings.pro_model,
            ModelTier::Fast => &self.settings.fast_model,
        }
    }

    async fn run_group(
        &self,
        request: &BatchRequest,
        lines: &[SubtitleItem],
        audio: Option<&AudioBuffer>,
    ) -> Result<Vec<SubtitleItem>, ProviderError> {
        let mode = request.mode;
        let mut parts = Vec::new();
        let mut window = None;

        if mode.uses_audio() {
            if let Some(audio) = audio {
                let padded = AudioWindow::around(lines, self.settings.batch.context_padding_secs, audio.duration())
                    .ok_or_else(|| ProviderError::RequestFailed("group has no audio range".into()))?;
                let clip = self.media.slice_audio(audio, padded.start, padded.end).await?;
                parts.push(ContentPart::InlineAudio(clip));
                window = Some(padded);
            }
        }

        let offset_ms = window.map(|w| w.offset_ms()).unwrap_or(0);
        let instructions = build_instructions(request.instructions.as_deref(), lines);
        let mut text = format!(
            "Subtitles (times relative to the attached audio):\n{}",
            subtitles_payload(lines, offset_ms)
        );
        if !instructions.is_empty() {
            text = format!("{}\n\n{}", instructions, text);
        }
        parts.push(ContentPart::Text(text));

        let system = self
            .settings
            .prompt
            .clone()
            .with_custom_instructions(self.settings.batch.custom_prompt.as_deref())
            .render(mode.system_template());
        let generate = GenerateRequest::new(self.model_name(mode), system, parts).with_schema(subtitle_array_schema());

        let media_duration = audio.map(|a| a.duration()).unwrap_or(0.0);
        let normalizer = if media_duration > 0.0 {
            TimestampNormalizer::with_media_duration(media_duration)
        } else {
            TimestampNormalizer::new()
        };
        let values = generate_json_array(self.model.as_ref(), &generate, &self.retry).await?;
        let mut returned = parse_subtitle_records(values, &normalizer);
        if returned.is_empty() {
            return Err(ProviderError::ParseError("no subtitle lines returned".into()));
        }

        if let (Some(window), Some(first)) = (window, lines.first()) {
            window.restore_absolute(&mut returned, first.start_ms);
        }

        let mut edited = enforce_mode_rules(mode, lines, returned);
        edited.iter_mut().for_each(SubtitleItem::sanitize);
        edited.sort_by_key(|item| item.start_ms);
        Ok(edited)
    }

    /// Apply `request` to `subtitles`; `audio` is required for audio-grounded modes.
    pub async fn execute(
        &self,
        subtitles: &[SubtitleItem],
        audio: Option<&AudioBuffer>,
        request: &BatchRequest,
    ) -> Result<BatchOutcome, PipelineError> {
        if request.mode.uses_audio() && audio.is_none() {
            return Err(PipelineError::InvalidInput(format!("{} needs the source audio", request.mode)));
        }

        let batch_size = self.settings.batch.batch_size.max(1);
        let total_batches = batch_count(subtitles.len(), batch_size);
        let jobs: Vec<GroupJob> = group_selected_batches(&request.selected_batches, total_batches)
            .into_iter()
            .map(|batches| {
                let range = group_range(&batches, batch_size, subtitles.len());
                GroupJob { batches, start: range.start, end: range.end }
            })
            .collect();
        info!("Running {} over {} request groups", request.mode, jobs.len());

        let concurrency = self.settings.limits.for_tier(request.mode.tier());
        let results = map_in_order(jobs, concurrency, |job, _| async move {
            self.cancel.check()?;
            let lines = &subtitles[job.start..job.end];
            let edited = match self.run_group(request, lines, audio).await {
                Ok(edited) => Some(edited),
                Err(e) => {
                    let notice = DegradedNotice::new(
                        DegradedScope::BatchGroup,
                        format!("batches {:?}", job.batches),
                        format!("{} failed, keeping original lines: {}", request.mode, e),
                    );
                    warn!("{}: {}", notice.unit, notice.message);
                    self.progress.on_degraded(&notice);
                    None
                }
            };
            Ok::<_, PipelineError>((job, edited))
        })
        .await;

        let mut output = Vec::with_capacity(subtitles.len());
        let mut cursor = 0;
        let mut edited_groups = Vec::new();
        let mut failed_groups = Vec::new();
        for result in results {
            let (job, edited) = result?;
            output.extend_from_slice(&subtitles[cursor..job.start]);
            match edited {
                Some(lines) => {
                    output.extend(lines);
                    edited_groups.push(job.batches);
                }
                None => {
                    output.extend_from_slice(&subtitles[job.start..job.end]);
                    failed_groups.push(job.batches);
                }
            }
            cursor = job.end;
        }
        output.extend_from_slice(&subtitles[cursor..]);
        resequence(&mut output);

        Ok(BatchOutcome { subtitles: output, edited_groups, failed_groups })
    }
}
