/*!
 * Fix stage: asks the model to correct the open issues.
 *
 * The stage records which lines changed; whether the issues are really
 * gone is decided by the validate stage.
 */

use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

use super::engine::{PipelineContext, PipelineStage};
use super::issues::{QcData, QcState, issues_payload};
use crate::pipeline::prompts::{FIX_SYSTEM, PromptVars, subtitle_array_schema, subtitles_payload};
use crate::pipeline::response::{generate_json_array, parse_subtitle_records};
use crate::pipeline::retry::RetryPolicy;
use crate::providers::{ContentPart, GenerateRequest, GenerativeModel};
use crate::subtitle::{SubtitleItem, resequence};
use crate::timestamp_utils::TimestampNormalizer;

/// Applies fixes for open issues
pub struct FixStage {
    pub model: Arc<dyn GenerativeModel>,
    pub model_name: String,
    pub prompt: PromptVars,
    pub retry: RetryPolicy,
}

/// Ids of `before` lines whose text or timing changed in `after`, and the number of new lines
pub fn changed_lines(before: &[SubtitleItem], after: &[SubtitleItem]) -> (Vec<usize>, usize) {
    let by_id: HashMap<usize, &SubtitleItem> = before.iter().map(|item| (item.id, item)).collect();
    let mut changed = Vec::new();
    let mut inserted = 0;
    for item in after {
        match by_id.get(&item.id) {
            Some(previous) if item.differs_from(previous) => changed.push(item.id),
            Some(_) => {}
            None => inserted += 1,
        }
    }
    changed.sort_unstable();
    changed.dedup();
    (changed, inserted)
}

#[async_trait]
impl PipelineStage<QcState, QcData> for FixStage {
    fn name(&self) -> &str {
        "fix"
    }

    async fn run(&self, mut state: QcState, context: &mut PipelineContext<QcData>) -> anyhow::Result<QcState> {
        state.changed_ids.clear();
        state.inserted_lines = 0;
        if state.issues.is_empty() {
            debug!("Fix round {}: nothing to fix", context.iteration);
            return Ok(state);
        }

        let window = context.data.window;
        let offset_ms = window.map(|w| w.offset_ms()).unwrap_or(0);
        let mut parts = Vec::new();
        if let Some(clip) = &context.audio {
            parts.push(ContentPart::InlineAudio(clip.clone()));
        }
        parts.push(ContentPart::Text(format!(
            "Issues to fix:\n{}\n\nSubtitles (times relative to the attached audio):\n{}",
            issues_payload(&state.issues),
            subtitles_payload(&state.subtitles, offset_ms)
        )));

        let system = self.prompt.clone().with_glossary(&context.data.glossary).render(FIX_SYSTEM);
        let request = GenerateRequest::new(&self.model_name, system, parts).with_schema(subtitle_array_schema());
        let values = generate_json_array(self.model.as_ref(), &request, &self.retry).await?;

        let normalizer = match window {
            Some(w) => TimestampNormalizer::with_media_duration(w.end),
            None => TimestampNormalizer::new(),
        };
        let mut fixed = parse_subtitle_records(values, &normalizer);
        if fixed.is_empty() {
            anyhow::bail!("fix returned no subtitles");
        }
        if let (Some(window), Some(first)) = (window, state.subtitles.first()) {
            window.restore_absolute(&mut fixed, first.start_ms);
        }
        fixed.iter_mut().for_each(SubtitleItem::sanitize);
        fixed.sort_by_key(|item| item.start_ms);

        let (changed, inserted) = changed_lines(&state.subtitles, &fixed);
        info!(
            "Fix round {}: {} lines changed, {} inserted ({} -> {} lines)",
            context.iteration,
            changed.len(),
            inserted,
            state.subtitles.len(),
            fixed.len()
        );
        context.metadata.insert(format!("fix_changed_{}", context.iteration), changed.len().into());

        resequence(&mut fixed);
        state.subtitles = fixed;
        state.changed_ids = changed;
        state.inserted_lines = inserted;
        Ok(state)
    }
}
