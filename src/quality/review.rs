/*!
 * Review stage: local checks, semantic consistency pass and audio review.
 *
 * The semantic consistency pass is advisory and degrades to a warning when
 * it fails. The primary audio-grounded review is required; its failure fails
 * the stage.
 */

use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

use super::consistency::local_checks;
use super::engine::{PipelineContext, PipelineStage};
use super::issues::{QcData, QcState, SubtitleIssue, parse_issues};
use crate::pipeline::progress::{DegradedNotice, DegradedScope, SharedProgress};
use crate::pipeline::prompts::{CONSISTENCY_SYSTEM, PromptVars, REVIEW_SYSTEM, subtitles_payload};
use crate::pipeline::response::generate_json_array;
use crate::pipeline::retry::RetryPolicy;
use crate::providers::{ContentPart, GenerateRequest, GenerativeModel};

/// Finds issues in the working lines
pub struct ReviewStage {
    pub model: Arc<dyn GenerativeModel>,
    pub model_name: String,
    pub prompt: PromptVars,
    pub semantic_consistency: bool,
    pub retry: RetryPolicy,
    pub progress: SharedProgress,
}

impl ReviewStage {
    async fn consistency_pass(&self, state: &QcState, context: &PipelineContext<QcData>) -> Vec<SubtitleIssue> {
        if !self.semantic_consistency || state.subtitles.len() < 2 {
            return Vec::new();
        }
        let request = GenerateRequest::new(
            &self.model_name,
            self.prompt.render(CONSISTENCY_SYSTEM),
            vec![ContentPart::Text(format!(
                "Subtitles to check:\n{}",
                subtitles_payload(&state.subtitles, context.data.window.map(|w| w.offset_ms()).unwrap_or(0))
            ))],
        );
        match generate_json_array(self.model.as_ref(), &request, &self.retry).await {
            Ok(values) => parse_issues(values, context.iteration, &state.subtitles, context.data.window.as_ref()),
            Err(e) => {
                let notice = DegradedNotice::new(
                    DegradedScope::ConsistencyReview,
                    format!("round {}", context.iteration),
                    format!("semantic consistency pass skipped: {}", e),
                );
                warn!("{}", notice.message);
                self.progress.on_degraded(&notice);
                Vec::new()
            }
        }
    }

    async fn audio_review(&self, state: &QcState, context: &PipelineContext<QcData>) -> anyhow::Result<Vec<SubtitleIssue>> {
        let offset_ms = context.data.window.map(|w| w.offset_ms()).unwrap_or(0);
        let mut parts = Vec::new();
        if let Some(clip) = &context.audio {
            parts.push(ContentPart::InlineAudio(clip.clone()));
        }
        parts.push(ContentPart::Text(format!(
            "Subtitles to review (times relative to the attached audio):\n{}",
            subtitles_payload(&state.subtitles, offset_ms)
        )));

        let system = self.prompt.clone().with_glossary(&context.data.glossary).render(REVIEW_SYSTEM);
        let request = GenerateRequest::new(&self.model_name, system, parts);
        let values = generate_json_array(self.model.as_ref(), &request, &self.retry).await?;
        Ok(parse_issues(values, context.iteration, &state.subtitles, context.data.window.as_ref()))
    }
}

#[async_trait]
impl PipelineStage<QcState, QcData> for ReviewStage {
    fn name(&self) -> &str {
        "review"
    }

    async fn run(&self, mut state: QcState, context: &mut PipelineContext<QcData>) -> anyhow::Result<QcState> {
        let round = context.iteration;
        let mut issues = local_checks(
            &state.subtitles,
            &context.data.glossary,
            context.data.expects_translation,
            round,
        );
        let local_count = issues.len();

        issues.extend(self.consistency_pass(&state, context).await);
        issues.extend(self.audio_review(&state, context).await?);

        info!(
            "Review round {}: {} issues ({} from local checks)",
            round,
            issues.len(),
            local_count
        );
        context.metadata.insert(format!("review_issues_{}", round), issues.len().into());

        state.issue_log.extend(issues.iter().cloned());
        state.issues = issues;
        state.validation = None;
        state.accepted = false;
        Ok(state)
    }
}
