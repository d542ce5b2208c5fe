/*!
 * Validate stage: re-checks the fixed lines against the open issues and
 * decides whether the round meets the acceptance criteria.
 */

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::engine::{PipelineContext, PipelineStage};
use super::issues::{IssueSeverity, QcData, QcState, SubtitleIssue, ValidationReport, issues_payload, parse_issues};
use crate::app_config::AcceptanceCriteria;
use crate::pipeline::prompts::{PromptVars, VALIDATE_SYSTEM, subtitles_payload};
use crate::pipeline::response::{extract_json_object, generate_with_continuation};
use crate::pipeline::retry::RetryPolicy;
use crate::providers::{ContentPart, GenerateRequest, GenerativeModel};

/// Shortest duration used for the issue rate (one second)
const MIN_RATE_MINUTES: f64 = 1.0 / 60.0;

/// Checks whether fixes worked
pub struct ValidateStage {
    pub model: Arc<dyn GenerativeModel>,
    pub model_name: String,
    pub prompt: PromptVars,
    pub criteria: AcceptanceCriteria,
    pub retry: RetryPolicy,
}

fn id_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| match id {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Build the report for `open` issues given the ids the model marked resolved.
///
/// Issues the model did not mention stay unresolved.
pub fn evaluate(
    open: &[SubtitleIssue],
    resolved_ids: &HashSet<String>,
    new_issues: Vec<SubtitleIssue>,
    criteria: &AcceptanceCriteria,
    duration_minutes: f64,
) -> ValidationReport {
    let (resolved, unresolved): (Vec<&SubtitleIssue>, Vec<&SubtitleIssue>) =
        open.iter().partition(|issue| resolved_ids.contains(&issue.id));

    let remaining = unresolved.iter().map(|issue| issue.severity).chain(new_issues.iter().map(|issue| issue.severity));
    let (mut high_count, mut medium_low_count) = (0, 0);
    for severity in remaining {
        match severity {
            IssueSeverity::High => high_count += 1,
            IssueSeverity::Medium | IssueSeverity::Low => medium_low_count += 1,
        }
    }
    let issues_per_minute = medium_low_count as f64 / duration_minutes.max(MIN_RATE_MINUTES);
    let accepted = high_count <= criteria.max_high_severity && issues_per_minute <= criteria.max_issues_per_minute;

    ValidationReport {
        resolved: resolved.iter().map(|issue| issue.id.clone()).collect(),
        unresolved: unresolved.iter().map(|issue| issue.id.clone()).collect(),
        new_issues,
        high_count,
        medium_low_count,
        issues_per_minute,
        accepted,
    }
}

#[async_trait]
impl PipelineStage<QcState, QcData> for ValidateStage {
    fn name(&self) -> &str {
        "validate"
    }

    async fn run(&self, mut state: QcState, context: &mut PipelineContext<QcData>) -> anyhow::Result<QcState> {
        let round = context.iteration;
        if state.issues.is_empty() {
            debug!("Validate round {}: no open issues", round);
            let report = evaluate(&[], &HashSet::new(), Vec::new(), &self.criteria, context.data.duration_minutes);
            state.accepted = report.accepted;
            state.validation = Some(report);
            return Ok(state);
        }

        let offset_ms = context.data.window.map(|w| w.offset_ms()).unwrap_or(0);
        let mut parts = Vec::new();
        if let Some(clip) = &context.audio {
            parts.push(ContentPart::InlineAudio(clip.clone()));
        }
        parts.push(ContentPart::Text(format!(
            "Previous issues:\n{}\n\nCurrent subtitles (times relative to the attached audio):\n{}",
            issues_payload(&state.issues),
            subtitles_payload(&state.subtitles, offset_ms)
        )));
        let system = self.prompt.clone().with_glossary(&context.data.glossary).render(VALIDATE_SYSTEM);
        let request = GenerateRequest::new(&self.model_name, system, parts);

        let verdict = generate_with_continuation(self.model.as_ref(), &request, &self.retry, extract_json_object)
            .await?
            .ok_or_else(|| anyhow::anyhow!("validation response was not a JSON object"))?;

        let resolved_ids: HashSet<String> = id_list(verdict.get("resolved")).into_iter().collect();
        let new_values = verdict
            .get("newIssues")
            .or_else(|| verdict.get("new_issues"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let new_issues = parse_issues(new_values, round, &state.subtitles, context.data.window.as_ref());

        let report = evaluate(&state.issues, &resolved_ids, new_issues, &self.criteria, context.data.duration_minutes);
        info!(
            "Validate round {}: {} resolved, {} unresolved, {} new ({} high, {:.2} other/min) -> {}",
            round,
            report.resolved.len(),
            report.unresolved.len(),
            report.new_issues.len(),
            report.high_count,
            report.issues_per_minute,
            if report.accepted { "accepted" } else { "another round needed" }
        );

        let unresolved: HashSet<&String> = report.unresolved.iter().collect();
        let mut remaining: Vec<SubtitleIssue> =
            state.issues.iter().filter(|issue| unresolved.contains(&issue.id)).cloned().collect();
        remaining.extend(report.new_issues.iter().cloned());
        state.issue_log.extend(report.new_issues.iter().cloned());

        state.issues = remaining;
        state.accepted = report.accepted;
        state.validation = Some(report);
        Ok(state)
    }
}
