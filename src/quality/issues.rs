/*!
 * Issue records and the state carried through a quality-control run.
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::glossary::GlossaryItem;
use crate::pipeline::window::AudioWindow;
use crate::subtitle::SubtitleItem;
use crate::timestamp_utils::{TimestampNormalizer, format_timestamp, resolve_slice_offset};

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    High,
    Medium,
    Low,
}

impl IssueSeverity {
    /// Lenient parse; unknown values count as medium
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" | "critical" | "major" => IssueSeverity::High,
            "low" | "minor" => IssueSeverity::Low,
            _ => IssueSeverity::Medium,
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueSeverity::High => "high",
            IssueSeverity::Medium => "medium",
            IssueSeverity::Low => "low",
        };
        f.write_str(name)
    }
}

/// A problem found in a subtitle line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleIssue {
    /// Unique issue id
    pub id: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    /// Id of the affected line in the working list
    pub segment_id: usize,
    /// Absolute position of the problem, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub description: String,
    pub severity: IssueSeverity,
    /// QC round that found the issue
    pub round_identified: usize,
}

impl SubtitleIssue {
    pub fn new(issue_type: &str, segment_id: usize, severity: IssueSeverity, description: impl Into<String>, round: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issue_type: issue_type.to_string(),
            segment_id,
            timestamp: None,
            description: description.into(),
            severity,
            round_identified: round,
        }
    }

    pub fn with_timestamp(mut self, timestamp: String) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Lenient issue record as written by models
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIssue {
    #[serde(rename = "segmentId", alias = "segment_id", alias = "lineId", alias = "line")]
    segment_id: Option<Value>,
    #[serde(rename = "type", alias = "issueType", alias = "category")]
    issue_type: Option<String>,
    severity: Option<String>,
    timestamp: Option<String>,
    description: Option<String>,
}

/// Convert model issue records; timestamps are mapped back to absolute time.
pub fn parse_issues(values: Vec<Value>, round: usize, lines: &[SubtitleItem], window: Option<&AudioWindow>) -> Vec<SubtitleIssue> {
    let normalizer = TimestampNormalizer::new();
    values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<RawIssue>(value).ok())
        .filter_map(|raw| {
            let description = raw.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())?;
            let segment_id = match raw.segment_id {
                Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
                Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
                _ => 0,
            };
            let mut issue = SubtitleIssue::new(
                raw.issue_type.as_deref().unwrap_or("general"),
                segment_id,
                IssueSeverity::parse(raw.severity.as_deref().unwrap_or("medium")),
                description,
                round,
            );
            if let Some(ts) = raw.timestamp.filter(|t| !t.trim().is_empty()) {
                let returned = normalizer.to_ms(&ts);
                let absolute = match window {
                    Some(window) => {
                        let expected = lines
                            .iter()
                            .find(|l| l.id == segment_id)
                            .map(|l| l.start_ms)
                            .unwrap_or_else(|| window.offset_ms());
                        returned.saturating_add(resolve_slice_offset(returned, window.offset_ms(), expected))
                    }
                    None => returned,
                };
                issue = issue.with_timestamp(format_timestamp(absolute));
            }
            Some(issue)
        })
        .collect()
}

/// Verdict of a validation round
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub resolved: Vec<String>,
    pub unresolved: Vec<String>,
    pub new_issues: Vec<SubtitleIssue>,
    pub high_count: usize,
    pub medium_low_count: usize,
    pub issues_per_minute: f64,
    pub accepted: bool,
}

/// State carried from stage to stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QcState {
    /// Working lines, absolute timing, ids 1..K
    pub subtitles: Vec<SubtitleItem>,
    /// Open issues
    pub issues: Vec<SubtitleIssue>,
    /// Every issue ever reported, in order
    pub issue_log: Vec<SubtitleIssue>,
    /// Ids changed by the last fix (ids before the fix)
    pub changed_ids: Vec<usize>,
    /// Lines inserted by the last fix
    pub inserted_lines: usize,
    pub validation: Option<ValidationReport>,
    pub accepted: bool,
}

impl QcState {
    pub fn new(subtitles: Vec<SubtitleItem>) -> Self {
        Self { subtitles, ..Self::default() }
    }
}

/// Read-only data shared by the stages of a run
#[derive(Debug, Clone, Default)]
pub struct QcData {
    pub glossary: Vec<GlossaryItem>,
    /// Audio window the working lines were sliced with
    pub window: Option<AudioWindow>,
    /// Length of the reviewed range, for the issue rate
    pub duration_minutes: f64,
    /// Whether source and target language differ
    pub expects_translation: bool,
}

/// Issues as a JSON array for prompts
pub fn issues_payload(issues: &[SubtitleIssue]) -> String {
    serde_json::to_string_pretty(issues).unwrap_or_else(|_| "[]".to_string())
}
