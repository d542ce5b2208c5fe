/*!
 * Rule-based checks run locally before the model review.
 */

use crate::glossary::GlossaryItem;
use crate::subtitle::SubtitleItem;
use crate::timestamp_utils::{MAX_DURATION_MS, MIN_DURATION_MS, format_timestamp};

use super::issues::{IssueSeverity, SubtitleIssue};

/// Reading speed above which a line is flagged (characters per second)
pub const MAX_CHARS_PER_SECOND: f64 = 25.0;

fn issue(kind: &str, item: &SubtitleItem, severity: IssueSeverity, description: String, round: usize) -> SubtitleIssue {
    SubtitleIssue::new(kind, item.id, severity, description, round).with_timestamp(format_timestamp(item.start_ms))
}

/// Overlapping lines and out-of-range durations
pub fn timing_issues(items: &[SubtitleItem], round: usize) -> Vec<SubtitleIssue> {
    let mut issues = Vec::new();
    for pair in items.windows(2) {
        if pair[1].start_ms < pair[0].end_ms {
            issues.push(issue(
                "timing",
                &pair[1],
                IssueSeverity::Medium,
                format!("Overlaps line {} by {}ms", pair[0].id, pair[0].end_ms - pair[1].start_ms),
                round,
            ));
        }
    }
    for item in items {
        let duration = item.duration_ms();
        if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&duration) {
            issues.push(issue(
                "timing",
                item,
                IssueSeverity::Medium,
                format!("Duration {}ms outside {}..{}ms", duration, MIN_DURATION_MS, MAX_DURATION_MS),
                round,
            ));
        }
    }
    issues
}

/// Missing, untranslated and hard-to-read translations
pub fn translation_issues(items: &[SubtitleItem], expects_translation: bool, round: usize) -> Vec<SubtitleIssue> {
    let mut issues = Vec::new();
    for item in items {
        let original = item.original.trim();
        let translated = item.translated.trim();

        if !original.is_empty() && translated.is_empty() {
            issues.push(issue("translation", item, IssueSeverity::High, "Missing translation".into(), round));
            continue;
        }
        if expects_translation && !original.is_empty() && original == translated {
            issues.push(issue("translation", item, IssueSeverity::Medium, "Line is not translated".into(), round));
        }

        let seconds = item.duration_ms() as f64 / 1000.0;
        let chars = translated.chars().filter(|c| !c.is_whitespace()).count() as f64;
        if seconds > 0.0 && chars / seconds > MAX_CHARS_PER_SECOND {
            issues.push(issue(
                "readability",
                item,
                IssueSeverity::Low,
                format!("Reading speed {:.1} chars/s", chars / seconds),
                round,
            ));
        }
    }
    issues
}

/// Glossary terms present in the original but not rendered as required
pub fn glossary_issues(items: &[SubtitleItem], glossary: &[GlossaryItem], round: usize) -> Vec<SubtitleIssue> {
    let mut issues = Vec::new();
    for item in items {
        let original = item.original.to_lowercase();
        let translated = item.translated.to_lowercase();
        if translated.trim().is_empty() {
            continue;
        }
        for entry in glossary {
            let term = entry.term.trim().to_lowercase();
            let required = entry.translation.trim().to_lowercase();
            if !term.is_empty() && original.contains(&term) && !translated.contains(&required) {
                issues.push(issue(
                    "glossary",
                    item,
                    IssueSeverity::Medium,
                    format!("\"{}\" should be translated as \"{}\"", entry.term, entry.translation),
                    round,
                ));
            }
        }
    }
    issues
}

/// All local checks
pub fn local_checks(items: &[SubtitleItem], glossary: &[GlossaryItem], expects_translation: bool, round: usize) -> Vec<SubtitleIssue> {
    let mut issues = timing_issues(items, round);
    issues.extend(translation_issues(items, expects_translation, round));
    issues.extend(glossary_issues(items, glossary, round));
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timingIssues_shouldFlagOverlapAndDuration() {
        let items = vec![
            SubtitleItem::new(1, 0, 2_000, "a", "b"),
            SubtitleItem::new(2, 1_500, 1_800, "c", "d"),
            SubtitleItem::new(3, 3_000, 14_000, "e", "f"),
        ];

        let issues = timing_issues(&items, 1);
        let flagged: Vec<usize> = issues.iter().map(|i| i.segment_id).collect();

        assert_eq!(flagged, vec![2, 2, 3]);
        assert!(issues[0].description.contains("Overlaps line 1"));
    }

    #[test]
    fn test_translationIssues_shouldFlagMissingUntranslatedAndFast() {
        let items = vec![
            SubtitleItem::new(1, 0, 2_000, "Hello", ""),
            SubtitleItem::new(2, 2_000, 4_000, "Paris", "Paris"),
            SubtitleItem::new(3, 4_000, 5_000, "Go", "Allez, dépêchez-vous, nous sommes très en retard"),
        ];

        let issues = translation_issues(&items, true, 1);
        let kinds: Vec<(usize, IssueSeverity)> = issues.iter().map(|i| (i.segment_id, i.severity)).collect();

        assert_eq!(
            kinds,
            vec![(1, IssueSeverity::High), (2, IssueSeverity::Medium), (3, IssueSeverity::Low)]
        );
        assert_eq!(translation_issues(&items[1..2], false, 1).len(), 0);
    }

    #[test]
    fn test_glossaryIssues_shouldRequireConfiguredTranslation() {
        let glossary = vec![GlossaryItem::new("Konoha", "Feuille")];
        let items = vec![
            SubtitleItem::new(1, 0, 2_000, "Back to Konoha", "Retour au village"),
            SubtitleItem::new(2, 2_000, 4_000, "Konoha again", "Encore Feuille"),
        ];

        let issues = glossary_issues(&items, &glossary, 1);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].segment_id, 1);
        assert_eq!(issues[0].issue_type, "glossary");
    }
}
