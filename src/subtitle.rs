/*!
 * In-memory subtitle model.
 *
 * Subtitles carry integer millisecond timing internally and serialize with
 * canonical `HH:MM:SS,mmm` strings. The list helpers implement the
 * splice-and-resequence edit model used by batch edits and quality control:
 * locate a range, replace it once, then renumber the whole list 1..N.
 */

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::timestamp_utils::{format_timestamp, ms_to_seconds, parse_timestamp_ms, sanitize_timing};

/// A single bilingual subtitle line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleItem {
    /// Sequence number, dense 1..N within a list
    pub id: usize,

    /// Start time in milliseconds
    #[serde(rename = "startTime", serialize_with = "ser_ts", deserialize_with = "de_ts")]
    pub start_ms: u64,

    /// End time in milliseconds
    #[serde(rename = "endTime", serialize_with = "ser_ts", deserialize_with = "de_ts")]
    pub end_ms: u64,

    /// Source-language text
    #[serde(default)]
    pub original: String,

    /// Target-language text
    #[serde(default)]
    pub translated: String,

    /// Reviewer note attached to this line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn ser_ts<S: Serializer>(ms: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*ms))
}

fn de_ts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(parse_timestamp_ms(&raw))
}

impl SubtitleItem {
    /// Create a new subtitle item
    pub fn new(id: usize, start_ms: u64, end_ms: u64, original: impl Into<String>, translated: impl Into<String>) -> Self {
        Self {
            id,
            start_ms,
            end_ms,
            original: original.into(),
            translated: translated.into(),
            comment: None,
        }
    }

    /// Attach a reviewer comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Canonical start timestamp
    pub fn start_time(&self) -> String {
        format_timestamp(self.start_ms)
    }

    /// Canonical end timestamp
    pub fn end_time(&self) -> String {
        format_timestamp(self.end_ms)
    }

    /// Start in fractional seconds
    pub fn start_seconds(&self) -> f64 {
        ms_to_seconds(self.start_ms)
    }

    /// End in fractional seconds
    pub fn end_seconds(&self) -> f64 {
        ms_to_seconds(self.end_ms)
    }

    /// Displayed duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Both text fields are blank
    pub fn is_blank(&self) -> bool {
        self.original.trim().is_empty() && self.translated.trim().is_empty()
    }

    /// Apply the timing sanity pass in place
    pub fn sanitize(&mut self) {
        let (start, end) = sanitize_timing(self.start_ms, self.end_ms);
        self.start_ms = start;
        self.end_ms = end;
    }

    /// Shift both timestamps forward
    pub fn shift(&mut self, offset_ms: u64) {
        self.start_ms = self.start_ms.saturating_add(offset_ms);
        self.end_ms = self.end_ms.saturating_add(offset_ms);
    }

    /// Whether text or timing differ from another item
    pub fn differs_from(&self, other: &SubtitleItem) -> bool {
        self.start_ms != other.start_ms
            || self.end_ms != other.end_ms
            || self.original != other.original
            || self.translated != other.translated
    }
}

impl fmt::Display for SubtitleItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\n{} --> {}\n{}", self.id, self.start_time(), self.end_time(), self.original)?;
        if !self.translated.is_empty() {
            write!(f, "\n{}", self.translated)?;
        }
        Ok(())
    }
}

/// Renumber ids to a dense 1..N sequence in list order
pub fn resequence(items: &mut [SubtitleItem]) {
    for (idx, item) in items.iter_mut().enumerate() {
        item.id = idx + 1;
    }
}

/// Concatenate groups in order and renumber
pub fn flatten_and_resequence<I>(groups: I) -> Vec<SubtitleItem>
where
    I: IntoIterator<Item = Vec<SubtitleItem>>,
{
    let mut items: Vec<SubtitleItem> = groups.into_iter().flatten().collect();
    resequence(&mut items);
    items
}

/// Replace `items[start..=end]` with `replacement` (any length) and renumber globally.
///
/// Out-of-range bounds are clamped; an inverted range inserts at `start`.
pub fn splice_range(
    items: &[SubtitleItem],
    start: usize,
    end: usize,
    replacement: Vec<SubtitleItem>,
) -> Vec<SubtitleItem> {
    let start = start.min(items.len());
    let end_exclusive = if end < start { start } else { (end + 1).min(items.len()) };

    let mut result = Vec::with_capacity(items.len() - (end_exclusive - start) + replacement.len());
    result.extend_from_slice(&items[..start]);
    result.extend(replacement);
    result.extend_from_slice(&items[end_exclusive..]);
    resequence(&mut result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(count: usize) -> Vec<SubtitleItem> {
        (0..count)
            .map(|i| SubtitleItem::new(i + 1, i as u64 * 2000, i as u64 * 2000 + 1500, format!("line {}", i), ""))
            .collect()
    }

    #[test]
    fn test_subtitleItem_serialize_shouldUseCanonicalTimestamps() {
        let item = SubtitleItem::new(1, 61_500, 63_000, "Hello", "Bonjour");
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["startTime"], "00:01:01,500");
        assert_eq!(json["endTime"], "00:01:03,000");
        assert!(json.get("comment").is_none());

        let back: SubtitleItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_spliceRange_withLongerReplacement_shouldResequence() {
        let list = items(5);
        let replacement = vec![
            SubtitleItem::new(99, 2000, 2500, "a", ""),
            SubtitleItem::new(99, 2600, 3000, "b", ""),
            SubtitleItem::new(99, 3100, 3500, "c", ""),
        ];

        let result = splice_range(&list, 1, 2, replacement);

        assert_eq!(result.len(), 6);
        assert_eq!(result.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(result[1].original, "a");
        assert_eq!(result[4].original, "line 3");
    }

    #[test]
    fn test_spliceRange_withOutOfRangeEnd_shouldClamp() {
        let list = items(3);
        let result = splice_range(&list, 2, 10, vec![]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_flattenAndResequence_shouldProduceDenseIds() {
        let groups = vec![items(2), items(3)];
        let flat = flatten_and_resequence(groups);
        assert_eq!(flat.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }
}
