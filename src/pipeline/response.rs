/*!
 * Tolerant decoding of model responses.
 *
 * Models wrap JSON in markdown fences, surround it with prose, nest the
 * array inside `{"items": [...]}` or `{"subtitles": [...]}`, or stop halfway
 * through. This module:
 * - strips fences and locates the outermost balanced JSON value
 * - decodes it as an explicit payload union and unwraps it
 * - converts lenient records into `SubtitleItem`s, dropping blank lines
 * - drives a small continuation state machine when the output is truncated
 */

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::ProviderError;
use crate::pipeline::retry::{RetryPolicy, with_retry};
use crate::providers::{ChatTurn, GenerateRequest, GenerativeModel};
use crate::subtitle::SubtitleItem;
use crate::timestamp_utils::{TimestampNormalizer, seconds_to_ms};

/// Continuations attempted before a truncated response is abandoned
pub const MAX_CONTINUATIONS: usize = 3;

/// Instruction sent when a response was cut off
pub const CONTINUE_INSTRUCTION: &str = "Your previous response was cut off. Continue exactly where you left off. \
Do not repeat anything you already wrote, do not restart the JSON and do not add any commentary.";

/// Shapes a model may use for a list payload
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelPayload {
    Array(Vec<Value>),
    Items { items: Vec<Value> },
    Subtitles { subtitles: Vec<Value> },
}

impl ModelPayload {
    fn into_items(self) -> Option<Vec<Value>> {
        let items = match self {
            ModelPayload::Array(items) => items,
            ModelPayload::Items { items } => items,
            ModelPayload::Subtitles { subtitles } => subtitles,
        };
        // Arrays of scalars are nested fragments, not a record list
        items.iter().all(Value::is_object).then_some(items)
    }
}

/// Remove markdown code fences, keeping the fenced body.
///
/// An unterminated fence (truncated output) keeps everything after the opener.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after_open = &trimmed[open + 3..];
    // Skip the language tag line (```json)
    let body_start = match after_open.find('\n') {
        Some(nl) if after_open[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
        _ => 0,
    };
    let body = &after_open[body_start..];

    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Find the end (inclusive byte index) of the balanced value starting at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Balanced JSON candidates in order of their opening bracket.
fn balanced_candidates<'a>(text: &'a str, openers: &'a [u8]) -> impl Iterator<Item = &'a str> + 'a {
    text.bytes()
        .enumerate()
        .filter(move |(_, b)| openers.contains(b))
        .filter_map(move |(start, _)| balanced_end(text, start).map(|end| &text[start..=end]))
}

/// Extract a list of JSON records from raw model text.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return None;
    }

    if let Some(items) = serde_json::from_str::<ModelPayload>(cleaned).ok().and_then(ModelPayload::into_items) {
        return Some(items);
    }

    balanced_candidates(cleaned, b"[{").find_map(|candidate| {
        serde_json::from_str::<ModelPayload>(candidate)
            .ok()
            .and_then(ModelPayload::into_items)
    })
}

/// Extract a single JSON object from raw model text.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let cleaned = strip_code_fences(text);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(cleaned) {
        return Some(map);
    }
    balanced_candidates(cleaned, b"{").find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    })
}

/// Lenient subtitle record as written by models
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSubtitle {
    id: Option<Value>,
    #[serde(rename = "startTime", alias = "start", alias = "start_time")]
    start_time: Option<Value>,
    #[serde(rename = "endTime", alias = "end", alias = "end_time")]
    end_time: Option<Value>,
    #[serde(alias = "text", alias = "source")]
    original: Option<String>,
    #[serde(alias = "translation", alias = "target")]
    translated: Option<String>,
    comment: Option<String>,
}

fn value_to_id(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_ms(value: &Value, normalizer: &TimestampNormalizer) -> u64 {
    match value {
        Value::Number(n) => seconds_to_ms(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => normalizer.to_ms(s),
        _ => 0,
    }
}

/// Convert JSON records into subtitle items.
///
/// Records without a usable id get id 0 (no match against existing lines).
/// Records whose original and translated text are both empty are dropped.
/// Timing is normalized but not sanity-checked here.
pub fn parse_subtitle_records(values: Vec<Value>, normalizer: &TimestampNormalizer) -> Vec<SubtitleItem> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawSubtitle>(value) {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!("Skipping malformed subtitle record: {}", e);
                None
            }
        })
        .filter_map(|raw| {
            let original = raw.original.unwrap_or_default().trim().to_string();
            let translated = raw.translated.unwrap_or_default().trim().to_string();
            if original.is_empty() && translated.is_empty() {
                return None;
            }
            let start_ms = raw.start_time.as_ref().map(|v| value_to_ms(v, normalizer)).unwrap_or(0);
            let end_ms = raw.end_time.as_ref().map(|v| value_to_ms(v, normalizer)).unwrap_or(start_ms);
            Some(SubtitleItem {
                id: raw.id.as_ref().and_then(value_to_id).unwrap_or(0),
                start_ms,
                end_ms,
                original,
                translated,
                comment: raw.comment.filter(|c| !c.trim().is_empty()),
            })
        })
        .collect()
}

/// Parse subtitle items straight from raw model text.
pub fn parse_subtitle_response(text: &str, normalizer: &TimestampNormalizer) -> Vec<SubtitleItem> {
    extract_json_array(text)
        .map(|values| parse_subtitle_records(values, normalizer))
        .unwrap_or_default()
}

/// States of the truncation-continuation loop
#[derive(Debug)]
enum ContinuationState<T> {
    Generating,
    CheckingParse,
    Continuing,
    Done(T),
    Failed,
}

/// Generate and decode, continuing the conversation while the output does not parse.
///
/// Provider errors (after retries) are returned; a response that never
/// parses within the continuation budget yields `Ok(None)`.
pub async fn generate_with_continuation<T, P>(
    model: &dyn GenerativeModel,
    request: &GenerateRequest,
    policy: &RetryPolicy,
    parse: P,
) -> Result<Option<T>, ProviderError>
where
    P: Fn(&str) -> Option<T>,
{
    let mut state = ContinuationState::Generating;
    let mut accumulated = String::new();
    let mut continuations = 0;

    loop {
        state = match state {
            ContinuationState::Generating => {
                accumulated = with_retry(policy, "generate", || model.generate(request.clone())).await?;
                ContinuationState::CheckingParse
            }
            ContinuationState::CheckingParse => match parse(&accumulated) {
                Some(value) => ContinuationState::Done(value),
                None if continuations < MAX_CONTINUATIONS => ContinuationState::Continuing,
                None => ContinuationState::Failed,
            },
            ContinuationState::Continuing => {
                continuations += 1;
                debug!(
                    "Response did not parse ({} chars), continuation {}/{}",
                    accumulated.len(),
                    continuations,
                    MAX_CONTINUATIONS
                );
                let mut follow_up = request.clone();
                follow_up.turns.push(ChatTurn::model_text(accumulated.clone()));
                follow_up.turns.push(ChatTurn::user_text(CONTINUE_INSTRUCTION));
                let more = with_retry(policy, "continue", || model.generate(follow_up.clone())).await?;
                accumulated.push_str(&more);
                ContinuationState::CheckingParse
            }
            ContinuationState::Done(value) => return Ok(Some(value)),
            ContinuationState::Failed => {
                warn!(
                    "Giving up on unparseable response after {} continuations ({} chars)",
                    continuations,
                    accumulated.len()
                );
                return Ok(None);
            }
        };
    }
}

/// Generate a JSON record list, with continuation; an unparseable result is empty.
pub async fn generate_json_array(
    model: &dyn GenerativeModel,
    request: &GenerateRequest,
    policy: &RetryPolicy,
) -> Result<Vec<Value>, ProviderError> {
    Ok(generate_with_continuation(model, request, policy, extract_json_array)
        .await?
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::ScriptedModel;
    use crate::providers::{ContentPart, Role};
    use crate::timestamp_utils::MAX_TIMESTAMP_MS;

    const ARRAY: &str = r#"[{"id": 1, "startTime": "00:00:01,000", "endTime": "00:00:02,000", "original": "Hi", "translated": "Salut"}]"#;

    #[test]
    fn test_extractJsonArray_shouldAgreeAcrossShapes() {
        let expected = extract_json_array(ARRAY).unwrap();

        let fenced = format!("```json\n{}\n```", ARRAY);
        let wrapped_items = format!(r#"{{"items": {}}}"#, ARRAY);
        let wrapped_subtitles = format!(r#"{{"subtitles": {}}}"#, ARRAY);
        let trailing = format!("{}\n\nLet me know if you need anything else!", ARRAY);
        let leading = format!("Sure! Here are the lines: {} [end]", ARRAY);

        for text in [fenced, wrapped_items, wrapped_subtitles, trailing, leading] {
            assert_eq!(extract_json_array(&text).unwrap(), expected, "input: {}", text);
        }
    }

    #[test]
    fn test_extractJsonArray_withBracketsInsideStrings_shouldStayBalanced() {
        let text = r#"Result: [{"original": "a ] tricky [ line", "translated": "x"}] done"#;
        let values = extract_json_array(text).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["original"], "a ] tricky [ line");
    }

    #[test]
    fn test_extractJsonArray_withTruncatedOutput_shouldReturnNone() {
        let text = r#"[{"id": 1, "original": "a", "tags": ["x"]}, {"id": 2, "orig"#;
        assert!(extract_json_array(text).is_none());
    }

    #[test]
    fn test_parseSubtitleRecords_shouldDropBlankAndNormalize() {
        let text = r#"[
            {"id": "3", "start": "0:01.5", "end": 2.75, "text": "Hello", "translation": "Bonjour"},
            {"id": 4, "startTime": "00:00:03,000", "endTime": "00:00:04,000", "original": " ", "translated": ""},
            {"startTime": "00:01:75,000", "endTime": "00:02:16,000", "original": "No id"}
        ]"#;
        let items = parse_subtitle_response(text, &TimestampNormalizer::new());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 3);
        assert_eq!(items[0].start_ms, 1_500);
        assert_eq!(items[0].end_ms, 2_750);
        assert_eq!(items[0].translated, "Bonjour");
        assert_eq!(items[1].id, 0);
        assert_eq!(items[1].start_ms, 135_000);
    }

    #[test]
    fn test_parseSubtitleRecords_withOutOfRangeTimes_shouldStayBounded() {
        let text = r#"[
            {"id": 1, "start": 1e20, "end": 1e20, "text": "hi"},
            {"id": 2, "start": "9999999999999:00:00,000", "end": "00:00:02,000", "text": "there"}
        ]"#;
        let mut items = parse_subtitle_response(text, &TimestampNormalizer::with_media_duration(600.0));

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].start_ms, MAX_TIMESTAMP_MS);
        assert_eq!(items[0].end_ms, MAX_TIMESTAMP_MS);
        assert_eq!(items[1].start_ms, 0);

        for item in items.iter_mut() {
            item.shift(300_000);
            item.sanitize();
        }
        assert_eq!(items[0].start_ms, MAX_TIMESTAMP_MS + 300_000);
        assert_eq!(items[0].end_ms, MAX_TIMESTAMP_MS + 300_000 + 1_500);
    }

    #[test]
    fn test_extractJsonObject_shouldSkipProse() {
        let text = "Here you go:\n```json\n{\"resolved\": [\"a\"], \"newIssues\": []}\n```";
        let map = extract_json_object(text).unwrap();
        assert!(map.contains_key("resolved"));
    }

    #[tokio::test]
    async fn test_generateJsonArray_withTruncation_shouldContinueAndConcatenate() {
        let full = r#"[{"id": 1, "original": "a", "translated": "b"}, {"id": 2, "original": "c", "translated": "d"}]"#;
        let (head, tail) = full.split_at(40);
        let model = ScriptedModel::sequence(vec![Ok(head.to_string()), Ok(tail.to_string())]);
        let request = GenerateRequest::new("m", "sys", vec![ContentPart::Text("go".into())]);

        let values = generate_json_array(&model, &request, &RetryPolicy::immediate(1)).await.unwrap();

        assert_eq!(values, extract_json_array(&format!("{}{}", head, tail)).unwrap());
        assert_eq!(model.call_count(), 2);
        let follow_up = &model.requests()[1];
        assert_eq!(follow_up.turns.len(), 3);
        assert_eq!(follow_up.turns[1].role, Role::Model);
        assert_eq!(follow_up.turns[1].text(), head);
        assert_eq!(follow_up.turns[2].text(), CONTINUE_INSTRUCTION);
    }

    #[tokio::test]
    async fn test_generateJsonArray_withGarbage_shouldGiveUpEmpty() {
        let model = ScriptedModel::replying("I cannot help with that.");
        let request = GenerateRequest::new("m", "sys", vec![ContentPart::Text("go".into())]);

        let values = generate_json_array(&model, &request, &RetryPolicy::immediate(1)).await.unwrap();

        assert!(values.is_empty());
        assert_eq!(model.call_count(), 1 + MAX_CONTINUATIONS);
    }
}
