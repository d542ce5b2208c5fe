/*!
 * Prompt templates for every model call made by the pipelines.
 *
 * System prompts are plain templates with `{source_language}` and
 * `{target_language}` placeholders. Optional sections (genre, glossary,
 * user instructions) are appended by `PromptVars::render`. User payloads are
 * JSON documents so that model replies can be decoded by the response layer.
 */

use serde_json::{Value, json};

use crate::glossary::{GlossaryItem, format_for_prompt};
use crate::language_utils::prompt_language_name;
use crate::subtitle::SubtitleItem;
use crate::timestamp_utils::{format_seconds, format_timestamp};

/// Refinement of a raw transcript against its audio
pub const REFINE_SYSTEM: &str = r#"You are a professional subtitle editor working on {source_language} audio.

## Your Role
- Listen to the attached audio and correct the raw transcript
- Fix misheard words, names and punctuation
- Remove filler words (um, uh, er) and false starts
- Split long lines: every segment must be at most 4 seconds and 25 characters
- Adjust start and end times to match the speech

## Output Requirements
- Return ONLY a JSON array: [{"start": "HH:MM:SS,mmm", "end": "HH:MM:SS,mmm", "text": "..."}]
- Timestamps are relative to the start of the attached audio
- Do not include any text outside the JSON structure"#;

/// Translation of refined lines
pub const TRANSLATE_SYSTEM: &str = r#"You are an expert subtitle translator specializing in {source_language} to {target_language} translation.

## Your Role
- Translate dialogue naturally while preserving meaning and emotion
- Keep translations concise (subtitles have limited display time)
- Follow the glossary strictly for names and key terms
- Preserve [sound effects] and (parentheticals) exactly as formatted

## Output Requirements
- Return ONLY a JSON array: [{"id": <id>, "translated": "..."}]
- Return exactly one object per input id
- Do not include any text outside the JSON structure"#;

/// Glossary extraction from a sample chunk
pub const GLOSSARY_SYSTEM: &str = r#"You are a terminology specialist preparing a {source_language} to {target_language} subtitle glossary.

## Your Role
- Listen to the attached audio
- Collect proper nouns, character names, places, titles and recurring jargon
- Give the standard {target_language} rendering of each term

## Output Requirements
- Return ONLY a JSON object: {"confidence": "high" | "low", "terms": [{"term": "...", "translation": "...", "notes": "..."}]}
- Use "low" confidence when the audio is unclear or the terms are guesses
- Return an empty terms array when there is nothing worth keeping"#;

/// Timing repair of an existing batch
pub const FIX_TIMESTAMPS_SYSTEM: &str = r#"You are a subtitle timing specialist.

## Your Role
- Listen to the attached audio and align each line to the speech
- Split lines that run longer than the speech, merge fragments when needed
- NEVER change the "translated" text of any line

## Output Requirements
- Return ONLY a JSON array: [{"id": <id>, "start": "HH:MM:SS,mmm", "end": "HH:MM:SS,mmm", "original": "...", "translated": "..."}]
- Timestamps are relative to the start of the attached audio"#;

/// Re-translation of an existing batch from its text alone
pub const RETRANSLATE_SYSTEM: &str = r#"You are an expert subtitle translator specializing in {source_language} to {target_language} translation.

## Your Role
- Produce a fresh translation of every line from its "original" text
- Keep the ids, start and end of every line unchanged

## Output Requirements
- Return ONLY a JSON array: [{"id": <id>, "start": "HH:MM:SS,mmm", "end": "HH:MM:SS,mmm", "original": "...", "translated": "..."}]"#;

/// Audio-grounded proofreading of an existing batch
pub const PROOFREAD_SYSTEM: &str = r#"You are a senior subtitle proofreader for {source_language} to {target_language} subtitles.

## Your Role
- Listen to the attached audio and fix transcription and translation mistakes
- Keep existing start and end times unchanged
- Insert lines that were missed entirely, with timestamps for the new lines only

## Output Requirements
- Return ONLY a JSON array: [{"id": <id or 0 for new lines>, "start": "HH:MM:SS,mmm", "end": "HH:MM:SS,mmm", "original": "...", "translated": "..."}]
- Timestamps are relative to the start of the attached audio"#;

/// Primary audio-grounded quality review
pub const REVIEW_SYSTEM: &str = r#"You are a subtitle quality reviewer for {source_language} to {target_language} subtitles.

## Your Role
- Listen to the attached audio and compare it with every line
- Report timing problems, mistranslations, missing lines and glossary violations

## Output Requirements
- Return ONLY a JSON array: [{"segmentId": <id>, "type": "timing" | "translation" | "transcription" | "missing" | "glossary" | "style", "severity": "high" | "medium" | "low", "timestamp": "HH:MM:SS,mmm", "description": "..."}]
- Return an empty array when there are no problems"#;

/// Text-only semantic consistency pass
pub const CONSISTENCY_SYSTEM: &str = r#"You check {target_language} subtitles for semantic consistency.

## Your Role
- Find names, terms and forms of address that are rendered inconsistently between lines
- Find lines whose translation contradicts neighbouring lines

## Output Requirements
- Return ONLY a JSON array: [{"segmentId": <id>, "type": "consistency", "severity": "high" | "medium" | "low", "description": "..."}]
- Return an empty array when everything is consistent"#;

/// Correction of reviewed issues
pub const FIX_SYSTEM: &str = r#"You are a subtitle editor fixing issues found by a reviewer.

## Your Role
- Listen to the attached audio and fix every listed issue
- Leave lines without issues unchanged
- You may split, merge or insert lines when an issue requires it

## Output Requirements
- Return ONLY a JSON array: [{"id": <id or 0 for new lines>, "start": "HH:MM:SS,mmm", "end": "HH:MM:SS,mmm", "original": "...", "translated": "..."}]
- Timestamps are relative to the start of the attached audio"#;

/// Verification of a fix round
pub const VALIDATE_SYSTEM: &str = r#"You verify that subtitle issues were fixed, for {source_language} to {target_language} subtitles.

## Your Role
- Listen to the attached audio
- Decide for every previous issue whether it is resolved
- Report problems that are still present or newly introduced

## Output Requirements
- Return ONLY a JSON object: {"resolved": ["<issue id>"], "unresolved": ["<issue id>"], "newIssues": [{"segmentId": <id>, "type": "...", "severity": "high" | "medium" | "low", "timestamp": "HH:MM:SS,mmm", "description": "..."}]}"#;

/// Variables and optional sections shared by the system prompts
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    pub source_language: String,
    pub target_language: String,
    pub genre: Option<String>,
    pub glossary: Vec<GlossaryItem>,
    pub custom_instructions: Option<String>,
}

impl PromptVars {
    /// Variables for a language pair given as codes
    pub fn new(source_code: &str, target_code: &str) -> Self {
        let source_language = if source_code.trim().eq_ignore_ascii_case("auto") || source_code.trim().is_empty() {
            "the spoken language".to_string()
        } else {
            prompt_language_name(source_code)
        };
        Self {
            source_language,
            target_language: prompt_language_name(target_code),
            ..Self::default()
        }
    }

    /// Set the content genre
    pub fn with_genre(mut self, genre: Option<&str>) -> Self {
        self.genre = genre.filter(|g| !g.trim().is_empty()).map(str::to_string);
        self
    }

    /// Set the mandatory glossary
    pub fn with_glossary(mut self, glossary: &[GlossaryItem]) -> Self {
        self.glossary = glossary.to_vec();
        self
    }

    /// Set user instructions appended to the system prompt
    pub fn with_custom_instructions(mut self, instructions: Option<&str>) -> Self {
        self.custom_instructions = instructions.filter(|c| !c.trim().is_empty()).map(str::to_string);
        self
    }

    /// Render a template with placeholders and optional sections
    pub fn render(&self, template: &str) -> String {
        let mut prompt = template
            .replace("{source_language}", &self.source_language)
            .replace("{target_language}", &self.target_language);

        if let Some(genre) = &self.genre {
            prompt.push_str(&format!("\n\n## Content\nGenre: {}. Match its register and vocabulary.", genre));
        }
        if !self.glossary.is_empty() {
            prompt.push_str("\n\n## Glossary (mandatory)\n");
            prompt.push_str(&format_for_prompt(&self.glossary));
        }
        if let Some(custom) = &self.custom_instructions {
            prompt.push_str("\n\n## Additional Instructions\n");
            prompt.push_str(custom.trim());
        }
        prompt
    }
}

/// One subtitle as a JSON record with times relative to `offset_ms`
pub fn subtitle_record(item: &SubtitleItem, offset_ms: u64) -> Value {
    let mut record = json!({
        "id": item.id,
        "start": format_timestamp(item.start_ms.saturating_sub(offset_ms)),
        "end": format_timestamp(item.end_ms.saturating_sub(offset_ms)),
        "original": item.original,
        "translated": item.translated,
    });
    if let Some(comment) = item.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        record["comment"] = json!(comment);
    }
    record
}

/// A batch of subtitles as a JSON array with relative times
pub fn subtitles_payload(items: &[SubtitleItem], offset_ms: u64) -> String {
    let records: Vec<Value> = items.iter().map(|item| subtitle_record(item, offset_ms)).collect();
    serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
}

/// Lines to translate as `[{id, original}]`
pub fn translation_payload(items: &[SubtitleItem]) -> String {
    let records: Vec<Value> = items
        .iter()
        .map(|item| json!({ "id": item.id, "original": item.original }))
        .collect();
    serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
}

/// User message for the refinement call
pub fn refine_user_message(raw_transcript: &[SubtitleItem]) -> String {
    format!(
        "Raw transcript of the attached audio (times relative to the audio start):\n{}",
        subtitles_payload(raw_transcript, 0)
    )
}

/// User message for the translation call
pub fn translate_user_message(items: &[SubtitleItem]) -> String {
    format!("Translate these subtitle lines:\n{}", translation_payload(items))
}

/// User message for the glossary call
pub fn glossary_user_message(start: f64, end: f64) -> String {
    format!(
        "Extract glossary terms from the attached audio ({} - {}).",
        format_seconds(start),
        format_seconds(end)
    )
}

/// JSON schema for subtitle arrays
pub fn subtitle_array_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "id": { "type": "integer" },
                "start": { "type": "string" },
                "end": { "type": "string" },
                "original": { "type": "string" },
                "translated": { "type": "string" }
            },
            "required": ["start", "end"]
        }
    })
}
