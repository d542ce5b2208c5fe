/*!
 * Local clean-up of refined segments before translation.
 */

use once_cell::sync::Lazy;
use regex::Regex;

use crate::subtitle::{SubtitleItem, resequence};

/// Longest segment kept without splitting (ms)
pub const MAX_SEGMENT_MS: u64 = 4_000;

/// Longest segment text kept without splitting (characters)
pub const MAX_SEGMENT_CHARS: usize = 25;

static FILLER_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:u+[mh]+|e+r+m*|a+h+|h+m+|m+h?m*|uh-huh|mhm|oh|eh)$").unwrap()
});

const FILLER_CJK: &[char] = &['嗯', '啊', '呃', '额', '唔', '哦', '噢', '呀', 'え', 'あ', 'ー'];

const SPLIT_PUNCTUATION: &[char] = &[',', '.', '!', '?', ';', ':', '，', '。', '！', '？', '；', '：', '、', '…'];

fn is_filler_token(token: &str) -> bool {
    FILLER_WORD.is_match(token) || token.chars().all(|c| FILLER_CJK.contains(&c))
}

/// Whether a text consists only of filler sounds
pub fn is_filler_only(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let mut tokens = lowered
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation() || SPLIT_PUNCTUATION.contains(&c) || c == '~' || c == '～')
        .filter(|t| !t.is_empty())
        .peekable();
    tokens.peek().is_some() && tokens.all(is_filler_token)
}

/// Remove segments whose text is only filler
pub fn strip_fillers(items: Vec<SubtitleItem>) -> Vec<SubtitleItem> {
    items.into_iter().filter(|item| !is_filler_only(&item.original)).collect()
}

/// Char index to split at, nearest the middle; `None` when no split point exists
fn split_point(text: &str) -> Option<usize> {
    let chars: Vec<char> = text.chars().collect();
    let middle = chars.len() as f64 / 2.0;
    chars
        .iter()
        .enumerate()
        .filter(|(i, c)| *i + 1 < chars.len() && (c.is_whitespace() || SPLIT_PUNCTUATION.contains(*c)))
        .map(|(i, _)| i + 1)
        .filter(|&at| {
            let left: String = chars[..at].iter().collect();
            let right: String = chars[at..].iter().collect();
            !left.trim().is_empty() && !right.trim().is_empty()
        })
        .min_by(|a, b| (*a as f64 - middle).abs().total_cmp(&(*b as f64 - middle).abs()))
}

fn split_item(item: SubtitleItem, out: &mut Vec<SubtitleItem>) {
    let too_long = item.duration_ms() > MAX_SEGMENT_MS || item.original.chars().count() > MAX_SEGMENT_CHARS;
    let Some(at) = too_long.then(|| split_point(&item.original)).flatten() else {
        out.push(item);
        return;
    };

    let chars: Vec<char> = item.original.chars().collect();
    let left: String = chars[..at].iter().collect::<String>().trim().to_string();
    let right: String = chars[at..].iter().collect::<String>().trim().to_string();
    let total_chars = (left.chars().count() + right.chars().count()).max(1) as u128;
    let share = item.duration_ms() as u128 * left.chars().count() as u128 / total_chars;
    let cut_ms = item.start_ms.saturating_add(share as u64);

    let first = SubtitleItem { end_ms: cut_ms, original: left, translated: String::new(), ..item.clone() };
    let second = SubtitleItem { start_ms: cut_ms, original: right, translated: String::new(), ..item };
    split_item(first, out);
    split_item(second, out);
}

/// Split segments longer than `MAX_SEGMENT_MS` or `MAX_SEGMENT_CHARS`, with proportional timing.
///
/// Segments without a usable split point are kept as they are.
pub fn enforce_segment_limits(items: Vec<SubtitleItem>) -> Vec<SubtitleItem> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        split_item(item, &mut out);
    }
    resequence(&mut out);
    out
}
