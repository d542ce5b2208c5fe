/*!
 * Timestamp parsing, repair and timing sanity rules.
 *
 * Models write timestamps in many shapes (`1:02.5`, `00:01:75,000`,
 * `75.2`, `00:00:01:500`). Everything is converted to integer milliseconds
 * and rendered back in the canonical `HH:MM:SS,mmm` form.
 *
 * The unit-shift correction is a best-effort heuristic for a known model
 * failure mode where `MM:SS,mmm` is written one unit too deep
 * (`01:30:15,000` meaning 1m30.15s). It only fires when a non-zero hours
 * component pushes the value past the media duration plus a buffer, and only
 * when the reinterpreted value actually fits inside the media.
 */

use log::{debug, warn};

/// Seconds past the media duration tolerated before the unit-shift heuristic fires
pub const UNIT_SHIFT_BUFFER_SECS: f64 = 30.0;

/// Scale applied to the trailing component when reinterpreting it as milliseconds
pub const UNIT_SHIFT_MS_SCALE: u64 = 10;

/// Minimum displayed duration before an item is extended
pub const MIN_DURATION_MS: u64 = 500;

/// Extension applied to items shorter than the minimum
pub const SHORT_EXTENSION_MS: u64 = 1_500;

/// Maximum displayed duration before an item is clamped
pub const MAX_DURATION_MS: u64 = 10_000;

/// Duration an overlong item is clamped to
pub const LONG_CLAMP_MS: u64 = 5_000;

/// Upper bound for timing given as plain seconds (99:59:59,999)
pub const MAX_TIMESTAMP_MS: u64 = 359_999_999;

/// Components recovered from a raw timestamp string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimestampParts {
    hours: Option<u64>,
    minutes: u64,
    seconds: u64,
    millis: u64,
}

impl TimestampParts {
    /// `None` when the components do not fit in a `u64` of milliseconds.
    fn total_ms(&self) -> Option<u64> {
        self.hours
            .unwrap_or(0)
            .checked_mul(3_600_000)?
            .checked_add(self.minutes.checked_mul(60_000)?)?
            .checked_add(self.seconds.checked_mul(1_000)?)?
            .checked_add(self.millis)
    }

    /// The `MM:SS,mmm` reading of an `H:M:S` triple written one unit too deep.
    fn unit_shifted_ms(&self, hours: u64) -> Option<u64> {
        let scaled = self.seconds.checked_mul(UNIT_SHIFT_MS_SCALE).unwrap_or(u64::MAX).min(999);
        hours
            .checked_mul(60_000)?
            .checked_add(self.minutes.checked_mul(1_000)?)?
            .checked_add(scaled)
    }
}

fn parse_number(part: &str) -> Option<u64> {
    let part = part.trim();
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Fractional digits are read as a decimal fraction of a second: `5` is 500ms.
fn parse_fraction(frac: &str) -> Option<u64> {
    if frac.is_empty() {
        return Some(0);
    }
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut digits: String = frac.chars().take(3).collect();
    while digits.len() < 3 {
        digits.push('0');
    }
    digits.parse().ok()
}

fn parse_parts(raw: &str) -> Option<TimestampParts> {
    let cleaned = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if cleaned.is_empty() {
        return None;
    }

    let (main, millis) = match cleaned.rfind([',', '.']) {
        Some(pos) if !cleaned[pos + 1..].contains(':') => {
            (&cleaned[..pos], Some(parse_fraction(&cleaned[pos + 1..])?))
        }
        _ => (cleaned, None),
    };

    let numbers = main
        .split(':')
        .map(parse_number)
        .collect::<Option<Vec<u64>>>()?;

    match (numbers.as_slice(), millis) {
        ([s], ms) => Some(TimestampParts { hours: None, minutes: 0, seconds: *s, millis: ms.unwrap_or(0) }),
        ([m, s], ms) => Some(TimestampParts { hours: None, minutes: *m, seconds: *s, millis: ms.unwrap_or(0) }),
        ([h, m, s], ms) => Some(TimestampParts { hours: Some(*h), minutes: *m, seconds: *s, millis: ms.unwrap_or(0) }),
        // `HH:MM:SS:mmm` with a colon in place of the comma
        ([h, m, s, ms], None) => Some(TimestampParts {
            hours: Some(*h),
            minutes: *m,
            seconds: *s,
            millis: (*ms).min(999),
        }),
        _ => None,
    }
}

/// Render milliseconds as `HH:MM:SS,mmm`.
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Render fractional seconds as `HH:MM:SS,mmm`.
pub fn format_seconds(seconds: f64) -> String {
    format_timestamp(seconds_to_ms(seconds))
}

/// Convert non-negative fractional seconds to whole milliseconds, capped at `MAX_TIMESTAMP_MS`.
pub fn seconds_to_ms(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    ((seconds * 1000.0).round() as u64).min(MAX_TIMESTAMP_MS)
}

/// Convert milliseconds to fractional seconds.
pub fn ms_to_seconds(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Repairs timestamps against an optional known media duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampNormalizer {
    media_duration: Option<f64>,
}

impl TimestampNormalizer {
    /// Normalizer without the media-duration heuristic.
    pub fn new() -> Self {
        Self { media_duration: None }
    }

    /// Normalizer that can correct unit-shifted timestamps for media of this length (seconds).
    pub fn with_media_duration(duration_secs: f64) -> Self {
        Self { media_duration: Some(duration_secs) }
    }

    /// The media duration used for heuristics, if any.
    pub fn media_duration(&self) -> Option<f64> {
        self.media_duration
    }

    /// Parse a raw timestamp into milliseconds. Unparseable input becomes 0.
    pub fn to_ms(&self, raw: &str) -> u64 {
        let Some((parts, total)) = parse_parts(raw).and_then(|parts| Some((parts, parts.total_ms()?))) else {
            debug!("Unparseable timestamp '{}', using 00:00:00,000", raw);
            return 0;
        };

        let (Some(hours), Some(duration)) = (parts.hours, self.media_duration) else {
            return total;
        };

        let limit = duration + UNIT_SHIFT_BUFFER_SECS;
        if hours == 0 || ms_to_seconds(total) <= limit {
            return total;
        }

        let shifted = parts.unit_shifted_ms(hours).filter(|&ms| ms_to_seconds(ms) <= limit);
        if let Some(shifted) = shifted {
            warn!(
                "Timestamp '{}' exceeds media duration {:.1}s, reinterpreted as {}",
                raw,
                duration,
                format_timestamp(shifted)
            );
            shifted
        } else {
            warn!(
                "Timestamp '{}' exceeds media duration {:.1}s and no unit shift fits, kept as is",
                raw, duration
            );
            total
        }
    }

    /// Canonical `HH:MM:SS,mmm` rendering of a raw timestamp.
    pub fn normalize(&self, raw: &str) -> String {
        format_timestamp(self.to_ms(raw))
    }
}

/// Normalize a timestamp without media-duration heuristics.
pub fn normalize_timestamp(raw: &str) -> String {
    TimestampNormalizer::new().normalize(raw)
}

/// Parse a timestamp into milliseconds without media-duration heuristics.
pub fn parse_timestamp_ms(raw: &str) -> u64 {
    TimestampNormalizer::new().to_ms(raw)
}

/// Item-level sanity pass: orders the pair and keeps the duration within 0.5s..=10s.
pub fn sanitize_timing(start_ms: u64, end_ms: u64) -> (u64, u64) {
    let (start, mut end) = if start_ms > end_ms { (end_ms, start_ms) } else { (start_ms, end_ms) };

    let duration = end - start;
    if duration < MIN_DURATION_MS {
        end = end.saturating_add(SHORT_EXTENSION_MS);
    } else if duration > MAX_DURATION_MS {
        end = start.saturating_add(LONG_CLAMP_MS);
    }

    (start, end)
}

/// Decide whether timestamps returned for an audio slice are relative to it.
///
/// The first returned start is compared with zero (relative reading) and with
/// the expected absolute start. The slice offset is returned only when the
/// relative reading is strictly closer; otherwise the values are taken as
/// already absolute and 0 is returned.
pub fn resolve_slice_offset(first_returned_ms: u64, offset_ms: u64, expected_absolute_start_ms: u64) -> u64 {
    if offset_ms == 0 {
        return 0;
    }
    let distance_to_zero = first_returned_ms;
    let distance_to_absolute = first_returned_ms.abs_diff(expected_absolute_start_ms);
    if distance_to_zero < distance_to_absolute {
        debug!(
            "Returned timestamps look relative (first {}ms), applying slice offset {}ms",
            first_returned_ms, offset_ms
        );
        offset_ms
    } else {
        0
    }
}
