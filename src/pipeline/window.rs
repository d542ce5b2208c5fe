/*!
 * Audio context windows around a range of subtitles.
 *
 * Models always see timestamps relative to the audio slice they receive.
 * `AudioWindow` computes the padded slice for a set of lines and maps
 * returned timestamps back to absolute time.
 */

use crate::subtitle::SubtitleItem;
use crate::timestamp_utils::{ms_to_seconds, resolve_slice_offset, seconds_to_ms};

/// A padded time range of the source audio (seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioWindow {
    pub start: f64,
    pub end: f64,
}

impl AudioWindow {
    /// Window covering `items` plus `padding_secs` on both sides, clamped to `[0, media_duration]`
    pub fn around(items: &[SubtitleItem], padding_secs: f64, media_duration: f64) -> Option<Self> {
        let first = items.iter().map(|i| i.start_ms).min()?;
        let last = items.iter().map(|i| i.end_ms).max()?;
        let start = (ms_to_seconds(first) - padding_secs).max(0.0);
        let end = (ms_to_seconds(last) + padding_secs).min(media_duration);
        (end > start).then_some(Self { start, end })
    }

    /// Offset of the window start in milliseconds
    pub fn offset_ms(&self) -> u64 {
        seconds_to_ms(self.start)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Shift returned lines to absolute time when they look relative to this window
    pub fn restore_absolute(&self, returned: &mut [SubtitleItem], expected_absolute_start_ms: u64) {
        let Some(first) = returned.first() else {
            return;
        };
        let offset = resolve_slice_offset(first.start_ms, self.offset_ms(), expected_absolute_start_ms);
        if offset > 0 {
            returned.iter_mut().for_each(|item| item.shift(offset));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_around_shouldPadAndClamp() {
        let items = vec![SubtitleItem::new(1, 2_000, 4_000, "a", ""), SubtitleItem::new(2, 8_000, 9_000, "b", "")];

        let window = AudioWindow::around(&items, 5.0, 12.0).unwrap();

        assert_eq!(window, AudioWindow { start: 0.0, end: 12.0 });
        assert!(AudioWindow::around(&[], 5.0, 12.0).is_none());
    }

    #[test]
    fn test_restoreAbsolute_shouldNotDoubleOffset() {
        let window = AudioWindow { start: 100.0, end: 130.0 };

        let mut relative = vec![SubtitleItem::new(1, 2_000, 3_000, "a", "")];
        window.restore_absolute(&mut relative, 102_000);
        assert_eq!(relative[0].start_ms, 102_000);

        let mut absolute = vec![SubtitleItem::new(1, 102_000, 103_000, "a", "")];
        window.restore_absolute(&mut absolute, 102_000);
        assert_eq!(absolute[0].start_ms, 102_000);
    }
}
