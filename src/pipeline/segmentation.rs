/*!
 * Chunk planning for a decoded media file.
 *
 * Fixed mode cuts every `chunk_duration` seconds. Smart mode moves each
 * interior boundary to the centre of the nearest silence within
 * `SMART_SPLIT_WINDOW_SECS`. Both modes partition `[0, duration)` with no
 * gaps or overlaps and fold a tiny trailing remainder into the previous chunk.
 */

use log::debug;
use serde::Serialize;

use crate::providers::AudioBuffer;
use crate::timestamp_utils::seconds_to_ms;

/// Search radius around a nominal boundary (seconds)
pub const SMART_SPLIT_WINDOW_SECS: f64 = 30.0;

/// Shortest silence usable as a cut point (seconds)
pub const MIN_SILENCE_SECS: f64 = 0.3;

/// RMS energy below which a frame counts as silent
pub const SILENCE_RMS_THRESHOLD: f32 = 0.02;

/// Trailing chunks shorter than this are merged into their predecessor (seconds)
pub const MIN_TAIL_SECS: f64 = 2.0;

const FRAME_SECS: f64 = 0.1;

/// A time range of the source media processed as one pipeline unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Chunk {
    /// Zero-based position in the plan
    pub index: usize,
    /// Start (seconds)
    pub start: f64,
    /// End (seconds, exclusive)
    pub end: f64,
}

impl Chunk {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn start_ms(&self) -> u64 {
        seconds_to_ms(self.start)
    }

    pub fn end_ms(&self) -> u64 {
        seconds_to_ms(self.end)
    }
}

/// A silent region `[start, end)` in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Silence {
    pub start: f64,
    pub end: f64,
}

impl Silence {
    pub fn center(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// Build chunks from sorted interior boundaries
fn chunks_from_boundaries(total: f64, interior: &[f64]) -> Vec<Chunk> {
    let mut edges = Vec::with_capacity(interior.len() + 2);
    edges.push(0.0);
    edges.extend(interior.iter().copied().filter(|b| *b > 0.0 && *b < total));
    edges.push(total);

    if edges.len() > 2 && total - edges[edges.len() - 2] < MIN_TAIL_SECS {
        let tail = edges.len() - 2;
        edges.remove(tail);
    }

    edges
        .windows(2)
        .enumerate()
        .map(|(index, pair)| Chunk { index, start: pair[0], end: pair[1] })
        .collect()
}

fn nominal_boundaries(total: f64, chunk_duration: f64) -> Vec<f64> {
    let mut boundaries = Vec::new();
    if chunk_duration <= 0.0 {
        return boundaries;
    }
    let mut k = 1;
    loop {
        let b = k as f64 * chunk_duration;
        if b >= total {
            break;
        }
        boundaries.push(b);
        k += 1;
    }
    boundaries
}

/// Fixed-length plan
pub fn plan_fixed_chunks(total_duration: f64, chunk_duration: f64) -> Vec<Chunk> {
    if total_duration <= 0.0 {
        return Vec::new();
    }
    chunks_from_boundaries(total_duration, &nominal_boundaries(total_duration, chunk_duration))
}

/// Find silent regions of at least `MIN_SILENCE_SECS`
pub fn find_silences(audio: &AudioBuffer) -> Vec<Silence> {
    let frame_len = ((audio.sample_rate as f64 * FRAME_SECS).round() as usize).max(1);
    let min_frames = (MIN_SILENCE_SECS / FRAME_SECS).ceil() as usize;
    let frame_secs = frame_len as f64 / audio.sample_rate.max(1) as f64;

    let mut silences = Vec::new();
    let mut run_start: Option<usize> = None;
    let frames: Vec<bool> = audio
        .samples
        .chunks(frame_len)
        .map(|frame| {
            let energy: f32 = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
            energy.sqrt() < SILENCE_RMS_THRESHOLD
        })
        .collect();

    for (i, silent) in frames.iter().chain(std::iter::once(&false)).enumerate() {
        match (*silent, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_frames {
                    silences.push(Silence {
                        start: start as f64 * frame_secs,
                        end: (i as f64 * frame_secs).min(audio.duration()),
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }
    silences
}

/// Silence-aware plan; boundaries without nearby silence stay nominal
pub fn plan_smart_chunks(audio: &AudioBuffer, chunk_duration: f64) -> Vec<Chunk> {
    let total = audio.duration();
    if total <= 0.0 {
        return Vec::new();
    }
    let silences = find_silences(audio);
    let mut boundaries: Vec<f64> = Vec::new();

    for nominal in nominal_boundaries(total, chunk_duration) {
        let previous = boundaries.last().copied().unwrap_or(0.0);
        let candidate = silences
            .iter()
            .map(Silence::center)
            .filter(|c| (c - nominal).abs() <= SMART_SPLIT_WINDOW_SECS)
            .filter(|c| *c > previous && *c < total)
            .min_by(|a, b| (a - nominal).abs().total_cmp(&(b - nominal).abs()));

        let chosen = match candidate {
            Some(center) => {
                debug!("Moved chunk boundary {:.2}s to silence at {:.2}s", nominal, center);
                center
            }
            None => nominal,
        };
        if chosen > previous {
            boundaries.push(chosen);
        }
    }

    chunks_from_boundaries(total, &boundaries)
}

/// Plan chunks for a decoded buffer
pub fn plan_chunks(audio: &AudioBuffer, chunk_duration: f64, smart_split: bool) -> Vec<Chunk> {
    if smart_split {
        plan_smart_chunks(audio, chunk_duration)
    } else {
        plan_fixed_chunks(audio.duration(), chunk_duration)
    }
}
