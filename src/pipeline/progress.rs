/*!
 * Progress reporting and advisory cancellation for pipeline runs.
 */

use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::PipelineError;

/// Stage of a chunk worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStage {
    Transcribing,
    WaitingGlossary,
    Refining,
    Translating,
    Done,
    Error,
}

impl fmt::Display for ChunkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkStage::Transcribing => "transcribing",
            ChunkStage::WaitingGlossary => "waiting_glossary",
            ChunkStage::Refining => "refining",
            ChunkStage::Translating => "translating",
            ChunkStage::Done => "done",
            ChunkStage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Coarse status of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    Processing,
    Completed,
    Error,
}

/// Status update for one chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkStatus {
    /// Chunk index (0-based)
    pub id: usize,
    /// Number of chunks in the job
    pub total: usize,
    pub status: ProgressState,
    pub stage: ChunkStage,
    pub message: String,
}

impl ChunkStatus {
    pub fn new(id: usize, total: usize, stage: ChunkStage, message: impl Into<String>) -> Self {
        let status = match stage {
            ChunkStage::Done => ProgressState::Completed,
            ChunkStage::Error => ProgressState::Error,
            _ => ProgressState::Processing,
        };
        Self { id, total, status, stage, message: message.into() }
    }
}

/// Unit that degraded to a fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedScope {
    /// Glossary extraction for one sample chunk
    GlossaryChunk,
    /// Refinement fell back to the raw transcript
    Refinement,
    /// A translation sub-batch echoed its source text
    TranslationBatch,
    /// A batch-edit group kept its original lines
    BatchGroup,
    /// The semantic consistency pass of a review was skipped
    ConsistencyReview,
}

/// Non-blocking notice about a degraded unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedNotice {
    pub scope: DegradedScope,
    /// Human-readable unit label, e.g. `chunk 3 batch 2`
    pub unit: String,
    pub message: String,
}

impl DegradedNotice {
    pub fn new(scope: DegradedScope, unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self { scope, unit: unit.into(), message: message.into() }
    }
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    /// A chunk changed stage
    fn on_status(&self, _status: &ChunkStatus) {}

    /// A unit degraded to a fallback
    fn on_degraded(&self, _notice: &DegradedNotice) {}
}

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_status(&self, status: &ChunkStatus) {
        debug!("[chunk {}/{}] {}: {}", status.id + 1, status.total, status.stage, status.message);
    }

    fn on_degraded(&self, notice: &DegradedNotice) {
        warn!("Degraded {:?} ({}): {}", notice.scope, notice.unit, notice.message);
    }
}

/// Sink that keeps every event, for callers that render progress later
#[derive(Debug, Default)]
pub struct ProgressRecorder {
    statuses: Mutex<Vec<ChunkStatus>>,
    notices: Mutex<Vec<DegradedNotice>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<ChunkStatus> {
        self.statuses.lock().clone()
    }

    pub fn notices(&self) -> Vec<DegradedNotice> {
        self.notices.lock().clone()
    }

    /// Stages reported for one chunk, in order
    pub fn stages_for(&self, chunk: usize) -> Vec<ChunkStage> {
        self.statuses.lock().iter().filter(|s| s.id == chunk).map(|s| s.stage).collect()
    }
}

impl ProgressSink for ProgressRecorder {
    fn on_status(&self, status: &ChunkStatus) {
        self.statuses.lock().push(status.clone());
    }

    fn on_degraded(&self, notice: &DegradedNotice) {
        self.notices.lock().push(notice.clone());
    }
}

/// Shared handle to a progress sink
pub type SharedProgress = Arc<dyn ProgressSink>;

/// Advisory cancellation, observed at stage boundaries only
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `PipelineError::Cancelled` once cancellation was requested
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() { Err(PipelineError::Cancelled) } else { Ok(()) }
    }
}
