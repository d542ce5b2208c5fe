/*!
 * Generation pipeline.
 *
 * Leaf utilities first:
 * - `retry`: error-class aware exponential backoff
 * - `concurrency`: bounded, order-preserving fan-out
 * - `response`: tolerant JSON extraction with truncation continuation
 * - `prompts`: system prompts and JSON payloads
 * - `segmentation`: fixed and silence-aware chunk planning
 * - `postprocess`: filler stripping and segment limits
 * - `progress`: status events, degraded notices, cancellation
 * - `window`: padded audio context and relative/absolute timestamp mapping
 *
 * Then the drivers:
 * - `chunk_worker`: transcribe -> glossary -> refine -> translate for one chunk
 * - `orchestrator`: the whole job
 */

pub mod chunk_worker;
pub mod concurrency;
pub mod orchestrator;
pub mod postprocess;
pub mod progress;
pub mod prompts;
pub mod response;
pub mod retry;
pub mod segmentation;
pub mod window;

pub use chunk_worker::{ChunkContext, ChunkSettings};
pub use concurrency::{ModelTier, TierLimits, map_in_order, try_map_in_order};
pub use orchestrator::GenerationOrchestrator;
pub use progress::{
    CancellationFlag, ChunkStage, ChunkStatus, DegradedNotice, DegradedScope, LogProgress, ProgressRecorder, ProgressSink,
    SharedProgress,
};
pub use retry::{RetryPolicy, with_retry};
pub use segmentation::{Chunk, plan_chunks, plan_fixed_chunks};
pub use window::AudioWindow;
