/*!
 * # subloom
 *
 * Bilingual subtitle generation over unreliable generative-AI calls.
 *
 * ## Features
 *
 * - Chunked, concurrency-bounded transcription, refinement and translation
 * - Tolerant repair of malformed or truncated model JSON and timestamps
 * - A glossary extracted once and shared by every chunk worker
 * - Batch edits (fix timestamps, retranslate, proofread) over selected slices
 * - An iterate-until-accept Review -> Fix -> Validate quality-control loop
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `subtitle`: The subtitle record and list edit helpers
 * - `timestamp_utils`: Timestamp parsing, normalization and timing sanity
 * - `pipeline`: Generation pipeline:
 *   - `pipeline::orchestrator`: Media file in, ordered subtitles out
 *   - `pipeline::chunk_worker`: Per-chunk transcribe/refine/translate
 *   - `pipeline::response`: JSON extraction and continuation on truncation
 *   - `pipeline::concurrency`: Ordered bounded fan-out
 * - `glossary`: Terminology extraction and the shared glossary state
 * - `batch`: Post-hoc batch edits
 * - `quality`: Quality-control engine and stages
 * - `providers`: Collaborator traits (model, transcriber, media) and mocks
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod batch;
pub mod errors;
pub mod glossary;
pub mod language_utils;
pub mod pipeline;
pub mod providers;
pub mod quality;
pub mod subtitle;
pub mod timestamp_utils;

// Re-export main types for easier usage
pub use app_config::Config;
pub use batch::{BatchExecutor, BatchMode, BatchRequest};
pub use errors::{AppError, PipelineError, ProviderError};
pub use glossary::{GlossaryItem, GlossaryState};
pub use language_utils::{get_language_name, language_codes_match};
pub use pipeline::GenerationOrchestrator;
pub use quality::QualityControlRunner;
pub use subtitle::SubtitleItem;
