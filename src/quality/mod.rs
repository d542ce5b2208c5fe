/*!
 * Quality control: an iterate-until-accept engine and the
 * Review -> Fix -> Validate stages built on it.
 *
 * - `engine`: generic stage loop with iteration bounds and a between-round hook
 * - `issues`: issue records, validation reports and the carried state
 * - `consistency`: local rule-based checks used by review
 * - `review`, `fix`, `validate`: the concrete stages
 * - `runner`: runs the stages over a range of a subtitle list
 */

pub mod consistency;
pub mod engine;
pub mod fix;
pub mod issues;
pub mod review;
pub mod runner;
pub mod validate;

pub use engine::{
    HookDecision, IterationHook, PipelineConfig, PipelineContext, PipelineResult, PipelineStage, StageTiming,
    TerminationReason, execute_pipeline,
};
pub use issues::{IssueSeverity, QcData, QcState, SubtitleIssue, ValidationReport};
pub use runner::{QcHook, QcOutcome, QualityControlRunner};
