/*!
 * Generic iterate-until-accept pipeline engine.
 *
 * Stages run in a fixed order every iteration, each consuming the previous
 * stage's output. After an iteration, `should_continue` decides whether
 * another round is needed; the iteration limit and an optional hook
 * (continue / accept / cancel) bound the loop. A stage error aborts the run
 * and the last good output is returned.
 */

use async_trait::async_trait;
use log::{debug, error, info};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pipeline::progress::CancellationFlag;
use crate::providers::AudioClip;

/// State owned by one pipeline run
#[derive(Debug)]
pub struct PipelineContext<C> {
    /// Caller-supplied data shared by all stages
    pub data: C,
    /// Audio slice the run works on
    pub audio: Option<AudioClip>,
    /// Current iteration, 1-based
    pub iteration: usize,
    pub max_iterations: usize,
    /// Free-form values stages leave for each other
    pub metadata: HashMap<String, Value>,
}

/// One step of an iteration
#[async_trait]
pub trait PipelineStage<T, C>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, input: T, context: &mut PipelineContext<C>) -> anyhow::Result<T>;
}

/// Decision taken between iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    Continue,
    Accept,
    Cancel,
}

/// Human-in-the-loop checkpoint between iterations
#[async_trait]
pub trait IterationHook<T, C>: Send + Sync {
    async fn after_iteration(&self, output: &T, context: &PipelineContext<C>) -> HookDecision;
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    MaxIterations,
    UserAccepted,
    UserCancelled,
    Error,
}

/// Timing of one stage execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub iteration: usize,
    pub stage: String,
    pub duration: Duration,
    pub success: bool,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct PipelineResult<T> {
    pub output: T,
    pub iterations: usize,
    pub success: bool,
    pub termination_reason: TerminationReason,
    pub history: Vec<StageTiming>,
    /// Stage error that aborted the run
    pub error: Option<String>,
}

/// Predicate deciding whether another iteration is needed
pub type ContinuePredicate<T, C> = Box<dyn Fn(&T, &PipelineContext<C>) -> bool + Send + Sync>;

/// Stages and loop bounds
pub struct PipelineConfig<T, C> {
    pub stages: Vec<Arc<dyn PipelineStage<T, C>>>,
    pub max_iterations: usize,
    pub should_continue: ContinuePredicate<T, C>,
    pub hook: Option<Arc<dyn IterationHook<T, C>>>,
    pub cancel: CancellationFlag,
}

impl<T, C> PipelineConfig<T, C> {
    pub fn new(stages: Vec<Arc<dyn PipelineStage<T, C>>>, max_iterations: usize, should_continue: ContinuePredicate<T, C>) -> Self {
        Self { stages, max_iterations, should_continue, hook: None, cancel: CancellationFlag::new() }
    }

    pub fn with_hook(mut self, hook: Arc<dyn IterationHook<T, C>>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

fn finish<T>(
    output: T,
    iterations: usize,
    reason: TerminationReason,
    history: Vec<StageTiming>,
    error: Option<String>,
) -> PipelineResult<T> {
    let success = matches!(reason, TerminationReason::Completed | TerminationReason::UserAccepted);
    info!("Pipeline finished after {} iterations: {:?}", iterations, reason);
    PipelineResult { output, iterations, success, termination_reason: reason, history, error }
}

/// Run the configured stages until accepted, cancelled, failed or out of iterations
pub async fn execute_pipeline<T, C>(
    config: &PipelineConfig<T, C>,
    input: T,
    context_data: C,
    audio: Option<AudioClip>,
) -> PipelineResult<T>
where
    T: Clone + Send + Sync,
    C: Send + Sync,
{
    let max_iterations = config.max_iterations.max(1);
    let mut context = PipelineContext { data: context_data, audio, iteration: 0, max_iterations, metadata: HashMap::new() };
    let mut current = input;
    let mut history = Vec::new();

    for iteration in 1..=max_iterations {
        context.iteration = iteration;
        debug!("Pipeline iteration {}/{}", iteration, max_iterations);

        for stage in &config.stages {
            if config.cancel.is_cancelled() {
                return finish(current, iteration, TerminationReason::UserCancelled, history, None);
            }

            let started = Instant::now();
            let result = stage.run(current.clone(), &mut context).await;
            history.push(StageTiming {
                iteration,
                stage: stage.name().to_string(),
                duration: started.elapsed(),
                success: result.is_ok(),
            });

            match result {
                Ok(output) => current = output,
                Err(e) => {
                    error!("Stage '{}' failed in iteration {}: {:#}", stage.name(), iteration, e);
                    let message = format!("{}: {:#}", stage.name(), e);
                    return finish(current, iteration, TerminationReason::Error, history, Some(message));
                }
            }
        }

        if !(config.should_continue)(&current, &context) {
            return finish(current, iteration, TerminationReason::Completed, history, None);
        }
        if iteration >= max_iterations {
            return finish(current, iteration, TerminationReason::MaxIterations, history, None);
        }
        if let Some(hook) = &config.hook {
            match hook.after_iteration(&current, &context).await {
                HookDecision::Continue => {}
                HookDecision::Accept => {
                    return finish(current, iteration, TerminationReason::UserAccepted, history, None);
                }
                HookDecision::Cancel => {
                    return finish(current, iteration, TerminationReason::UserCancelled, history, None);
                }
            }
        }
    }

    finish(current, max_iterations, TerminationReason::MaxIterations, history, None)
}
