use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::workflow::state::{Field, StateUpdate, WorkflowState};

/// Names of the steps in the ticket analysis graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Classifier,
    SimilaritySearch,
    DocRetrieval,
    RepoMapper,
    CodeScanner,
    FixGenerator,
    ConfidenceScorer,
    Notifier,
    ErrorHandler,
}

impl StepName {
    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Classifier => "classifier",
            StepName::SimilaritySearch => "similarity_search",
            StepName::DocRetrieval => "doc_retrieval",
            StepName::RepoMapper => "repo_mapper",
            StepName::CodeScanner => "code_scanner",
            StepName::FixGenerator => "fix_generator",
            StepName::ConfidenceScorer => "confidence_scorer",
            StepName::Notifier => "notifier",
            StepName::ErrorHandler => "error_handler",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in the graph.
///
/// `run` reads the state and returns the writes it wants applied. It may fail;
/// the [`StepRunner`] wrapping every step turns a failure into `fallback`, so
/// the executor only ever sees a `StateUpdate`.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> StepName;

    /// Fields this step is allowed to write.
    fn writes(&self) -> &'static [Field];

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate>;

    /// Writes applied when `run` fails, panics or times out.
    fn fallback(&self, state: &WorkflowState, error: &AppError) -> StateUpdate;
}

/// Executes a step without letting errors, panics or timeouts escape.
#[derive(Clone)]
pub struct StepRunner {
    step: Arc<dyn Step>,
    timeout: Option<Duration>,
}

impl StepRunner {
    pub fn new(step: Arc<dyn Step>, timeout: Option<Duration>) -> Self {
        Self { step, timeout }
    }

    pub fn name(&self) -> StepName {
        self.step.name()
    }

    pub fn writes(&self) -> &'static [Field] {
        self.step.writes()
    }

    pub async fn run(&self, state: &WorkflowState) -> StateUpdate {
        let name = self.step.name();
        let guarded = AssertUnwindSafe(self.step.run(state)).catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(AppError::Step(format!(
                    "{name} timed out after {}s",
                    limit.as_secs_f64()
                )))),
            },
            None => guarded.await,
        };

        let result = outcome.unwrap_or_else(|panic| {
            Err(AppError::Step(format!(
                "{name} panicked: {}",
                panic_message(panic.as_ref())
            )))
        });

        let update = match result {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(
                    step = %name,
                    tenant_id = %state.tenant_id,
                    ticket_id = %state.ticket_id,
                    error = %e,
                    "Step failed, writing default output"
                );
                self.step.fallback(state, &e)
            }
        };

        debug_assert!(
            update.fields().all(|f| self.step.writes().contains(&f)),
            "{name} wrote a field outside its declared write-set"
        );

        update
    }

    /// Default output for a step whose task never returned.
    pub fn fallback(&self, state: &WorkflowState, error: &AppError) -> StateUpdate {
        self.step.fallback(state, error)
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::{AnalysisRequest, FieldWrite, JsonMap};

    struct Scripted {
        behavior: Behavior,
    }

    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Hang,
        WriteUndeclared,
    }

    #[async_trait]
    impl Step for Scripted {
        fn name(&self) -> StepName {
            StepName::FixGenerator
        }

        fn writes(&self) -> &'static [Field] {
            &[Field::SuggestedFix]
        }

        async fn run(&self, _state: &WorkflowState) -> Result<StateUpdate> {
            match self.behavior {
                Behavior::Succeed => Ok(StateUpdate::new()
                    .with(FieldWrite::SuggestedFix(Some("patch".to_string())))),
                Behavior::Fail => Err(AppError::Collaborator("llm down".to_string())),
                Behavior::Panic => panic!("boom"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(StateUpdate::new())
                }
                Behavior::WriteUndeclared => Ok(StateUpdate::new()
                    .with(FieldWrite::SuggestedFix(Some("patch".to_string())))
                    .with(FieldWrite::ConfidenceScore(0.9))),
            }
        }

        fn fallback(&self, _state: &WorkflowState, _error: &AppError) -> StateUpdate {
            StateUpdate::new().with(FieldWrite::SuggestedFix(None))
        }
    }

    fn state() -> WorkflowState {
        WorkflowState::new(AnalysisRequest::new("t", "BUG-1", JsonMap::new(), "u").unwrap())
    }

    async fn run(behavior: Behavior, timeout: Option<Duration>) -> WorkflowState {
        let runner = StepRunner::new(Arc::new(Scripted { behavior }), timeout);
        let mut state = state();
        state.suggested_fix = Some("stale".to_string());
        let update = runner.run(&state).await;
        state.apply(update);
        state
    }

    #[tokio::test]
    async fn test_success_passes_update_through() {
        let state = run(Behavior::Succeed, None).await;
        assert_eq!(state.suggested_fix.as_deref(), Some("patch"));
    }

    #[tokio::test]
    async fn test_error_writes_fallback() {
        let state = run(Behavior::Fail, None).await;
        assert!(state.suggested_fix.is_none());
    }

    #[tokio::test]
    async fn test_panic_writes_fallback() {
        let state = run(Behavior::Panic, None).await;
        assert!(state.suggested_fix.is_none());
    }

    #[tokio::test]
    async fn test_timeout_writes_fallback() {
        let state = run(Behavior::Hang, Some(Duration::from_millis(20))).await;
        assert!(state.suggested_fix.is_none());
    }

    #[tokio::test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside its declared write-set")]
    async fn test_undeclared_write_is_caught() {
        run(Behavior::WriteUndeclared, None).await;
    }

    #[test]
    fn test_step_names() {
        assert_eq!(StepName::SimilaritySearch.to_string(), "similarity_search");
        assert_eq!(
            serde_json::to_value(StepName::ErrorHandler).unwrap(),
            serde_json::json!("error_handler")
        );
    }
}
