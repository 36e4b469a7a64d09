//! The ticket analysis graph.
//!
//! ```text
//! classifier --continue--> {similarity_search, doc_retrieval, repo_mapper}
//!            --skip------> confidence_scorer
//!            --error-----> error_handler --> END
//! fan-out join --> code_scanner --> fix_generator --> confidence_scorer
//! confidence_scorer --> notifier --> END
//! ```

use std::sync::Arc;

use crate::analysis::Collaborators;
use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::workflow::graph::{Graph, RouteDecision, Target};
use crate::workflow::state::WorkflowState;
use crate::workflow::step::StepName;
use crate::workflow::steps::{
    ClassifierStep, CodeScannerStep, ConfidenceScorerStep, DocRetrievalStep, ErrorHandlerStep,
    FixGeneratorStep, NotifierStep, RepoMapperStep, SimilaritySearchStep,
};

/// Classification confidence a bug needs before the full analysis runs.
pub const CONTINUE_CONFIDENCE: f64 = 0.5;

/// Decide where to go after the classifier.
pub fn route_after_classification(state: &WorkflowState) -> RouteDecision {
    if state.error_message.is_some() {
        return RouteDecision::Error;
    }

    match &state.classification {
        None => RouteDecision::Skip,
        Some(c) if c.is_bug() && c.confidence() > CONTINUE_CONFIDENCE => RouteDecision::Continue,
        Some(_) => RouteDecision::Skip,
    }
}

pub fn build_graph(collaborators: &Collaborators, config: &WorkflowConfig) -> Result<Graph> {
    let c = collaborators;

    Graph::builder(StepName::Classifier)
        .step(Arc::new(ClassifierStep::new(c.classifier.clone())))
        .step(Arc::new(SimilaritySearchStep::new(
            c.similarity.clone(),
            config.similar_tickets_limit,
        )))
        .step(Arc::new(DocRetrievalStep::new(c.docs.clone(), config.docs_limit)))
        .step(Arc::new(RepoMapperStep::new(c.repos.clone())))
        .step(Arc::new(CodeScannerStep::new(c.code.clone())))
        .step(Arc::new(FixGeneratorStep::new(c.fixes.clone())))
        .step(Arc::new(ConfidenceScorerStep::new(c.scorer.clone())))
        .step(Arc::new(NotifierStep::new(
            c.notifier.clone(),
            config.min_confidence,
        )))
        .step(Arc::new(ErrorHandlerStep))
        .conditional(
            StepName::Classifier,
            route_after_classification,
            [
                (RouteDecision::Continue, Target::FanOut),
                (RouteDecision::Skip, Target::Step(StepName::ConfidenceScorer)),
                (RouteDecision::Error, Target::Step(StepName::ErrorHandler)),
            ],
        )
        .fan_out(
            vec![
                StepName::SimilaritySearch,
                StepName::DocRetrieval,
                StepName::RepoMapper,
            ],
            Target::Step(StepName::CodeScanner),
        )
        .edge(StepName::CodeScanner, Target::Step(StepName::FixGenerator))
        .edge(StepName::FixGenerator, Target::Step(StepName::ConfidenceScorer))
        .edge(StepName::ConfidenceScorer, Target::Step(StepName::Notifier))
        .edge(StepName::Notifier, Target::End)
        .edge(StepName::ErrorHandler, Target::End)
        .step_timeout(config.step_timeout())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::workflow::state::{AnalysisRequest, Classification, JsonMap};
    use crate::workflow::testing::ScriptedServices;

    fn state_with(classification: Option<Classification>) -> WorkflowState {
        let request = AnalysisRequest::new("acme", "10001", JsonMap::new(), "u-1").unwrap();
        let mut state = WorkflowState::new(request);
        state.classification = classification;
        state
    }

    #[test]
    fn test_route_continue_for_confident_bug() {
        let state = state_with(Some(json!({"is_bug": true, "confidence": 0.9}).into()));
        assert_eq!(route_after_classification(&state), RouteDecision::Continue);
    }

    #[test]
    fn test_route_skip_at_boundary_confidence() {
        let state = state_with(Some(json!({"is_bug": true, "confidence": 0.5}).into()));
        assert_eq!(route_after_classification(&state), RouteDecision::Skip);
    }

    #[test]
    fn test_route_skip_for_non_bug() {
        let state = state_with(Some(json!({"is_bug": false, "confidence": 0.95}).into()));
        assert_eq!(route_after_classification(&state), RouteDecision::Skip);
    }

    #[test]
    fn test_route_skip_without_classification() {
        assert_eq!(route_after_classification(&state_with(None)), RouteDecision::Skip);
    }

    #[test]
    fn test_route_error_wins_over_classification() {
        let mut state = state_with(Some(json!({"is_bug": true, "confidence": 0.9}).into()));
        state.error_message = Some("Classification failed: boom".to_string());
        assert_eq!(route_after_classification(&state), RouteDecision::Error);
    }

    #[test]
    fn test_pipeline_graph_is_valid() {
        let services = ScriptedServices::new();
        let graph = build_graph(&services.collaborators(), &WorkflowConfig::default()).unwrap();

        assert_eq!(graph.entry(), StepName::Classifier);
        let group = graph.fan_out().unwrap();
        assert_eq!(group.members.len(), 3);
        assert_eq!(group.join, Target::Step(StepName::CodeScanner));
    }
}
