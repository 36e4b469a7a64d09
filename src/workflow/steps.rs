//! The nine steps of the ticket analysis graph.
//!
//! Each step calls one service and writes only its own fields. Only the
//! classifier treats a failure as critical (it sets `error_message`, which
//! routes the run to the error handler); every other step degrades to an
//! empty or default value.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::analysis::{
    AnalysisNotification, AnalysisResults, Classifier, CodeScanner, ConfidenceScorer,
    DocRetriever, FixContext, FixGenerator, Notifier, RepoMapper, ScoreInputs, SimilaritySearch,
};
use crate::error::{AppError, Result};
use crate::workflow::state::{Field, FieldWrite, StateUpdate, WorkflowState, WorkflowStatus};
use crate::workflow::step::{Step, StepName};

pub struct ClassifierStep {
    classifier: Arc<dyn Classifier>,
}

impl ClassifierStep {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Step for ClassifierStep {
    fn name(&self) -> StepName {
        StepName::Classifier
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::Classification, Field::ErrorMessage]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let classification = self
            .classifier
            .classify(&state.ticket_data, &state.tenant_id)
            .await?;

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            is_bug = classification.is_bug(),
            confidence = classification.confidence(),
            "Ticket classified"
        );

        Ok(StateUpdate::new().with(FieldWrite::Classification(Some(classification))))
    }

    fn fallback(&self, state: &WorkflowState, err: &AppError) -> StateUpdate {
        error!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            error = %err,
            "Ticket classification failed"
        );
        StateUpdate::new()
            .with(FieldWrite::Classification(None))
            .with(FieldWrite::ErrorMessage(format!("Classification failed: {err}")))
    }
}

pub struct SimilaritySearchStep {
    search: Arc<dyn SimilaritySearch>,
    limit: usize,
}

impl SimilaritySearchStep {
    pub fn new(search: Arc<dyn SimilaritySearch>, limit: usize) -> Self {
        Self { search, limit }
    }
}

#[async_trait]
impl Step for SimilaritySearchStep {
    fn name(&self) -> StepName {
        StepName::SimilaritySearch
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::SimilarTickets]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let similar = self
            .search
            .find_similar(&state.ticket_data, &state.tenant_id, self.limit)
            .await?;

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            count = similar.len(),
            "Similar tickets found"
        );

        Ok(StateUpdate::new().with(FieldWrite::SimilarTickets(similar)))
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        StateUpdate::new().with(FieldWrite::SimilarTickets(Vec::new()))
    }
}

pub struct DocRetrievalStep {
    docs: Arc<dyn DocRetriever>,
    limit: usize,
}

impl DocRetrievalStep {
    pub fn new(docs: Arc<dyn DocRetriever>, limit: usize) -> Self {
        Self { docs, limit }
    }
}

#[async_trait]
impl Step for DocRetrievalStep {
    fn name(&self) -> StepName {
        StepName::DocRetrieval
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::RelevantDocs]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let docs = self
            .docs
            .find_docs(&state.ticket_data, &state.tenant_id, self.limit)
            .await?;

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            count = docs.len(),
            "Documentation retrieved"
        );

        Ok(StateUpdate::new().with(FieldWrite::RelevantDocs(docs)))
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        StateUpdate::new().with(FieldWrite::RelevantDocs(Vec::new()))
    }
}

pub struct RepoMapperStep {
    repos: Arc<dyn RepoMapper>,
}

impl RepoMapperStep {
    pub fn new(repos: Arc<dyn RepoMapper>) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl Step for RepoMapperStep {
    fn name(&self) -> StepName {
        StepName::RepoMapper
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::RepositoryInfo]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let repo = self
            .repos
            .find_repo(&state.ticket_data, &state.tenant_id)
            .await?;

        match &repo {
            Some(info) => info!(
                tenant_id = %state.tenant_id,
                ticket_id = %state.ticket_id,
                repository = ?info.get("name"),
                provider = ?info.get("provider"),
                "Repository mapped"
            ),
            None => warn!(
                tenant_id = %state.tenant_id,
                ticket_id = %state.ticket_id,
                "No repository mapping found"
            ),
        }

        Ok(StateUpdate::new().with(FieldWrite::RepositoryInfo(repo)))
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        StateUpdate::new().with(FieldWrite::RepositoryInfo(None))
    }
}

pub struct CodeScannerStep {
    scanner: Arc<dyn CodeScanner>,
}

impl CodeScannerStep {
    pub fn new(scanner: Arc<dyn CodeScanner>) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Step for CodeScannerStep {
    fn name(&self) -> StepName {
        StepName::CodeScanner
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::CodeAnalysis]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let Some(repository) = state.repository_info.as_ref() else {
            info!(
                tenant_id = %state.tenant_id,
                ticket_id = %state.ticket_id,
                "Skipping code scan, no repository mapped"
            );
            return Ok(StateUpdate::new().with(FieldWrite::CodeAnalysis(None)));
        };

        let analysis = self
            .scanner
            .analyze(&state.ticket_data, repository, &state.tenant_id)
            .await?;

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            files_analyzed = analysis
                .as_ref()
                .and_then(|a| a.get("files_analyzed"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0),
            "Code analysis completed"
        );

        Ok(StateUpdate::new().with(FieldWrite::CodeAnalysis(analysis)))
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        StateUpdate::new().with(FieldWrite::CodeAnalysis(None))
    }
}

pub struct FixGeneratorStep {
    generator: Arc<dyn FixGenerator>,
}

impl FixGeneratorStep {
    pub fn new(generator: Arc<dyn FixGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Step for FixGeneratorStep {
    fn name(&self) -> StepName {
        StepName::FixGenerator
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::SuggestedFix]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let fix = self
            .generator
            .generate_fix(FixContext {
                ticket: &state.ticket_data,
                similar_tickets: &state.similar_tickets,
                code_analysis: state.code_analysis.as_ref(),
                docs: &state.relevant_docs,
                tenant_id: &state.tenant_id,
            })
            .await?;

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            has_suggestion = fix.is_some(),
            "Fix suggestion generated"
        );

        Ok(StateUpdate::new().with(FieldWrite::SuggestedFix(fix)))
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        StateUpdate::new().with(FieldWrite::SuggestedFix(None))
    }
}

pub struct ConfidenceScorerStep {
    scorer: Arc<dyn ConfidenceScorer>,
}

impl ConfidenceScorerStep {
    pub fn new(scorer: Arc<dyn ConfidenceScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Step for ConfidenceScorerStep {
    fn name(&self) -> StepName {
        StepName::ConfidenceScorer
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::ConfidenceScore]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        let confidence = self.scorer.score(ScoreInputs {
            classification: state.classification.as_ref(),
            similar_tickets: &state.similar_tickets,
            code_analysis: state.code_analysis.as_ref(),
            docs: &state.relevant_docs,
            fix: state.suggested_fix.as_deref(),
        })?;

        if !confidence.is_finite() {
            return Err(AppError::Collaborator(format!(
                "scorer returned non-finite confidence {confidence}"
            )));
        }

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            confidence,
            "Confidence calculated"
        );

        Ok(StateUpdate::new().with(FieldWrite::ConfidenceScore(confidence)))
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        StateUpdate::new().with(FieldWrite::ConfidenceScore(0.0))
    }
}

/// Terminal step on the success path. Always completes the run; a
/// notification that is skipped or fails only leaves `notification_sent` false.
pub struct NotifierStep {
    notifier: Arc<dyn Notifier>,
    min_confidence: f64,
}

impl NotifierStep {
    pub fn new(notifier: Arc<dyn Notifier>, min_confidence: f64) -> Self {
        Self {
            notifier,
            min_confidence,
        }
    }

    fn completed(sent: bool, message_id: Option<String>) -> StateUpdate {
        StateUpdate::new()
            .with(FieldWrite::NotificationSent(sent))
            .with(FieldWrite::MessageId(message_id))
            .with(FieldWrite::Status(WorkflowStatus::Completed))
            .with(FieldWrite::CompletedAt(Utc::now()))
    }
}

#[async_trait]
impl Step for NotifierStep {
    fn name(&self) -> StepName {
        StepName::Notifier
    }

    fn writes(&self) -> &'static [Field] {
        &[
            Field::NotificationSent,
            Field::MessageId,
            Field::WorkflowStatus,
            Field::CompletedAt,
        ]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        if state.confidence_score < self.min_confidence {
            info!(
                tenant_id = %state.tenant_id,
                ticket_id = %state.ticket_id,
                confidence = state.confidence_score,
                threshold = self.min_confidence,
                "Skipping notification, confidence too low"
            );
            return Ok(Self::completed(false, None));
        }

        let notification = AnalysisNotification {
            assignee_id: &state.assignee_id,
            tenant_id: &state.tenant_id,
            ticket: &state.ticket_data,
            analysis: AnalysisResults {
                similar_tickets: &state.similar_tickets,
                relevant_docs: &state.relevant_docs,
                code_analysis: state.code_analysis.as_ref(),
                suggested_fix: state.suggested_fix.as_deref(),
                confidence_score: state.confidence_score,
            },
        };
        let message_id = self.notifier.notify(&notification).await?;

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            message_id = %message_id,
            confidence = state.confidence_score,
            "Notification sent"
        );

        Ok(Self::completed(true, Some(message_id)))
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        Self::completed(false, None)
    }
}

/// Terminal step on the failure path.
pub struct ErrorHandlerStep;

impl ErrorHandlerStep {
    fn failed() -> StateUpdate {
        StateUpdate::new()
            .with(FieldWrite::Status(WorkflowStatus::Failed))
            .with(FieldWrite::CompletedAt(Utc::now()))
    }
}

#[async_trait]
impl Step for ErrorHandlerStep {
    fn name(&self) -> StepName {
        StepName::ErrorHandler
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::WorkflowStatus, Field::CompletedAt]
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate> {
        error!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            ticket_key = state.ticket_key().unwrap_or(state.ticket_id.as_str()),
            error = state.error_message.as_deref().unwrap_or("unknown"),
            "Workflow failed at error handler"
        );

        // The assignee is not notified about failed runs.
        Ok(Self::failed())
    }

    fn fallback(&self, _state: &WorkflowState, _err: &AppError) -> StateUpdate {
        Self::failed()
    }
}
