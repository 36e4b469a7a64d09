use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::analysis::Collaborators;
use crate::audit::{AuditEvent, AuditEventType, AuditSeverity, AuditSink};
use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::workflow::executor::Executor;
use crate::workflow::graph::Graph;
use crate::workflow::pipeline::build_graph;
use crate::workflow::state::{AnalysisRequest, WorkflowState};
use crate::workflow::step::panic_message;

/// Entry point for analysing one ticket.
///
/// [`run_analysis`](Self::run_analysis) always returns a state whose
/// `workflow_status` is `completed` or `failed`. Failures are reported only
/// through that status and `error_message`.
pub struct TicketAnalysisWorkflow {
    executor: Executor,
    audit: Arc<dyn AuditSink>,
}

impl TicketAnalysisWorkflow {
    pub fn new(collaborators: Collaborators, config: &WorkflowConfig) -> Result<Self> {
        let graph = build_graph(&collaborators, config)?;
        Ok(Self::from_graph(graph, collaborators.audit, config.max_steps))
    }

    pub fn from_graph(graph: Graph, audit: Arc<dyn AuditSink>, max_steps: usize) -> Self {
        Self {
            executor: Executor::new(graph, max_steps),
            audit,
        }
    }

    /// Validate a raw `{tenant_id, ticket_id, ticket_data, assignee_id}`
    /// object and run it.
    pub async fn analyze_value(&self, input: Value) -> Result<WorkflowState> {
        let request = AnalysisRequest::from_value(input)?;
        Ok(self.run_analysis(request).await)
    }

    pub async fn run_analysis(&self, request: AnalysisRequest) -> WorkflowState {
        let mut state = WorkflowState::new(request);

        info!(
            tenant_id = %state.tenant_id,
            ticket_id = %state.ticket_id,
            ticket_key = state.ticket_key().unwrap_or_default(),
            "Starting ticket analysis workflow"
        );
        self.audit(
            &state,
            "WORKFLOW_START",
            AuditSeverity::Low,
            json!({
                "ticket_key": state.ticket_key(),
                "assignee": state.assignee_id,
            }),
        )
        .await;

        let outcome = AssertUnwindSafe(self.executor.execute(&mut state))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) if !state.is_terminal() => Some(format!(
                "workflow ended after {} without a terminal status",
                state.current_step
            )),
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!(
                "workflow panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        match failure {
            None => {
                state.finalize_timing();
                info!(
                    tenant_id = %state.tenant_id,
                    ticket_id = %state.ticket_id,
                    status = ?state.workflow_status,
                    confidence = state.confidence_score,
                    processing_time = state.processing_time_seconds,
                    "Ticket analysis workflow finished"
                );
                self.audit(
                    &state,
                    "WORKFLOW_COMPLETE",
                    AuditSeverity::Low,
                    json!({
                        "status": state.workflow_status,
                        "confidence_score": state.confidence_score,
                        "processing_time": state.processing_time_seconds,
                        "steps_completed": state.current_step,
                    }),
                )
                .await;
            }
            Some(message) => {
                state.fail(message);
                state.finalize_timing();
                error!(
                    tenant_id = %state.tenant_id,
                    ticket_id = %state.ticket_id,
                    current_step = %state.current_step,
                    error = state.error_message.as_deref().unwrap_or_default(),
                    "Ticket analysis workflow failed"
                );
                self.audit(
                    &state,
                    "WORKFLOW_FAILED",
                    AuditSeverity::High,
                    json!({
                        "error": state.error_message,
                        "current_step": state.current_step,
                    }),
                )
                .await;
            }
        }

        state
    }

    async fn audit(
        &self,
        state: &WorkflowState,
        action: &str,
        severity: AuditSeverity,
        details: Value,
    ) {
        let event = AuditEvent::new(AuditEventType::TicketAnalyzed, state.tenant_id.as_str())
            .resource("ticket", state.ticket_id.as_str())
            .action(action)
            .severity(severity)
            .details(details);

        if let Err(e) = self.audit.record(event).await {
            warn!(
                tenant_id = %state.tenant_id,
                ticket_id = %state.ticket_id,
                action,
                error = %e,
                "Failed to record audit event"
            );
        }
    }
}
