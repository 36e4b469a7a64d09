use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::workflow::{AnalysisRequest, WorkflowState};

/// Sending half of the analysis queue. Requests are processed by
/// [`run_queue_processor`].
#[derive(Clone)]
pub struct AnalysisQueue {
    sender: UnboundedSender<AnalysisRequest>,
}

impl AnalysisQueue {
    pub fn channel() -> (Self, UnboundedReceiver<AnalysisRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, request: AnalysisRequest) -> Result<()> {
        tracing::info!(
            tenant_id = %request.tenant_id,
            ticket_id = %request.ticket_id,
            assignee = %request.assignee_id,
            "Enqueuing ticket analysis"
        );
        self.sender
            .send(request)
            .map_err(|e| AppError::Internal(format!("analysis queue closed, dropped {}", e.0.ticket_id)))
    }
}

/// Latest analysis per ticket plus the tickets currently being analysed.
///
/// A ticket can have overlapping runs (created, then reassigned before the
/// first run ends), so in-flight runs are counted per ticket.
#[derive(Default)]
pub struct ResultStore {
    results: RwLock<HashMap<String, WorkflowState>>,
    in_flight: RwLock<HashMap<String, usize>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin(&self, ticket_id: &str) {
        *self
            .in_flight
            .write()
            .await
            .entry(ticket_id.to_string())
            .or_insert(0) += 1;
    }

    /// Record a finished run. The stored result is only replaced by a run
    /// that started at or after it.
    pub async fn finish(&self, state: WorkflowState) {
        {
            let mut in_flight = self.in_flight.write().await;
            if let Some(count) = in_flight.get_mut(&state.ticket_id) {
                *count -= 1;
                if *count == 0 {
                    in_flight.remove(&state.ticket_id);
                }
            }
        }

        let mut results = self.results.write().await;
        match results.get(&state.ticket_id) {
            Some(stored) if stored.started_at > state.started_at => {
                tracing::debug!(
                    ticket_id = %state.ticket_id,
                    "Discarding result of an older overlapping run"
                );
            }
            _ => {
                results.insert(state.ticket_id.clone(), state);
            }
        }
    }

    pub async fn get(&self, ticket_id: &str) -> Option<WorkflowState> {
        self.results.read().await.get(ticket_id).cloned()
    }

    pub async fn in_flight(&self) -> Vec<String> {
        let mut tickets: Vec<String> = self.in_flight.read().await.keys().cloned().collect();
        tickets.sort();
        tickets
    }
}

/// Run the background queue processor until every sender is dropped.
///
/// Each request runs as its own task; runs share no state besides the
/// result store.
pub async fn run_queue_processor(
    state: Arc<AppState>,
    mut receiver: UnboundedReceiver<AnalysisRequest>,
) {
    tracing::info!("Queue processor started");

    while let Some(request) = receiver.recv().await {
        state.results.begin(&request.ticket_id).await;

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let ticket_id = request.ticket_id.clone();
            let tenant_id = request.tenant_id.clone();

            let result = state.workflow.run_analysis(request).await;

            tracing::info!(
                tenant_id = %tenant_id,
                ticket_id = %ticket_id,
                status = ?result.workflow_status,
                confidence = result.confidence_score,
                notified = result.notification_sent,
                "Analysis task completed"
            );
            state.results.finish(result).await;
        });
    }

    tracing::info!("Queue processor stopped");
}
