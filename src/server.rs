use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::analysis::Collaborators;
use crate::audit::AuditSink;
use crate::config::AppConfig;
use crate::queue::{AnalysisQueue, ResultStore};
use crate::workflow::{TicketAnalysisWorkflow, WorkflowState};

pub struct AppState {
    pub config: AppConfig,
    pub workflow: Arc<TicketAnalysisWorkflow>,
    pub queue: AnalysisQueue,
    pub results: ResultStore,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    pub fn new(config: AppConfig, queue: AnalysisQueue) -> crate::error::Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators, queue)
    }

    pub fn with_collaborators(
        config: AppConfig,
        collaborators: Collaborators,
        queue: AnalysisQueue,
    ) -> crate::error::Result<Self> {
        let audit = Arc::clone(&collaborators.audit);
        let workflow = TicketAnalysisWorkflow::new(collaborators, &config.workflow)?;

        Ok(Self {
            config,
            workflow: Arc::new(workflow),
            queue,
            results: ResultStore::new(),
            audit,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/jira", post(crate::webhook::handler::handle_jira_webhook))
        .route("/health", get(health_check))
        .route("/analyses/:ticket_id", get(get_analysis))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
) -> Result<Json<WorkflowState>, StatusCode> {
    state
        .results
        .get(&ticket_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
