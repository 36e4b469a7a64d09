//! Services the pipeline steps call out to.
//!
//! Each step talks to exactly one of these traits. The crate ships simple
//! implementations so the binary runs without external systems; deployments
//! plug in their own search, repository and LLM backends.

pub mod classifier;
pub mod notifier;
pub mod scorer;
pub mod unconfigured;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::AppConfig;
use crate::error::Result;
use crate::workflow::state::{Classification, JsonMap};

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, ticket: &JsonMap, tenant_id: &str) -> Result<Classification>;
}

#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn find_similar(
        &self,
        ticket: &JsonMap,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<Value>>;
}

#[async_trait]
pub trait DocRetriever: Send + Sync {
    async fn find_docs(&self, ticket: &JsonMap, tenant_id: &str, limit: usize)
        -> Result<Vec<Value>>;
}

#[async_trait]
pub trait RepoMapper: Send + Sync {
    async fn find_repo(&self, ticket: &JsonMap, tenant_id: &str) -> Result<Option<JsonMap>>;
}

#[async_trait]
pub trait CodeScanner: Send + Sync {
    async fn analyze(
        &self,
        ticket: &JsonMap,
        repository: &JsonMap,
        tenant_id: &str,
    ) -> Result<Option<JsonMap>>;
}

/// Everything gathered so far that a fix suggestion can draw on.
#[derive(Debug, Clone, Copy)]
pub struct FixContext<'a> {
    pub ticket: &'a JsonMap,
    pub similar_tickets: &'a [Value],
    pub code_analysis: Option<&'a JsonMap>,
    pub docs: &'a [Value],
    pub tenant_id: &'a str,
}

#[async_trait]
pub trait FixGenerator: Send + Sync {
    async fn generate_fix(&self, context: FixContext<'_>) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub classification: Option<&'a Classification>,
    pub similar_tickets: &'a [Value],
    pub code_analysis: Option<&'a JsonMap>,
    pub docs: &'a [Value],
    pub fix: Option<&'a str>,
}

pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, inputs: ScoreInputs<'_>) -> Result<f64>;
}

/// Analysis results included in the assignee notification.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResults<'a> {
    pub similar_tickets: &'a [Value],
    pub relevant_docs: &'a [Value],
    pub code_analysis: Option<&'a JsonMap>,
    pub suggested_fix: Option<&'a str>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisNotification<'a> {
    pub assignee_id: &'a str,
    pub tenant_id: &'a str,
    pub ticket: &'a JsonMap,
    pub analysis: AnalysisResults<'a>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the notification, returning the platform's message id.
    async fn notify(&self, notification: &AnalysisNotification<'_>) -> Result<String>;
}

/// The full set of services one workflow instance is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub similarity: Arc<dyn SimilaritySearch>,
    pub docs: Arc<dyn DocRetriever>,
    pub repos: Arc<dyn RepoMapper>,
    pub code: Arc<dyn CodeScanner>,
    pub fixes: Arc<dyn FixGenerator>,
    pub scorer: Arc<dyn ConfidenceScorer>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
}

impl Collaborators {
    /// Built-in services: keyword classifier, weighted scorer, webhook or log
    /// notifier, and empty search/repository/fix backends.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = match config.notifier.webhook_url.as_deref() {
            Some(url) => Arc::new(notifier::WebhookNotifier::new(
                url,
                Duration::from_secs(config.notifier.timeout_secs),
            )?),
            None => Arc::new(notifier::LogNotifier),
        };
        let unconfigured = Arc::new(unconfigured::Unconfigured);

        Ok(Self {
            classifier: Arc::new(classifier::KeywordClassifier::new()),
            similarity: unconfigured.clone(),
            docs: unconfigured.clone(),
            repos: unconfigured.clone(),
            code: unconfigured.clone(),
            fixes: unconfigured,
            scorer: Arc::new(scorer::WeightedConfidenceScorer::default()),
            notifier,
            audit: Arc::new(TracingAuditSink),
        })
    }
}
