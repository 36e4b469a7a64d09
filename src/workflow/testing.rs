//! Scripted collaborators for exercising the workflow without external systems.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Barrier;

use crate::analysis::{
    AnalysisNotification, Classifier, CodeScanner, Collaborators, ConfidenceScorer, DocRetriever,
    FixContext, FixGenerator, Notifier, RepoMapper, ScoreInputs, SimilaritySearch,
};
use crate::audit::{AuditEvent, AuditSink, MemoryAuditSink};
use crate::error::{AppError, Result};
use crate::workflow::state::{Classification, JsonMap};

/// How a scripted collaborator answers.
#[derive(Clone)]
pub(crate) enum Reply<T> {
    Value(T),
    Fail(&'static str),
    Panic(&'static str),
    Hang,
}

/// One scripted implementation of every collaborator trait.
///
/// Defaults describe a confident bug with a mapped repository that scores
/// 0.8 and notifies successfully. Clones share the call log and audit sink.
#[derive(Clone)]
pub(crate) struct ScriptedServices {
    classification: Reply<Classification>,
    similar: Reply<Vec<Value>>,
    docs: Reply<Vec<Value>>,
    repo: Reply<Option<JsonMap>>,
    code: Reply<Option<JsonMap>>,
    fix: Reply<Option<String>>,
    score: Reply<f64>,
    notify: Reply<String>,
    fan_out_barrier: Option<Arc<Barrier>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    audit: Arc<MemoryAuditSink>,
}

fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

impl ScriptedServices {
    pub fn new() -> Self {
        Self {
            classification: Reply::Value(
                json!({"is_bug": true, "severity": "high", "confidence": 0.9}).into(),
            ),
            similar: Reply::Value(vec![
                json!({"key": "BUG-100", "similarity": 0.91}),
                json!({"key": "BUG-87", "similarity": 0.78}),
            ]),
            docs: Reply::Value(vec![json!({"title": "Saving documents", "score": 0.7})]),
            repo: Reply::Value(Some(object(
                json!({"name": "acme/api", "provider": "github", "branch": "main"}),
            ))),
            code: Reply::Value(Some(object(
                json!({"files_analyzed": 3, "suspects": ["src/save.rs"]}),
            ))),
            fix: Reply::Value(Some("Add a null check".to_string())),
            score: Reply::Value(0.8),
            notify: Reply::Value("msg-1".to_string()),
            fan_out_barrier: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            audit: Arc::new(MemoryAuditSink::new()),
        }
    }

    pub fn classify(mut self, reply: Reply<Classification>) -> Self {
        self.classification = reply;
        self
    }

    pub fn similar(mut self, reply: Reply<Vec<Value>>) -> Self {
        self.similar = reply;
        self
    }

    pub fn docs(mut self, reply: Reply<Vec<Value>>) -> Self {
        self.docs = reply;
        self
    }

    pub fn repo(mut self, reply: Reply<Option<JsonMap>>) -> Self {
        self.repo = reply;
        self
    }

    pub fn score(mut self, reply: Reply<f64>) -> Self {
        self.score = reply;
        self
    }

    pub fn notify(mut self, reply: Reply<String>) -> Self {
        self.notify = reply;
        self
    }

    /// Make the three fan-out lookups wait for each other before answering.
    pub fn with_fan_out_barrier(mut self) -> Self {
        self.fan_out_barrier = Some(Arc::new(Barrier::new(3)));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        let shared = Arc::new(self.clone());
        Collaborators {
            classifier: shared.clone(),
            similarity: shared.clone(),
            docs: shared.clone(),
            repos: shared.clone(),
            code: shared.clone(),
            fixes: shared.clone(),
            scorer: shared,
            notifier: Arc::new(self.clone()),
            audit: self.audit.clone(),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_called(&self, call: &str) -> bool {
        self.calls().contains(&call)
    }

    pub fn audit(&self) -> Arc<MemoryAuditSink> {
        self.audit.clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    async fn fan_out_rendezvous(&self) {
        if let Some(barrier) = &self.fan_out_barrier {
            barrier.wait().await;
        }
    }

    async fn answer<T: Clone>(&self, call: &'static str, reply: &Reply<T>) -> Result<T> {
        self.record(call);
        match reply {
            Reply::Value(value) => Ok(value.clone()),
            Reply::Fail(message) => Err(AppError::Collaborator(message.to_string())),
            Reply::Panic(message) => panic!("{message}"),
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Classifier for ScriptedServices {
    async fn classify(&self, _ticket: &JsonMap, _tenant_id: &str) -> Result<Classification> {
        self.answer("classify", &self.classification).await
    }
}

#[async_trait]
impl SimilaritySearch for ScriptedServices {
    async fn find_similar(&self, _: &JsonMap, _: &str, limit: usize) -> Result<Vec<Value>> {
        self.fan_out_rendezvous().await;
        let mut similar = self.answer("find_similar", &self.similar).await?;
        similar.truncate(limit);
        Ok(similar)
    }
}

#[async_trait]
impl DocRetriever for ScriptedServices {
    async fn find_docs(&self, _: &JsonMap, _: &str, limit: usize) -> Result<Vec<Value>> {
        self.fan_out_rendezvous().await;
        let mut docs = self.answer("find_docs", &self.docs).await?;
        docs.truncate(limit);
        Ok(docs)
    }
}

#[async_trait]
impl RepoMapper for ScriptedServices {
    async fn find_repo(&self, _: &JsonMap, _: &str) -> Result<Option<JsonMap>> {
        self.fan_out_rendezvous().await;
        self.answer("find_repo", &self.repo).await
    }
}

#[async_trait]
impl CodeScanner for ScriptedServices {
    async fn analyze(&self, _: &JsonMap, _: &JsonMap, _: &str) -> Result<Option<JsonMap>> {
        self.answer("analyze", &self.code).await
    }
}

#[async_trait]
impl FixGenerator for ScriptedServices {
    async fn generate_fix(&self, _: FixContext<'_>) -> Result<Option<String>> {
        self.answer("generate_fix", &self.fix).await
    }
}

impl ConfidenceScorer for ScriptedServices {
    fn score(&self, _: ScoreInputs<'_>) -> Result<f64> {
        self.record("score");
        match &self.score {
            Reply::Value(score) => Ok(*score),
            Reply::Fail(message) => Err(AppError::Collaborator(message.to_string())),
            Reply::Panic(message) => panic!("{message}"),
            Reply::Hang => Err(AppError::Collaborator("scorer cannot hang".to_string())),
        }
    }
}

#[async_trait]
impl Notifier for ScriptedServices {
    async fn notify(&self, _: &AnalysisNotification<'_>) -> Result<String> {
        self.answer("notify", &self.notify).await
    }
}

/// Audit sink that rejects every event.
pub(crate) struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _event: AuditEvent) -> Result<()> {
        Err(AppError::Audit("audit store unavailable".to_string()))
    }
}
