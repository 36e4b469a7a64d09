use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Analyses scoring below this are completed without notifying anyone.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_similar_tickets_limit")]
    pub similar_tickets_limit: usize,
    #[serde(default = "default_docs_limit")]
    pub docs_limit: usize,
    /// Upper bound for a single step; unset means steps run unbounded.
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

#[derive(Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,
}

// Manual Debug impl to avoid leaking the webhook secret
impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_similar_tickets_limit() -> usize {
    5
}

fn default_docs_limit() -> usize {
    3
}

fn default_max_steps() -> usize {
    32
}

fn default_tenant_id() -> String {
    "default".to_string()
}

fn default_notifier_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            similar_tickets_limit: default_similar_tickets_limit(),
            docs_limit: default_docs_limit(),
            step_timeout_secs: None,
            max_steps: default_max_steps(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            tenant_id: default_tenant_id(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notifier_timeout(),
        }
    }
}

impl WorkflowConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("ticketflow").required(false));
        }

        // Environment variable overrides with TICKETFLOW_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("TICKETFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.workflow.min_confidence;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Config(format!(
                "workflow.min_confidence must be within [0, 1], got {threshold}"
            )));
        }
        if self.workflow.max_steps == 0 {
            return Err(AppError::Config(
                "workflow.max_steps must be at least 1".to_string(),
            ));
        }
        if self.workflow.step_timeout_secs == Some(0) {
            return Err(AppError::Config(
                "workflow.step_timeout_secs must be at least 1, omit it to disable".to_string(),
            ));
        }
        Ok(())
    }

    pub fn webhook_secret(&self) -> &str {
        &self.webhook.secret
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            workflow: WorkflowConfig::default(),
            webhook: WebhookConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}
