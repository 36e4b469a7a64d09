//! Audit trail for lifecycle and security events.
//!
//! Recording is best effort: callers log a failing sink and carry on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEventType {
    #[serde(rename = "ticket.analyzed")]
    TicketAnalyzed,
    #[serde(rename = "webhook.received")]
    WebhookReceived,
    #[serde(rename = "security.suspicious")]
    SuspiciousActivity,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::TicketAnalyzed => "ticket.analyzed",
            AuditEventType::WebhookReceived => "webhook.received",
            AuditEventType::SuspiciousActivity => "security.suspicious",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub tenant_id: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub action: Option<String>,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, tenant_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            severity: AuditSeverity::default(),
            tenant_id: tenant_id.into(),
            resource_type: None,
            resource_id: None,
            action: None,
            details: Value::Null,
        }
    }

    pub fn resource(mut self, resource_type: &str, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Writes audit events as structured log lines on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            target: "audit",
            event_id = %event.id,
            event_type = event.event_type.as_str(),
            severity = ?event.severity,
            tenant_id = %event.tenant_id,
            resource_type = ?event.resource_type,
            resource_id = ?event.resource_id,
            action = ?event.action,
            details = %event.details,
            "Audit event"
        );
        Ok(())
    }
}

/// Keeps every recorded event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| e.action.clone())
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_collects_events() {
        let sink = MemoryAuditSink::new();
        sink.record(
            AuditEvent::new(AuditEventType::TicketAnalyzed, "acme")
                .resource("ticket", "BUG-1")
                .action("WORKFLOW_START")
                .details(json!({"assignee": "u-1"})),
        )
        .await
        .unwrap();

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, AuditSeverity::Low);
        assert_eq!(events[0].resource_id.as_deref(), Some("BUG-1"));
        assert_eq!(sink.actions().await, vec!["WORKFLOW_START"]);
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(AuditEventType::SuspiciousActivity, "acme")
            .severity(AuditSeverity::High);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "security.suspicious");
        assert_eq!(json["severity"], "HIGH");
    }
}
