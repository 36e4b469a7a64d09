use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde_json::json;

use crate::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::server::AppState;
use crate::webhook::events::{IssuePayload, JiraEvent, JiraWebhookPayload};
use crate::webhook::signature::verify_signature;

pub async fn handle_jira_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let tenant_id = state.config.webhook.tenant_id.as_str();
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    // Verify signature
    if let Err(e) = verify_signature(state.config.webhook_secret(), &body, signature) {
        tracing::warn!(tenant_id, error = %e, "Jira webhook signature verification failed");
        let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok());
        record(
            &state,
            AuditEvent::new(AuditEventType::SuspiciousActivity, tenant_id)
                .severity(AuditSeverity::High)
                .details(json!({
                    "reason": "invalid_jira_webhook_signature",
                    "error": e.to_string(),
                    "user_agent": user_agent,
                })),
        )
        .await;
        return StatusCode::UNAUTHORIZED;
    }

    // Parse payload
    let payload = match JiraWebhookPayload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(tenant_id, error = %e, "Failed to parse Jira webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(
        tenant_id,
        event_type = %payload.webhook_event,
        issue_key = payload.issue_key().unwrap_or_default(),
        "Received Jira webhook event"
    );

    let mut received = AuditEvent::new(AuditEventType::WebhookReceived, tenant_id)
        .action(&payload.webhook_event)
        .details(json!({
            "issue_key": payload.issue_key(),
            "user": payload.user.as_ref().and_then(|u| u.get("displayName")),
            "timestamp": payload.timestamp,
        }));
    if let Some(key) = payload.issue_key() {
        received = received.resource("jira_issue", key);
    }
    record(&state, received).await;

    match payload.event() {
        JiraEvent::IssueCreated => handle_issue_created(&state, &payload),
        JiraEvent::IssueUpdated => handle_issue_updated(&state, &payload),
        JiraEvent::IssueDeleted
        | JiraEvent::CommentCreated
        | JiraEvent::CommentUpdated
        | JiraEvent::CommentDeleted
        | JiraEvent::WorklogCreated
        | JiraEvent::WorklogUpdated
        | JiraEvent::WorklogDeleted => {
            tracing::info!(
                tenant_id,
                event_type = %payload.webhook_event,
                issue_key = payload.issue_key().unwrap_or_default(),
                "Jira event logged"
            );
            StatusCode::OK
        }
        JiraEvent::Unsupported(event_type) => {
            tracing::debug!(event_type = %event_type, "Ignoring unsupported Jira event");
            StatusCode::OK
        }
    }
}

fn handle_issue_created(state: &AppState, payload: &JiraWebhookPayload) -> StatusCode {
    let Some(issue) = payload.issue.as_ref() else {
        return StatusCode::BAD_REQUEST;
    };

    if !issue.is_eligible() {
        tracing::info!(issue_key = %issue.key, "Issue not eligible for analysis");
        return StatusCode::OK;
    }

    enqueue(state, issue, None)
}

fn handle_issue_updated(state: &AppState, payload: &JiraWebhookPayload) -> StatusCode {
    let (Some(issue), Some(changelog)) = (payload.issue.as_ref(), payload.changelog.as_ref())
    else {
        return StatusCode::OK;
    };

    if let Some(assignee) = changelog.new_assignee() {
        if issue.is_eligible() {
            tracing::info!(issue_key = %issue.key, assignee, "Issue reassigned");
            return enqueue(state, issue, Some(assignee.to_string()));
        }
    }

    if changelog.reopened() && issue.is_eligible() {
        tracing::info!(issue_key = %issue.key, "Issue reopened");
        return enqueue(state, issue, None);
    }

    StatusCode::OK
}

fn enqueue(state: &AppState, issue: &IssuePayload, assignee_id: Option<String>) -> StatusCode {
    let request = match issue.analysis_request(&state.config.webhook.tenant_id, assignee_id) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(issue_key = %issue.key, error = %e, "Cannot build analysis request");
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.queue.enqueue(request) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::error!(issue_key = %issue.key, error = %e, "Failed to enqueue analysis");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn record(state: &AppState, event: AuditEvent) {
    if let Err(e) = state.audit.record(event).await {
        tracing::warn!(error = %e, "Failed to record audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::Value;

    use crate::config::AppConfig;
    use crate::queue::{run_queue_processor, AnalysisQueue};
    use crate::server::create_router;
    use crate::webhook::signature::sign;
    use crate::workflow::testing::ScriptedServices;

    const SECRET: &str = "jira-secret";

    struct TestServer {
        base: String,
        state: Arc<AppState>,
        services: ScriptedServices,
        client: reqwest::Client,
    }

    async fn start() -> TestServer {
        let mut config = AppConfig::default();
        config.webhook.secret = SECRET.to_string();
        config.webhook.tenant_id = "acme".to_string();

        let services = ScriptedServices::new();
        let (queue, receiver) = AnalysisQueue::channel();
        let state = Arc::new(
            AppState::with_collaborators(config, services.collaborators(), queue).unwrap(),
        );
        tokio::spawn(run_queue_processor(Arc::clone(&state), receiver));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            state,
            services,
            client: reqwest::Client::new(),
        }
    }

    impl TestServer {
        async fn post(&self, payload: &Value) -> StatusCode {
            let body = serde_json::to_vec(payload).unwrap();
            let signature = format!("sha256={}", sign(SECRET, &body).unwrap());
            self.post_raw(body, &signature).await
        }

        async fn post_raw(&self, body: Vec<u8>, signature: &str) -> StatusCode {
            let response = self
                .client
                .post(format!("{}/webhooks/jira", self.base))
                .header("x-hub-signature-256", signature)
                .header("content-type", "application/json")
                .body(body)
                .send()
                .await
                .unwrap();
            StatusCode::from_u16(response.status().as_u16()).unwrap()
        }

        async fn analysis(&self, ticket_id: &str) -> Option<Value> {
            for _ in 0..100 {
                let response = self
                    .client
                    .get(format!("{}/analyses/{ticket_id}", self.base))
                    .send()
                    .await
                    .unwrap();
                if response.status().is_success() {
                    return Some(response.json().await.unwrap());
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            None
        }
    }

    fn bug_issue() -> Value {
        json!({
            "id": "10002",
            "key": "PAY-12",
            "self": "https://acme.atlassian.net/rest/api/2/issue/10002",
            "fields": {
                "summary": "Checkout crashes with NullPointerException",
                "issuetype": {"name": "Bug"},
                "priority": {"name": "High"},
                "status": {"name": "Open"},
                "project": {"key": "PAY", "name": "Payments"},
                "assignee": {"accountId": "acc-1"}
            }
        })
    }

    fn event(name: &str, issue: Value) -> Value {
        json!({"timestamp": 1714557600000i64, "webhookEvent": name, "issue": issue})
    }

    #[tokio::test]
    async fn test_issue_created_is_analyzed() {
        let server = start().await;

        let status = server.post(&event("jira:issue_created", bug_issue())).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let analysis = server.analysis("PAY-12").await.expect("analysis stored");
        assert_eq!(analysis["workflow_status"], "completed");
        assert_eq!(analysis["tenant_id"], "acme");
        assert_eq!(analysis["assignee_id"], "acc-1");
        assert_eq!(
            analysis["ticket_data"]["url"],
            "https://acme.atlassian.net/browse/10002"
        );

        assert!(server.state.results.in_flight().await.is_empty());

        let events = server.services.audit().events().await;
        assert!(events
            .iter()
            .any(|e| e.event_type == AuditEventType::WebhookReceived
                && e.action.as_deref() == Some("jira:issue_created")));
    }

    #[tokio::test]
    async fn test_ineligible_issue_is_skipped() {
        let server = start().await;
        let mut story = bug_issue();
        story["fields"]["issuetype"]["name"] = json!("Story");

        let status = server.post(&event("jira:issue_created", story)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(server.services.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reassignment_uses_new_assignee() {
        let server = start().await;
        let mut payload = event("jira:issue_updated", bug_issue());
        payload["changelog"] = json!({
            "items": [{
                "field": "assignee",
                "from": "acc-1",
                "fromString": "Alice",
                "to": "acc-7",
                "toString": "Jane Doe"
            }]
        });

        let status = server.post(&payload).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let analysis = server.analysis("PAY-12").await.expect("analysis stored");
        assert_eq!(analysis["assignee_id"], "acc-7");
    }

    #[tokio::test]
    async fn test_unrelated_update_is_logged() {
        let server = start().await;
        let mut payload = event("jira:issue_updated", bug_issue());
        payload["changelog"] = json!({
            "items": [{"field": "labels", "fromString": "", "toString": "backend"}]
        });

        assert_eq!(server.post(&payload).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_known_and_unknown_events_return_ok() {
        let server = start().await;

        assert_eq!(
            server.post(&event("comment_created", bug_issue())).await,
            StatusCode::OK
        );
        assert_eq!(
            server.post(&event("sprint_started", Value::Null)).await,
            StatusCode::OK
        );
        assert!(server.services.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_and_audited() {
        let server = start().await;
        let body = serde_json::to_vec(&event("jira:issue_created", bug_issue())).unwrap();

        let status = server.post_raw(body, "sha256=deadbeef").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let events = server.services.audit().events().await;
        let suspicious = events
            .iter()
            .find(|e| e.event_type == AuditEventType::SuspiciousActivity)
            .expect("suspicious activity recorded");
        assert_eq!(suspicious.severity, AuditSeverity::High);
        assert_eq!(suspicious.tenant_id, "acme");
        assert!(server.services.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let server = start().await;
        let body = b"{not json".to_vec();
        let signature = sign(SECRET, &body).unwrap();

        assert_eq!(server.post_raw(body, &signature).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_analysis_is_not_found() {
        let server = start().await;
        let response = server
            .client
            .get(format!("{}/analyses/NOPE-1", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }
}
