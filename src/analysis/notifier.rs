use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::analysis::{AnalysisNotification, Notifier};
use crate::error::{AppError, Result};

/// Posts the analysis as JSON to an incoming-webhook URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct NotifyResponse {
    message_id: Option<String>,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &AnalysisNotification<'_>) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::Notification(format!(
                "webhook returned {status}: {body}"
            )));
        }

        // Receivers that do not report an id still count as delivered.
        let message_id = serde_json::from_str::<NotifyResponse>(&body)
            .ok()
            .and_then(|r| r.message_id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::debug!(
            assignee = notification.assignee_id,
            message_id = %message_id,
            "Notification delivered to webhook"
        );
        Ok(message_id)
    }
}

/// Logs the notification instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &AnalysisNotification<'_>) -> Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            tenant_id = notification.tenant_id,
            assignee = notification.assignee_id,
            ticket_key = ?notification.ticket.get("key"),
            confidence = notification.analysis.confidence_score,
            has_fix = notification.analysis.suggested_fix.is_some(),
            message_id = %message_id,
            "Analysis notification"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use crate::analysis::AnalysisResults;
    use crate::workflow::state::JsonMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/notify")
    }

    async fn send(url: &str) -> Result<String> {
        let mut ticket = JsonMap::new();
        ticket.insert("key".to_string(), json!("BUG-7"));
        let notification = AnalysisNotification {
            assignee_id: "u-1",
            tenant_id: "acme",
            ticket: &ticket,
            analysis: AnalysisResults {
                similar_tickets: &[],
                relevant_docs: &[],
                code_analysis: None,
                suggested_fix: Some("check for null"),
                confidence_score: 0.8,
            },
        };
        WebhookNotifier::new(url, Duration::from_secs(5))
            .unwrap()
            .notify(&notification)
            .await
    }

    #[tokio::test]
    async fn test_returns_message_id_from_receiver() {
        let router = Router::new().route(
            "/notify",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["ticket"]["key"], "BUG-7");
                assert_eq!(body["analysis"]["suggested_fix"], "check for null");
                Json(json!({"message_id": "m-42"}))
            }),
        );
        let url = serve(router).await;

        assert_eq!(send(&url).await.unwrap(), "m-42");
    }

    #[tokio::test]
    async fn test_generates_id_when_receiver_omits_it() {
        let router = Router::new().route("/notify", post(|| async { "ok" }));
        let url = serve(router).await;

        let id = send(&url).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_error_status_is_notification_error() {
        let router = Router::new().route(
            "/notify",
            post(|| async { (StatusCode::BAD_GATEWAY, "slack is down") }),
        );
        let url = serve(router).await;

        let err = send(&url).await.unwrap_err();
        assert!(matches!(err, AppError::Notification(_)));
    }
}
