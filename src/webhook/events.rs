use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::workflow::state::{AnalysisRequest, JsonMap};

/// Jira webhook event, taken from the payload's `webhookEvent` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JiraEvent {
    IssueCreated,
    IssueUpdated,
    IssueDeleted,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
    WorklogCreated,
    WorklogUpdated,
    WorklogDeleted,
    Unsupported(String),
}

impl JiraEvent {
    pub fn parse(name: &str) -> Self {
        match name {
            "jira:issue_created" => JiraEvent::IssueCreated,
            "jira:issue_updated" => JiraEvent::IssueUpdated,
            "jira:issue_deleted" => JiraEvent::IssueDeleted,
            "comment_created" => JiraEvent::CommentCreated,
            "comment_updated" => JiraEvent::CommentUpdated,
            "comment_deleted" => JiraEvent::CommentDeleted,
            "worklog_created" => JiraEvent::WorklogCreated,
            "worklog_updated" => JiraEvent::WorklogUpdated,
            "worklog_deleted" => JiraEvent::WorklogDeleted,
            other => JiraEvent::Unsupported(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraWebhookPayload {
    pub timestamp: i64,
    pub webhook_event: String,
    pub user: Option<Value>,
    pub issue: Option<IssuePayload>,
    pub changelog: Option<ChangelogPayload>,
    pub comment: Option<Value>,
}

impl JiraWebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn event(&self) -> JiraEvent {
        JiraEvent::parse(&self.webhook_event)
    }

    pub fn issue_key(&self) -> Option<&str> {
        self.issue.as_ref().map(|issue| issue.key.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct IssuePayload {
    pub id: Option<String>,
    #[serde(default)]
    pub key: String,
    #[serde(rename = "self")]
    pub self_url: Option<String>,
    #[serde(default)]
    pub fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueFields {
    pub summary: Option<String>,
    /// Plain text in API v2, a document tree in v3.
    pub description: Option<Value>,
    #[serde(rename = "issuetype")]
    pub issue_type: Option<NamedPayload>,
    pub priority: Option<NamedPayload>,
    pub status: Option<NamedPayload>,
    pub project: Option<ProjectPayload>,
    pub assignee: Option<Value>,
    pub reporter: Option<Value>,
    pub created: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedPayload {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ProjectPayload {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangelogPayload {
    #[serde(default)]
    pub items: Vec<ChangelogItem>,
}

#[derive(Debug, Deserialize)]
pub struct ChangelogItem {
    pub field: String,
    /// Raw new value; the accountId for assignee changes.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "fromString")]
    pub from_string: Option<String>,
    #[serde(rename = "toString")]
    pub to_string: Option<String>,
}

const ACTIVE_STATUSES: &[&str] = &["open", "to do", "in progress", "assigned", "new"];
const REOPENED_STATUSES: &[&str] = &["open", "reopened", "to do"];
const IGNORED_PRIORITIES: &[&str] = &["lowest", "trivial"];

fn name_of(field: &Option<NamedPayload>) -> &str {
    field.as_ref().map(|f| f.name.as_str()).unwrap_or_default()
}

impl IssuePayload {
    /// Only open, assigned bugs of meaningful priority are analysed.
    pub fn is_eligible(&self) -> bool {
        let issue_type = name_of(&self.fields.issue_type).to_lowercase();
        if !issue_type.contains("bug") && !issue_type.contains("defect") {
            return false;
        }

        if self.fields.assignee.is_none() {
            return false;
        }

        let status = name_of(&self.fields.status).to_lowercase();
        if !ACTIVE_STATUSES.iter().any(|s| status.contains(s)) {
            return false;
        }

        let priority = name_of(&self.fields.priority).to_lowercase();
        !IGNORED_PRIORITIES.contains(&priority.as_str())
    }

    /// `accountId` on Jira Cloud, `name` on Server and Data Center.
    pub fn assignee_id(&self) -> Option<String> {
        let assignee = self.fields.assignee.as_ref()?;
        assignee
            .get("accountId")
            .or_else(|| assignee.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn browse_url(&self) -> String {
        self.self_url
            .as_deref()
            .unwrap_or_default()
            .replace("/rest/api/2/issue/", "/browse/")
    }

    pub fn ticket_data(&self) -> JsonMap {
        let fields = &self.fields;
        let (project_key, project_name) = fields
            .project
            .as_ref()
            .map(|p| (p.key.as_str(), p.name.as_str()))
            .unwrap_or_default();

        let ticket = json!({
            "id": self.id,
            "key": self.key,
            "summary": fields.summary.as_deref().unwrap_or_default(),
            "description": fields.description.clone().unwrap_or_else(|| json!("")),
            "issue_type": name_of(&fields.issue_type),
            "priority": name_of(&fields.priority),
            "status": name_of(&fields.status),
            "project": {"key": project_key, "name": project_name},
            "assignee": fields.assignee.clone().unwrap_or_else(|| json!({})),
            "reporter": fields.reporter.clone().unwrap_or_else(|| json!({})),
            "created": fields.created,
            "updated": fields.updated,
            "url": self.browse_url(),
        });

        match ticket {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        }
    }

    /// Build the workflow input for this issue. `assignee_id` overrides the
    /// issue's current assignee.
    pub fn analysis_request(
        &self,
        tenant_id: &str,
        assignee_id: Option<String>,
    ) -> Result<AnalysisRequest> {
        let assignee_id = assignee_id.or_else(|| self.assignee_id()).unwrap_or_default();
        AnalysisRequest::new(tenant_id, self.key.as_str(), self.ticket_data(), assignee_id)
    }
}

impl ChangelogPayload {
    fn change(&self, field: &str) -> Option<&ChangelogItem> {
        self.items.iter().find(|item| item.field == field)
    }

    /// The account the issue was reassigned to, if the assignee changed.
    /// Falls back to the display name for payloads without `to`.
    pub fn new_assignee(&self) -> Option<&str> {
        let item = self.change("assignee")?;
        item.to.as_deref().or(item.to_string.as_deref())
    }

    /// True when the status moved back to an open state.
    pub fn reopened(&self) -> bool {
        self.change("status")
            .and_then(|item| item.to_string.as_deref())
            .map(|status| REOPENED_STATUSES.contains(&status.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}
