use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::{Config, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
use crate::datetime::{DueDate, wire_date_serde};
use crate::error::SyncError;
use crate::model::{EntityId, Status, Subtask, Task};
use crate::session::Session;

/// The eight CRUD calls the server exposes. Implementations are
/// stateless apart from connection plumbing; credentials come in with
/// every call.
///
/// Create calls return the server-assigned id when the response carries
/// one.
pub trait RemoteClient {
    fn list_tasks(&self, session: &Session) -> Result<Vec<Task>, SyncError>;
    fn create_task(&self, session: &Session, task: &Task) -> Result<Option<u64>, SyncError>;
    fn update_task(&self, session: &Session, id: u64, task: &Task) -> Result<(), SyncError>;
    fn delete_task(&self, session: &Session, id: u64) -> Result<(), SyncError>;

    fn list_subtasks(&self, session: &Session, task_id: u64) -> Result<Vec<Subtask>, SyncError>;
    fn create_subtask(
        &self,
        session: &Session,
        task_id: u64,
        subtask: &Subtask,
    ) -> Result<Option<u64>, SyncError>;
    fn update_subtask(&self, session: &Session, id: u64, subtask: &Subtask) -> Result<(), SyncError>;
    fn delete_subtask(&self, session: &Session, id: u64) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPayload<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub status: Status,
    #[serde(with = "wire_date_serde::option")]
    pub due_date: Option<DueDate>,
}

impl<'a> From<&'a Task> for TaskPayload<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            title: task.title.as_str(),
            description: task.description.as_deref().unwrap_or_default(),
            status: task.status,
            due_date: task.due,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskPayload<'a> {
    pub title: &'a str,
    pub status: Status,
    #[serde(with = "wire_date_serde::option")]
    pub due_date: Option<DueDate>,
}

impl<'a> From<&'a Subtask> for SubtaskPayload<'a> {
    fn from(subtask: &'a Subtask) -> Self {
        Self {
            title: subtask.title.as_str(),
            status: subtask.status,
            due_date: subtask.due,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default, with = "wire_date_serde::option")]
    pub due_date: Option<DueDate>,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubtaskRecord {
    pub id: u64,
    pub task_id: u64,
    pub title: String,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default, with = "wire_date_serde::option")]
    pub due_date: Option<DueDate>,
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        Self {
            id: Some(EntityId::Remote(record.id)),
            title: record.title,
            description: record.description.filter(|text| !text.is_empty()),
            status: record.status.unwrap_or_default(),
            due: record.due_date,
            owner_id: record.user_id,
            subtasks: record.subtasks.into_iter().map(Subtask::from).collect(),
        }
    }
}

impl From<SubtaskRecord> for Subtask {
    fn from(record: SubtaskRecord) -> Self {
        Self {
            id: Some(EntityId::Remote(record.id)),
            title: record.title,
            status: record.status.unwrap_or_default(),
            due: record.due_date,
            task_id: EntityId::Remote(record.task_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl RemoteSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base_url = cfg
            .get("api.url")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if base_url.is_empty() {
            anyhow::bail!("api.url must not be empty");
        }
        let timeout = cfg.get_u64("api.timeout")?.unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout),
        })
    }
}

/// Blocking HTTP implementation of [`RemoteClient`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    client: Client,
}

impl HttpRemote {
    pub fn new(settings: &RemoteSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("taskbatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed building HTTP client for task API")?;

        debug!(base_url = %settings.base_url, timeout = ?settings.timeout, "initialized HTTP remote");
        Ok(Self {
            base_url: settings.base_url.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, op: &str, session: &Session, request: RequestBuilder) -> Result<String, SyncError> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::AUTHORIZATION, session.authorization_header())
            .send()
            .map_err(|err| {
                warn!(op, error = %err, "request failed before a response arrived");
                SyncError::remote(op, None, err.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| SyncError::remote(op, Some(status.as_u16()), err.to_string()))?;

        debug!(op, status = status.as_u16(), bytes = body.len(), "received response");
        if !status.is_success() {
            return Err(SyncError::remote(op, Some(status.as_u16()), error_message(&body)));
        }
        Ok(body)
    }
}

impl RemoteClient for HttpRemote {
    #[instrument(skip_all)]
    fn list_tasks(&self, session: &Session) -> Result<Vec<Task>, SyncError> {
        let op = "list tasks";
        let body = self.send(op, session, self.client.get(self.url("/tasks")))?;
        let records: Vec<TaskRecord> = decode(op, &body)?;
        Ok(records.into_iter().map(Task::from).collect())
    }

    #[instrument(skip_all, fields(title = %task.title))]
    fn create_task(&self, session: &Session, task: &Task) -> Result<Option<u64>, SyncError> {
        let op = "create task";
        let request = self.client.post(self.url("/tasks")).json(&TaskPayload::from(task));
        let body = self.send(op, session, request)?;
        Ok(created_id(&body))
    }

    #[instrument(skip(self, session, task))]
    fn update_task(&self, session: &Session, id: u64, task: &Task) -> Result<(), SyncError> {
        let op = format!("update task {id}");
        let request = self
            .client
            .put(self.url(&format!("/tasks/{id}")))
            .json(&TaskPayload::from(task));
        self.send(&op, session, request).map(|_| ())
    }

    #[instrument(skip(self, session))]
    fn delete_task(&self, session: &Session, id: u64) -> Result<(), SyncError> {
        let op = format!("delete task {id}");
        let request = self.client.delete(self.url(&format!("/tasks/{id}")));
        self.send(&op, session, request).map(|_| ())
    }

    #[instrument(skip(self, session))]
    fn list_subtasks(&self, session: &Session, task_id: u64) -> Result<Vec<Subtask>, SyncError> {
        let op = format!("list subtasks of task {task_id}");
        let request = self.client.get(self.url(&format!("/tasks/{task_id}/subtasks")));
        let body = self.send(&op, session, request)?;
        let records: Vec<SubtaskRecord> = decode(&op, &body)?;
        Ok(records.into_iter().map(Subtask::from).collect())
    }

    #[instrument(skip(self, session, subtask), fields(title = %subtask.title))]
    fn create_subtask(
        &self,
        session: &Session,
        task_id: u64,
        subtask: &Subtask,
    ) -> Result<Option<u64>, SyncError> {
        let op = format!("create subtask under task {task_id}");
        let request = self
            .client
            .post(self.url(&format!("/tasks/{task_id}/subtasks")))
            .json(&SubtaskPayload::from(subtask));
        let body = self.send(&op, session, request)?;
        Ok(created_id(&body))
    }

    #[instrument(skip(self, session, subtask))]
    fn update_subtask(
        &self,
        session: &Session,
        id: u64,
        subtask: &Subtask,
    ) -> Result<(), SyncError> {
        let op = format!("update subtask {id}");
        let request = self
            .client
            .put(self.url(&format!("/subtasks/{id}")))
            .json(&SubtaskPayload::from(subtask));
        self.send(&op, session, request).map(|_| ())
    }

    #[instrument(skip(self, session))]
    fn delete_subtask(&self, session: &Session, id: u64) -> Result<(), SyncError> {
        let op = format!("delete subtask {id}");
        let request = self.client.delete(self.url(&format!("/subtasks/{id}")));
        self.send(&op, session, request).map(|_| ())
    }
}

fn decode<T: serde::de::DeserializeOwned>(op: &str, body: &str) -> Result<T, SyncError> {
    serde_json::from_str(body)
        .map_err(|err| SyncError::remote(op, None, format!("malformed response body: {err}")))
}

fn created_id(body: &str) -> Option<u64> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("id")
        .and_then(Value::as_u64)
}

fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && let Some(message) = value.get("message").and_then(Value::as_str)
    {
        return message.to_string();
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_payload_normalizes_due_and_blank_description() {
        let mut task = Task::new("Ship");
        task.due = Some(DueDate::parse_wire("2024-01-01T09:30:00+02:00").expect("due"));
        let json = serde_json::to_value(TaskPayload::from(&task)).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Ship",
                "description": "",
                "status": "pending",
                "due_date": "2024-01-01 07:30:00"
            })
        );
    }

    #[test]
    fn task_record_decodes_server_shape() {
        let raw = r#"{
            "id": 5,
            "user_id": 2,
            "title": "Plan",
            "description": "",
            "status": null,
            "due_date": "Mon, 01 Jan 2024 00:00:00 GMT"
        }"#;
        let record: TaskRecord = serde_json::from_str(raw).expect("decode");
        let task = Task::from(record);
        assert_eq!(task.id, Some(EntityId::Remote(5)));
        assert_eq!(task.status, Status::Pending);
        assert_eq!(task.description, None);
        assert_eq!(task.owner_id, Some(2));
        assert_eq!(task.due.map(|due| due.to_wire()).as_deref(), Some("2024-01-01 00:00:00"));
    }

    #[test]
    fn unknown_status_is_rejected_at_the_boundary() {
        let raw = r#"{"id": 1, "title": "x", "status": "archived"}"#;
        assert!(serde_json::from_str::<TaskRecord>(raw).is_err());
    }

    #[test]
    fn error_message_prefers_server_message_field() {
        assert_eq!(error_message(r#"{"message": "Forbidden"}"#), "Forbidden");
        assert_eq!(error_message("  "), "empty response body");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn created_id_is_optional() {
        assert_eq!(created_id(r#"{"id": 9, "message": "ok"}"#), Some(9));
        assert_eq!(created_id(r#"{"message": "Task created successfully"}"#), None);
        assert_eq!(created_id("not json"), None);
    }
}
