use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::datetime::DueDate;
use crate::error::SyncError;

/// Identity of a task or subtask. `Local` ids are placeholders handed out
/// by the view state for entities the server has not seen yet; they never
/// leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityId {
    Local(u64),
    Remote(u64),
}

impl EntityId {
    pub fn remote(self) -> Option<u64> {
        match self {
            EntityId::Remote(id) => Some(id),
            EntityId::Local(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Local(n) => write!(f, "~{n}"),
            EntityId::Remote(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (local, digits) = match trimmed.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let n = digits.parse::<u64>().map_err(|_| {
            SyncError::validation("id", format!("expected N or ~N, got '{trimmed}'"))
        })?;
        Ok(if local {
            EntityId::Local(n)
        } else {
            EntityId::Remote(n)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Done,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Done => "done",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "done" => Ok(Status::Done),
            other => Err(SyncError::validation(
                "status",
                format!("expected 'pending' or 'done', got '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: Option<EntityId>,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    pub due: Option<DueDate>,
    /// Assigned by the server from the session's user.
    pub owner_id: Option<u64>,
    /// Lazily populated copy; the view state's subtask map is the source
    /// of truth for what has been loaded.
    pub subtasks: Vec<Subtask>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: None,
            status: Status::Pending,
            due: None,
            owner_id: None,
            subtasks: vec![],
        }
    }

    pub fn is_local_only(&self) -> bool {
        !matches!(self.id, Some(EntityId::Remote(_)))
    }

    pub fn apply_patch(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(due) = patch.due {
            self.due = due;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtask {
    pub id: Option<EntityId>,
    pub title: String,
    pub status: Status,
    pub due: Option<DueDate>,
    pub task_id: EntityId,
}

impl Subtask {
    pub fn new(task_id: EntityId, title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            status: Status::Pending,
            due: None,
            task_id,
        }
    }

    pub fn is_local_only(&self) -> bool {
        !matches!(self.id, Some(EntityId::Remote(_)))
    }

    pub fn apply_patch(&mut self, patch: SubtaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(due) = patch.due {
            self.due = due;
        }
    }
}

/// Partial edit of a task. The outer `Option` means "leave unchanged", an
/// inner `None` clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<Status>,
    pub due: Option<Option<DueDate>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtaskPatch {
    pub title: Option<String>,
    pub status: Option<Status>,
    pub due: Option<Option<DueDate>>,
}

pub fn validate_task(task: &Task) -> Result<(), SyncError> {
    validate_title(&task.title)
}

pub fn validate_subtask(subtask: &Subtask) -> Result<(), SyncError> {
    validate_title(&subtask.title)
}

pub fn is_valid_task(task: &Task) -> bool {
    validate_task(task).is_ok()
}

pub fn is_valid_subtask(subtask: &Subtask) -> bool {
    validate_subtask(subtask).is_ok()
}

fn validate_title(title: &str) -> Result<(), SyncError> {
    if title.trim().is_empty() {
        return Err(SyncError::validation("title", "must not be empty"));
    }
    Ok(())
}
