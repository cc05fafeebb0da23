use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use tracing::trace;

use crate::datetime::parse_day;
use crate::error::SyncError;
use crate::model::{
  Status,
  Task
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum StatusFilter {
  #[default]
  All,
  Only(Status)
}

impl FromStr for StatusFilter {
  type Err = SyncError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    if trimmed.is_empty()
      || trimmed
        .eq_ignore_ascii_case("all")
    {
      return Ok(Self::All);
    }
    trimmed
      .parse::<Status>()
      .map(Self::Only)
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Self::All => f.write_str("all"),
      | Self::Only(status) => {
        write!(f, "{status}")
      }
    }
  }
}

/// Conjunction of the three task list predicates. An unset predicate
/// always matches.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct TaskFilter {
  pub status: StatusFilter,
  pub due_on: Option<NaiveDate>,
  pub title:  String
}

impl TaskFilter {
  /// Builds a filter from raw text; empty strings mean "no filter" and
  /// `all` disables the status predicate.
  pub fn parse(
    status: &str,
    due_on: &str,
    title: &str
  ) -> Result<Self, SyncError> {
    let due_on = if due_on.trim().is_empty()
    {
      None
    } else {
      Some(parse_day(due_on)?)
    };

    Ok(Self {
      status: status.parse()?,
      due_on,
      title: title.to_string()
    })
  }

  pub fn is_active(&self) -> bool {
    self.status != StatusFilter::All
      || self.due_on.is_some()
      || !self.title.is_empty()
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    if let StatusFilter::Only(status) =
      self.status
      && task.status != status
    {
      return false;
    }

    if let Some(day) = self.due_on {
      match task.due {
        | Some(due) if due.day() == day => {}
        | _ => return false
      }
    }

    if !self.title.is_empty()
      && !task
        .title
        .to_lowercase()
        .contains(
          &self.title.to_lowercase()
        )
    {
      return false;
    }

    true
  }

  pub fn apply<'a>(
    &self,
    tasks: &'a [Task]
  ) -> Vec<&'a Task> {
    let out: Vec<&Task> = tasks
      .iter()
      .filter(|task| self.matches(task))
      .collect();
    trace!(
      total = tasks.len(),
      matched = out.len(),
      "applied task filter"
    );
    out
  }
}

impl fmt::Display for TaskFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(f, "status={}", self.status)?;
    if let Some(day) = self.due_on {
      write!(f, " due={day}")?;
    }
    if !self.title.is_empty() {
      write!(f, " title~\"{}\"", self.title)?;
    }
    Ok(())
  }
}

/// Pure filter over raw predicate text, e.g.
/// `filter_tasks(&tasks, "done", "", "")`.
pub fn filter_tasks<'a>(
  tasks: &'a [Task],
  status: &str,
  due_on: &str,
  title: &str
) -> Result<Vec<&'a Task>, SyncError> {
  let filter =
    TaskFilter::parse(status, due_on, title)?;
  Ok(filter.apply(tasks))
}

#[cfg(test)]
mod tests {
  use super::{
    StatusFilter,
    TaskFilter,
    filter_tasks
  };
  use crate::datetime::DueDate;
  use crate::model::{
    EntityId,
    Status,
    Task
  };

  fn task(
    id: u64,
    title: &str,
    status: Status,
    due: Option<&str>
  ) -> Task {
    let mut task = Task::new(title);
    task.id = Some(EntityId::Remote(id));
    task.status = status;
    task.due = due.map(|raw| {
      DueDate::parse_wire(raw)
        .expect("valid due")
    });
    task
  }

  fn sample() -> Vec<Task> {
    vec![
      task(
        1,
        "Write Report",
        Status::Done,
        Some("2024-01-01 09:00:00")
      ),
      task(
        2,
        "Review report",
        Status::Pending,
        Some("2024-01-01 23:59:59")
      ),
      task(
        3,
        "Groceries",
        Status::Done,
        Some("2024-01-02 00:00:00")
      ),
      task(
        4,
        "Call mom",
        Status::Pending,
        None
      ),
    ]
  }

  fn ids(tasks: &[&Task]) -> Vec<String> {
    tasks
      .iter()
      .filter_map(|task| task.id)
      .map(|id| id.to_string())
      .collect()
  }

  #[test]
  fn status_only_returns_matching_subset()
  {
    let tasks = sample();
    let done =
      filter_tasks(&tasks, "done", "", "")
        .expect("valid filter");
    assert_eq!(ids(&done), vec!["1", "3"]);
  }

  #[test]
  fn due_filter_compares_calendar_day() {
    let tasks = sample();
    let on_day = filter_tasks(
      &tasks,
      "all",
      "2024-01-01",
      ""
    )
    .expect("valid filter");
    assert_eq!(ids(&on_day), vec!["1", "2"]);
  }

  #[test]
  fn predicates_are_conjunctive_and_title_ignores_case()
  {
    let tasks = sample();
    let hits = filter_tasks(
      &tasks,
      "pending",
      "2024-01-01",
      "REPORT"
    )
    .expect("valid filter");
    assert_eq!(ids(&hits), vec!["2"]);

    let all =
      filter_tasks(&tasks, "", "", "")
        .expect("empty filter");
    assert_eq!(all.len(), tasks.len());
  }

  #[test]
  fn invalid_inputs_are_validation_errors()
  {
    let tasks = sample();
    assert!(
      filter_tasks(
        &tasks, "blocked", "", ""
      )
      .is_err()
    );
    assert!(
      filter_tasks(
        &tasks, "all", "01/01/2024", ""
      )
      .is_err()
    );
  }

  #[test]
  fn default_filter_is_inactive() {
    let filter = TaskFilter::default();
    assert!(!filter.is_active());
    assert_eq!(
      filter.status,
      StatusFilter::All
    );
    assert_eq!(
      filter.to_string(),
      "status=all"
    );
  }
}
