use std::fmt::Display;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::DueDate;
use crate::model::{EntityId, Status, Subtask, Task};
use crate::sync::FlushReport;
use crate::tracker::ChangeTracker;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            tz,
        })
    }

    /// Uncolored renderer in UTC.
    pub fn plain() -> Self {
        Self {
            color: false,
            tz: chrono_tz::UTC,
        }
    }

    /// Task list with a `*` marking entries that still have queued changes.
    #[tracing::instrument(skip_all, fields(count = tasks.len()))]
    pub fn print_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        pending: &ChangeTracker,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Status".to_string(),
            "Due".to_string(),
            "Title".to_string(),
            "Description".to_string(),
            "Subtasks".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut id = show_id(task.id);
            if task.id.is_some_and(|id| pending.tasks().mentions(id)) {
                id.push('*');
            }

            let status = match task.status {
                Status::Done => self.paint(task.status.as_str(), "32"),
                Status::Pending => task.status.to_string(),
            };

            rows.push(vec![
                self.paint(&id, "33"),
                status,
                self.due_cell(task.due, task.status, now),
                task.title.clone(),
                task.description.clone().unwrap_or_default(),
                if task.subtasks.is_empty() {
                    String::new()
                } else {
                    task.subtasks.len().to_string()
                },
            ]);
        }

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_task_info<W: Write>(&self, out: &mut W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id          {}", show_id(task.id))?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(
            out,
            "description {}",
            task.description.clone().unwrap_or_default()
        )?;
        writeln!(out, "status      {}", task.status)?;
        if let Some(due) = task.due {
            writeln!(out, "due         {}", self.local_due(due))?;
        }
        if let Some(owner) = task.owner_id {
            writeln!(out, "owner       {owner}")?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(task = %parent, count = subtasks.len()))]
    pub fn print_subtasks<W: Write>(
        &self,
        out: &mut W,
        parent: EntityId,
        subtasks: &[Subtask],
        pending: &ChangeTracker,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if subtasks.is_empty() {
            writeln!(out, "No subtasks for task {parent}.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Status".to_string(),
            "Due".to_string(),
            "Title".to_string(),
        ];
        let rows = subtasks
            .iter()
            .map(|subtask| {
                let mut id = show_id(subtask.id);
                if subtask.id.is_some_and(|id| pending.subtasks().mentions(id)) {
                    id.push('*');
                }
                vec![
                    self.paint(&id, "33"),
                    subtask.status.to_string(),
                    self.due_cell(subtask.due, subtask.status, now),
                    subtask.title.clone(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn print_pending<W: Write>(&self, out: &mut W, pending: &ChangeTracker) -> anyhow::Result<()> {
        if pending.is_empty() {
            writeln!(out, "Nothing to submit.")?;
            return Ok(());
        }

        writeln!(out, "{} unsubmitted change(s):", pending.len())?;
        for (idx, op) in pending.ops().iter().enumerate() {
            writeln!(out, "{:>3}. {op}", idx + 1)?;
        }
        Ok(())
    }

    pub fn print_flush_report<W: Write>(&self, out: &mut W, report: &FlushReport) -> anyhow::Result<()> {
        if report.total == 0 {
            writeln!(out, "Nothing to submit.")?;
        } else if report.is_complete() {
            writeln!(
                out,
                "{}",
                self.paint(&format!("Submitted {} change(s).", report.total), "32")
            )?;
        } else {
            writeln!(
                out,
                "Submitted {} of {} change(s); {} kept for retry.",
                report.delivered.len(),
                report.total,
                report.restored
            )?;
        }

        if let Some(failed) = &report.failed {
            writeln!(out, "{}", self.paint(&format!("Failed: {failed}"), "31"))?;
        }
        for (op, err) in &report.discarded {
            writeln!(out, "{}", self.paint(&format!("Dropped: {op} ({err})"), "31"))?;
        }
        if report.total > 0 {
            writeln!(out, "Batch {}.", report.batch_id)?;
        }
        if !report.refreshed {
            writeln!(out, "Task list was not reloaded; showing local state.")?;
        }
        Ok(())
    }

    pub fn print_error<W: Write>(&self, out: &mut W, err: &dyn Display) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&format!("error: {err}"), "31"))?;
        Ok(())
    }

    fn due_cell(&self, due: Option<DueDate>, status: Status, now: DateTime<Utc>) -> String {
        let Some(due) = due else {
            return String::new();
        };
        let text = self.local_due(due);
        if status == Status::Pending && due.as_utc() < now {
            self.paint(&text, "31")
        } else {
            text
        }
    }

    fn local_due(&self, due: DueDate) -> String {
        due.as_utc()
            .with_timezone(&self.tz)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn show_id(id: Option<EntityId>) -> String {
    id.map(|value| value.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| {
                let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                let padding = widths[idx].saturating_sub(visible_width);
                format!("{cell}{}", " ".repeat(padding))
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string()
    };

    writeln!(writer, "{}", line(headers))?;
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        writeln!(writer, "{}", line(row))?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
