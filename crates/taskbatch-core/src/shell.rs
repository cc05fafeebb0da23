use std::io::{BufRead, Write};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::{FilterCommand, ShellCommand, SubCommand, parse_line, shell_help};
use crate::datetime::{DueDate, parse_day};
use crate::filter::StatusFilter;
use crate::model::{Subtask, SubtaskPatch, Task, TaskPatch};
use crate::remote::RemoteClient;
use crate::render::Renderer;
use crate::workspace::Workspace;

const PROMPT: &str = "taskbatch> ";

enum Flow {
    Continue,
    Quit,
}

/// Reads commands until `quit` or end of input. Command errors are
/// printed and the loop carries on; only I/O failures end it early.
#[tracing::instrument(skip_all)]
pub fn run_shell<R, I, W>(
    ws: &mut Workspace<R>,
    renderer: &Renderer,
    input: I,
    out: &mut W,
    interactive: bool,
) -> anyhow::Result<()>
where
    R: RemoteClient,
    I: BufRead,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        if interactive {
            write!(out, "{PROMPT}")?;
            out.flush()?;
        }

        let Some(line) = lines.next() else {
            if !ws.pending().is_empty() {
                warn!(pending = ws.pending().len(), "session ended with unsubmitted changes");
                writeln!(
                    out,
                    "Discarding {} unsubmitted change(s).",
                    ws.pending().len()
                )?;
            }
            break;
        };
        let line = line.context("failed reading command input")?;

        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                renderer.print_error(out, &err)?;
                continue;
            }
        };
        debug!(?command, "shell command");

        match execute(ws, renderer, command, out) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => {
                if !ws.pending().is_empty() {
                    warn!(pending = ws.pending().len(), "quitting with unsubmitted changes");
                }
                break;
            }
            Err(err) => renderer.print_error(out, &format!("{err:#}"))?,
        }
    }

    info!("shell finished");
    Ok(())
}

fn execute<R, W>(
    ws: &mut Workspace<R>,
    renderer: &Renderer,
    command: ShellCommand,
    out: &mut W,
) -> anyhow::Result<Flow>
where
    R: RemoteClient,
    W: Write,
{
    let now = Utc::now();
    match command {
        ShellCommand::List => {
            if ws.view().filter().is_active() {
                writeln!(out, "Filter: {}", ws.view().filter())?;
            }
            renderer.print_task_table(out, &ws.visible_tasks(), ws.pending(), now)?;
        }
        ShellCommand::Show { id } => {
            let subtasks = ws.expand(id)?.to_vec();
            if let Some(task) = ws.view().task(id) {
                renderer.print_task_info(out, task)?;
            }
            writeln!(out)?;
            renderer.print_subtasks(out, id, &subtasks, ws.pending(), now)?;
        }
        ShellCommand::Add {
            title,
            description,
            status,
            due,
        } => {
            let mut task = Task::new(title.join(" "));
            task.description = description.filter(|text| !text.trim().is_empty());
            task.status = status.unwrap_or_default();
            task.due = due.as_deref().map(|raw| ws.parse_due(raw)).transpose()?;
            let id = ws.create_task(task)?;
            writeln!(out, "Created task {id}.")?;
        }
        ShellCommand::Edit {
            id,
            title,
            description,
            no_desc,
            status,
            due,
            no_due,
        } => {
            let patch = TaskPatch {
                title,
                description: if no_desc { Some(None) } else { description.map(Some) },
                status,
                due: due_change(ws, due, no_due)?,
            };
            if patch == TaskPatch::default() {
                writeln!(out, "Nothing to change.")?;
            } else {
                ws.edit_task(id, patch)?;
                writeln!(out, "Modified task {id}.")?;
            }
        }
        ShellCommand::Rm { id } => {
            let removed = ws.delete_task(id)?;
            writeln!(out, "Deleted task {id} '{}'.", removed.title)?;
        }
        ShellCommand::Sub(sub) => execute_sub(ws, sub, out)?,
        ShellCommand::Filter(filter) => {
            let mut current = ws.view().filter().clone();
            match filter {
                FilterCommand::Status { value } => current.status = value.parse::<StatusFilter>()?,
                FilterCommand::Due { day } => {
                    current.due_on = day.as_deref().map(parse_day).transpose()?;
                }
                FilterCommand::Title { text } => current.title = text.join(" "),
                FilterCommand::Clear => current = Default::default(),
            }
            writeln!(out, "Filter: {current}")?;
            ws.set_filter(current);
        }
        ShellCommand::Pending => renderer.print_pending(out, ws.pending())?,
        ShellCommand::Flush => match ws.flush() {
            Ok(report) => renderer.print_flush_report(out, &report)?,
            Err(err) => {
                if err.report.total > 0 {
                    renderer.print_flush_report(out, &err.report)?;
                }
                renderer.print_error(out, &err.source)?;
            }
        },
        ShellCommand::Reload => {
            let count = ws.load()?;
            writeln!(out, "Loaded {count} task(s).")?;
        }
        ShellCommand::Help => write!(out, "{}", shell_help())?,
        ShellCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn execute_sub<R, W>(ws: &mut Workspace<R>, command: SubCommand, out: &mut W) -> anyhow::Result<()>
where
    R: RemoteClient,
    W: Write,
{
    match command {
        SubCommand::Add {
            task,
            title,
            status,
            due,
        } => {
            let mut subtask = Subtask::new(task, title.join(" "));
            subtask.status = status.unwrap_or_default();
            subtask.due = due.as_deref().map(|raw| ws.parse_due(raw)).transpose()?;
            let id = ws.add_subtask(task, subtask)?;
            writeln!(out, "Created subtask {id} under task {task}.")?;
        }
        SubCommand::Edit {
            id,
            title,
            status,
            due,
            no_due,
        } => {
            let patch = SubtaskPatch {
                title,
                status,
                due: due_change(ws, due, no_due)?,
            };
            if patch == SubtaskPatch::default() {
                writeln!(out, "Nothing to change.")?;
            } else {
                ws.edit_subtask(id, patch)?;
                writeln!(out, "Modified subtask {id}.")?;
            }
        }
        SubCommand::Rm { id } => {
            let removed = ws.delete_subtask(id)?;
            writeln!(out, "Deleted subtask {id} '{}'.", removed.title)?;
        }
    }
    Ok(())
}

fn due_change<R: RemoteClient>(
    ws: &Workspace<R>,
    due: Option<String>,
    clear: bool,
) -> anyhow::Result<Option<Option<DueDate>>> {
    if clear {
        return Ok(Some(None));
    }
    Ok(due.as_deref().map(|raw| ws.parse_due(raw)).transpose()?.map(Some))
}
