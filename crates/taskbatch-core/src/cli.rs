use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::model::{EntityId, Status};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskbatch",
    version,
    about = "Edit tasks and subtasks locally, submit them to the task API in one batch",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    /// rc file to load instead of ~/.taskbatchrc
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Base URL of the task API; overrides `api.url`
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// Bearer token; overrides TASKBATCH_TOKEN and `auth.token`
    #[arg(long = "token")]
    pub token: Option<String>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

/// One line typed at the interactive prompt.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "taskbatch",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Show tasks that pass the current filter
    #[command(alias = "ls")]
    List,

    /// Show one task with its subtasks
    Show { id: EntityId },

    /// Create a task
    Add {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[arg(long = "desc")]
        description: Option<String>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        due: Option<String>,
    },

    /// Change fields of a task
    Edit {
        id: EntityId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "desc", conflicts_with = "no_desc")]
        description: Option<String>,
        #[arg(long = "no-desc")]
        no_desc: bool,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, conflicts_with = "no_due")]
        due: Option<String>,
        #[arg(long = "no-due")]
        no_due: bool,
    },

    /// Delete a task and its subtasks
    #[command(alias = "delete")]
    Rm { id: EntityId },

    /// Subtask commands
    #[command(subcommand)]
    Sub(SubCommand),

    /// Narrow the task list
    #[command(subcommand)]
    Filter(FilterCommand),

    /// List unsubmitted changes in submission order
    Pending,

    /// Submit every unsubmitted change
    #[command(alias = "submit")]
    Flush,

    /// Reload tasks from the server, keeping unsubmitted changes
    Reload,

    Help,

    #[command(alias = "exit")]
    Quit,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SubCommand {
    /// Add a subtask under a task
    Add {
        task: EntityId,
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        due: Option<String>,
    },

    /// Change fields of a subtask
    Edit {
        id: EntityId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, conflicts_with = "no_due")]
        due: Option<String>,
        #[arg(long = "no-due")]
        no_due: bool,
    },

    #[command(alias = "delete")]
    Rm { id: EntityId },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum FilterCommand {
    /// `pending`, `done` or `all`
    Status { value: String },
    /// Calendar day as YYYY-MM-DD; no argument clears it
    Due { day: Option<String> },
    /// Case-insensitive title substring; no argument clears it
    Title { text: Vec<String> },
    Clear,
}

/// Splits a prompt line shell-style and parses it. Blank lines and
/// comments yield `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<ShellCommand>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let words = shlex::split(trimmed).ok_or_else(|| anyhow!("unbalanced quotes in: {trimmed}"))?;
    let parsed = ShellLine::try_parse_from(words)
        .map_err(|err| anyhow!("{}", err.render().to_string().trim_end()))?;
    Ok(Some(parsed.command))
}

pub fn shell_help() -> String {
    ShellLine::command().render_help().to_string()
}
