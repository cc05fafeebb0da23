pub mod cli;
pub mod config;
pub mod datetime;
pub mod error;
pub mod filter;
pub mod model;
pub mod remote;
pub mod render;
pub mod session;
pub mod shell;
pub mod sync;
pub mod tracker;
pub mod view;
pub mod workspace;

use std::ffi::OsString;
use std::io::{
  self,
  IsTerminal
};

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info,
  warn
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskbatch"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  if let Some(url) = cli.api_url {
    cfg.set("api.url", url);
  }
  debug!(
    keys = cfg.iter().count(),
    files = ?cfg.loaded_files,
    "configuration ready"
  );

  let settings =
    remote::RemoteSettings::from_config(
      &cfg
    )
    .context(
      "invalid task API settings"
    )?;
  let remote =
    remote::HttpRemote::new(&settings)?;
  let session =
    session::Session::resolve(
      &cfg, cli.token
    );

  let tz =
    datetime::resolve_timezone(&cfg)?;
  let renderer =
    render::Renderer::new(&cfg, tz)?;

  let mut ws = workspace::Workspace::new(
    sync::Synchronizer::new(
      remote, session
    ),
    tz
  );

  let stdout = io::stdout();
  let mut out = stdout.lock();
  match ws.load() {
    | Ok(count) => {
      info!(
        tasks = count,
        api = %settings.base_url,
        "initial load complete"
      );
    }
    | Err(err) => {
      warn!(error = %err, "initial load failed");
      renderer
        .print_error(&mut out, &err)?;
    }
  }

  let stdin = io::stdin();
  let interactive =
    stdin.is_terminal();
  shell::run_shell(
    &mut ws,
    &renderer,
    stdin.lock(),
    &mut out,
    interactive
  )?;

  info!("done");
  Ok(())
}
