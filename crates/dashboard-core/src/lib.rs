pub mod animation;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod datastore;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod migrate;
pub mod modal;
pub mod mutation;
pub mod notify;
pub mod render;
pub mod stats;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
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
    "starting dashboard CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let storage =
    datastore::LocalStorage::open_dir(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open local storage \
         at {}",
        data_dir.display()
      )
    })?;

  let timings =
    config::Timings::from_config(&cfg)?;
  let backend = backend::Retrying::new(
    backend::LocalBackend::new(
      storage.clone()
    ),
    config::retry_policy(&cfg)?
  );

  let mut dashboard =
    dashboard::Dashboard::new(
      backend,
      storage,
      cfg.owner(),
      timings
    )?;
  dashboard.load()?;

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    &mut dashboard,
    &cfg,
    &mut renderer,
    inv
  )?;

  info!("done");
  Ok(())
}
