mod api;
mod cache;
mod commands;
mod config;
mod error;
mod guard;
mod loader;
mod optimistic;
mod pager;
mod query;
mod search;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(about = "Offline-friendly client for equipment inventory APIs")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/depot/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  init_tracing();

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let service = api::service::InventoryService::new(&config)?;

  commands::run(args.command, &service).await?;

  // Persist the cache so the next invocation starts warm.
  service.flush();

  Ok(())
}

/// Log to a file so stdout stays clean for command output.
fn init_tracing() {
  let Some(dir) = dirs::data_dir().map(|d| d.join("depot")) else {
    return;
  };
  if std::fs::create_dir_all(&dir).is_err() {
    return;
  }

  let appender = tracing_appender::rolling::never(dir, "depot.log");
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(appender)
    .with_ansi(false)
    .init();
}
