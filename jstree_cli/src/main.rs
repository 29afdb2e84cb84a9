//! Command line entry point: loads a script, resolves its root tree, and
//! ticks it on an interval until interrupted.

use jstree_core::bridge::Bridge;
use jstree_core::config;
use jstree_core::error::AnyResult;
use jstree_core::js::JsRuntimeOptions;
use jstree_core::log;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// A multi-threaded behavior-tree engine bridged to an embedded
/// single-threaded JavaScript runtime.
#[derive(Debug, Parser)]
#[command(name = "jstree", version, about)]
struct Cli {
  /// Path to the JavaScript entry script.
  script: PathBuf,

  /// Global the script is expected to assign its root `bt.Node` to.
  #[arg(long, default_value = "tree")]
  root: String,

  /// Tick interval, in milliseconds.
  #[arg(long, default_value_t = 100)]
  interval_ms: u64,

  /// Path to a config file; overrides `JSTREE_CONFIG` and the usual
  /// discovery order when given.
  #[arg(long)]
  config: Option<PathBuf>,
}

fn main() -> AnyResult<()> {
  log::init();
  let cli = Cli::parse();
  debug!(?cli, "parsed command line options");

  let config_path = cli.config.clone().or_else(config::discover_config_path);
  if let Some(path) = &config_path {
    match config::Config::load_from_path(path) {
      Ok(cfg) => info!(sessions = ?cfg.sessions, "loaded config from {}", path.display()),
      Err(e) => tracing::warn!("failed to load config at {}: {e}", path.display()),
    }
  }

  let source = std::fs::read_to_string(&cli.script)?;
  let script_name = cli
    .script
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("script.js")
    .to_string();

  let runtime = tokio::runtime::Runtime::new()?;
  runtime.block_on(async move {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge.load_script(script_name, source)?;

    let root = bridge.get_root_node(&cli.root)?;
    let manager = bridge.manager();
    let ticker = manager.new_ticker(Duration::from_millis(cli.interval_ms), root, bridge.done());

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    ticker.stop().await;
    bridge.stop();

    Ok::<(), jstree_core::error::AnyErr>(())
  })?;

  Ok(())
}
