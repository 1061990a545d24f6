//! modlink service binary
//!
//! Runs the poller against real Modbus TCP servers and prints every delta as
//! one JSON line on stdout. Logs go to stderr (and optionally a file).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use common::{wait_for_shutdown_or, ShutdownTrigger};
use modlink::{compile_mappings, PluginConfig, PluginController, StdoutBus, TcpConnector};
use modlink_calc::CalcEngine;
use tracing::{error, info};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "modlink",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus TCP polling bridge",
    long_about = None
)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, env = "MODLINK_CONFIG", default_value = "config/modlink.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Context id stamped on every delta
    #[arg(long, env = "MODLINK_CONTEXT", default_value = "vessels.self")]
    context: String,

    /// Validation mode - load the configuration, compile every expression, exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = PluginConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    let _log_guard = common::init_logging("modlink", &config.logging)
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    info!("modlink {} starting", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    if args.validate {
        let engine = CalcEngine::new();
        for connection in &config.connections {
            compile_mappings(&engine, connection)?;
        }
        info!(
            "Configuration valid: {} connection(s), {} mapping(s)",
            config.connections.len(),
            config.mapping_count()
        );
        return Ok(());
    }

    let bus = Arc::new(StdoutBus::new(args.context));
    let plugin = PluginController::new(TcpConnector, CalcEngine::new(), bus);
    plugin.start(config).await?;

    match wait_for_shutdown_or(plugin.wait_stopped()).await {
        ShutdownTrigger::Signal => {
            plugin.stop().await;
            info!("modlink stopped");
            Ok(())
        },
        ShutdownTrigger::Internal => {
            error!("Plugin stopped after a polling failure");
            bail!("plugin stopped after a polling failure")
        },
    }
}
