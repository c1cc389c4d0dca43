//! Interactive console for Modbus TCP coils.

use anyhow::{Context, Result};
use clap::Parser;
use coilterm::config::CoilTermConfig;
use coilterm::console::Console;
use coilterm::session::CoilSession;
use coilterm::transport::WIRE_TARGET;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{error, info};

/// Read and write coils on a Modbus TCP unit.
#[derive(Parser, Debug)]
#[command(name = "coilterm")]
#[command(about = "Interactive Modbus TCP coil console")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device IP address or hostname (prompted for when omitted)
    #[arg(long)]
    host: Option<String>,

    /// Device TCP port (prompted for when omitted)
    #[arg(short, long)]
    port: Option<u16>,

    /// Modbus unit identifier
    #[arg(long)]
    unit_id: Option<u8>,

    /// Connect and response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pause between a coil write and its confirmation read, in milliseconds
    #[arg(long)]
    settle_delay_ms: Option<u64>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Log every Modbus request and response.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Layer command line overrides over the file configuration.
    fn apply(&self, config: &mut CoilTermConfig) {
        if let Some(host) = &self.host {
            config.connection.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.connection.port = Some(port);
        }
        if let Some(unit_id) = self.unit_id {
            config.connection.unit_id = unit_id;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.connection.timeout_ms = timeout_ms;
        }
        if let Some(settle_delay_ms) = self.settle_delay_ms {
            config.session.settle_delay_ms = settle_delay_ms;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.verbose |= self.verbose;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => CoilTermConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => CoilTermConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    let mut log_config = config.logging.clone();
    if config.verbose {
        log_config = log_config.with_directive(&format!("{}=debug", WIRE_TARGET));
    }
    coilterm_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting coilterm");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut console = Console::new(stdin, std::io::stdout(), std::io::stderr())
        .with_menu_pause(config.session.menu_pause());

    let Some((host, port)) = console
        .prompt_endpoint(config.connection.host.clone(), config.connection.port)
        .await?
    else {
        return Ok(());
    };

    let settings = config.connection.tcp_settings(host, port);
    let mut session = CoilSession::connect(&settings, config.session.options())
        .await
        .with_context(|| format!("Modbus connection to {} failed", settings.endpoint()))?;
    console.info("Connection established.")?;

    let result = console.run(&mut session).await;

    if let Err(e) = session.close().await {
        error!("Failed to close connection: {}", e);
    }
    info!("coilterm stopped");

    result.context("Console I/O failed")
}
