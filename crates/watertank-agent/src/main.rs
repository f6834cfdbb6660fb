//! watertank-agent - water tank sensor device agent
//!
//! Runs the device loop on a host: reads cloud commands from stdin, reports
//! update progress, and applies OTA firmware updates to a file-backed A/B
//! flash.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod config;
mod error;
mod file_flash;
mod output;
mod runtime;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watertank_ota::prelude::*;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::file_flash::FileFlash;

/// Version this build reports as its running firmware
const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "watertank-agent")]
#[command(about = "Water tank sensor device agent with OTA firmware updates")]
#[command(version)]
#[command(long_about = "
watertank-agent runs the water tank sensor's device loop on a host machine.
Cloud commands (TriggerSoftwareUpdate, SwitchToPreviousPartition, Reboot, Quit)
are read one per line from stdin. Firmware images are written to a
file-backed A/B flash directory.

Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "WATERTANK_CONFIG",
        default_value = "watertank.json"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device loop until a Quit command arrives
    Run,

    /// Ask the firmware service whether an update is available
    Check,

    /// Show running firmware and flash partitions
    Status,

    /// Boot the previously used partition
    Rollback,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("watertank_agent={log_level},watertank_ota={log_level}").into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let result = execute_command(&cli).await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let exit_code = e.downcast_ref::<AgentError>().map_or(1, AgentError::exit_code);
            exit_with(exit_code)
        }
    }
}

#[expect(clippy::exit, reason = "exit code carries the error class to scripts")]
fn exit_with(code: i32) -> ! {
    std::process::exit(code)
}

async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::InitConfig { force } => init_config(&cli.config, *force, cli.json).await,
        Commands::Status => {
            let config = load_config(&cli.config).await?;
            let flash = open_flash(&config, &cli.config).await?;
            let status = flash.status().await.map_err(flash_error)?;
            output::print_status(FIRMWARE_VERSION, &status, cli.json);
            Ok(())
        }
        Commands::Check => {
            let config = load_config(&cli.config).await?;
            let service = build_service(&config, &cli.config).await?;
            let outcome = service.check_now().await.map_err(AgentError::from)?;
            output::print_check_outcome(FIRMWARE_VERSION, &outcome, cli.json);
            Ok(())
        }
        Commands::Rollback => {
            let config = load_config(&cli.config).await?;
            let service = build_service(&config, &cli.config).await?;
            match service.rollback().await {
                Ok(never) => match never {},
                Err(e) => Err(AgentError::from(e).into()),
            }
        }
        Commands::Run => {
            let config = load_config(&cli.config).await?;
            let service = Arc::new(build_service(&config, &cli.config).await?);
            let flags = Arc::new(CommandFlags::new());
            if config.check_on_start {
                flags.raise(DeviceCommand::TriggerUpdate);
            }

            info!(version = FIRMWARE_VERSION, "Water tank agent starting");
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            runtime::run_loop(service, flags, input, config.report_interval()).await
        }
    }
}

async fn init_config(path: &Path, force: bool, json: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(AgentError::InvalidConfiguration(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ))
        .into());
    }

    AgentConfig::default().save_to_path(path).await?;
    output::print_success(&format!("Wrote {}", path.display()), json);
    Ok(())
}

async fn load_config(path: &Path) -> Result<AgentConfig> {
    let mut config = AgentConfig::load_from_path(path)
        .await
        .map_err(|e| AgentError::InvalidConfiguration(format!("{e:#}")))?;
    config.ota.firmware_version = FIRMWARE_VERSION.to_string();
    config.validate()?;
    Ok(config)
}

fn flash_error(e: anyhow::Error) -> AgentError {
    AgentError::Flash(format!("{e:#}"))
}

async fn open_flash(config: &AgentConfig, config_path: &Path) -> Result<FileFlash, AgentError> {
    FileFlash::open(config.resolve_flash_dir(config_path))
        .await
        .map_err(flash_error)
}

async fn build_service(config: &AgentConfig, config_path: &Path) -> Result<UpdateService> {
    let flash = Arc::new(open_flash(config, config_path).await?);
    let transport = HttpTransport::new(config.ota.request_timeout())
        .map_err(|e| AgentError::Update(UpdateError::Transport(format!("{e:#}"))))?;

    let service = UpdateService::builder(config.ota.clone(), Arc::new(transport), flash)
        .connectivity(Connectivity::always())
        .build()
        .map_err(AgentError::from)?;
    Ok(service)
}
