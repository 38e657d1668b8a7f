// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point of the ASIC characterization bench daemon
use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use tokio::signal;

use juice_scm_gse::config::{self, Config};
use juice_scm_gse::daemon::Daemon;

/// Measurement daemon of the sensor ASIC characterization bench
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Address the command and progress sockets bind to
    #[arg(short, long)]
    address: Option<String>,

    /// Command server port
    #[arg(long)]
    command_port: Option<u16>,

    /// Progress publisher port
    #[arg(long)]
    progress_port: Option<u16>,

    /// Root directory of the measurement artifacts
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Delay after each power transition, in milliseconds
    #[arg(long)]
    settle_delay_ms: Option<u64>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

/// Resolves on SIGTERM; never on platforms without it
async fn terminate() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        sigterm.recv().await;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        std::future::pending().await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {:#}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("juice_scm_gse.yaml"));
    let mut config = Config::from_file(&config_path)?;

    config.apply_args(
        args.address.clone(),
        args.command_port,
        args.progress_port,
        args.workdir.clone(),
        args.settle_delay_ms,
    );

    info!("Starting in daemon mode");
    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    // Every exit path goes through the power-off hook
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received interrupt, terminating daemon"),
            Err(err) => error!("Error waiting for shutdown signal: {}", err),
        },
        result = terminate() => match result {
            Ok(()) => info!("Received SIGTERM, terminating daemon"),
            Err(err) => error!("Error waiting for SIGTERM: {:#}", err),
        },
        result = daemon.wait_for_executor() => match result {
            Ok(()) => info!("Command executor stopped, terminating daemon"),
            Err(err) => error!("{:#}, terminating daemon", err),
        },
    }

    daemon.shutdown().await;
    daemon.join().await?;
    Ok(())
}
