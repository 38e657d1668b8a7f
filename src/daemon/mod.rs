// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Module
//!
//! Runs the bench as a background service: one hardware session per
//! configured channel, the command executor, the command server, the progress
//! publisher and a heartbeat.
//!
//! ## Usage
//!
//! ```no_run
//! use juice_scm_gse::{config::Config, daemon::Daemon};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("juice_scm_gse.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     // Stops the executor and powers every channel off
//!     daemon.shutdown().await;
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;

pub use launch_daemon::{power_off_all, Daemon};
