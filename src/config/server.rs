// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Network and output location configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of the command server and the progress publisher.
///
/// # Fields
///
/// * `address` - Network address both listeners bind to (default: 127.0.0.1)
/// * `command_port` - TCP port receiving commands (default: 9992)
/// * `progress_port` - TCP port streaming progress events (default: 9991)
///
/// # Example
///
/// ```
/// use juice_scm_gse::config::ServerConfig;
///
/// let server = ServerConfig {
///     address: "0.0.0.0".to_string(),
///     command_port: 19992,
///     progress_port: 19991,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The network address the listeners bind to.
    ///
    /// Use "0.0.0.0" to accept commands from other hosts.
    pub address: String,

    /// The TCP port of the command channel.
    pub command_port: u16,

    /// The TCP port of the progress channel.
    pub progress_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            command_port: 9992,
            progress_port: 9991,
        }
    }
}

/// Where measurement artifacts are written when a command gives no explicit directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory; artifacts land in `<workdir>/<channel>/<phase>`
    pub workdir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/tmp"),
        }
    }
}

impl OutputConfig {
    /// Default directory of one measurement phase of one channel
    pub fn phase_dir(&self, channel: &str, phase: &str) -> PathBuf {
        self.workdir.join(channel).join(phase)
    }
}
