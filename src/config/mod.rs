// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the characterization bench
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! The configuration is organized in sections:
//! - `server`: Command and progress TCP endpoints
//! - `output`: Root directory of the measurement artifacts
//! - `hardware`: Channels, drivers, settle delay and reconnect policy
//! - `psd`, `dynamic_tf`, `static_tf`, `offset_nulling`: Default parameters
//!   of the measurement phases
//!
//! ## Usage
//!
//! ```no_run
//! use juice_scm_gse::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("0.0.0.0".to_string()), // Listen address
//!     Some(19992),                 // Command port
//!     None,                        // Progress port
//!     None,                        // Work directory
//!     Some(0),                     // Settle delay
//! );
//!
//! println!("Command port: {}", config.server.command_port);
//! ```

pub mod hardware;
pub mod measurement;
pub mod server;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use hardware::{ChannelConfig, DriverKind, HardwareConfig, SimulatorConfig};
pub use measurement::{DynamicTfConfig, OffsetNullingConfig, PsdConfig, StaticTfConfig};
pub use server::{OutputConfig, ServerConfig};
pub use utils::{output_config_schema, validate_specific_rules};

/// Root configuration structure of the bench.
///
/// Each section uses default values when not explicitly specified in the
/// configuration file, allowing for minimal configuration files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Command and progress endpoints.
    #[serde(default)]
    pub server: ServerConfig,

    /// Where artifacts are written when a command gives no directory.
    #[serde(default)]
    pub output: OutputConfig,

    /// Bench channels and hardware timing.
    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub psd: PsdConfig,

    #[serde(default)]
    pub dynamic_tf: DynamicTfConfig,

    #[serde(default)]
    pub static_tf: StaticTfConfig,

    #[serde(default)]
    pub offset_nulling: OffsetNullingConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Parse the embedded JSON schema
    fn schema() -> Result<serde_json::Value> {
        let schema_str = include_str!("../../resources/config.schema.json");
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")
    }

    /// Validate a YAML document against the schema without deserializing it
    pub fn validate_yaml(contents: &str) -> Result<()> {
        let yaml_value: serde_yml::Value =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;
        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let schema = Self::schema()?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        if let Err(error) = validator.validate(&json_value) {
            anyhow::bail!("Configuration validation failed: {}", error);
        }
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file that
    /// fails validation leaves a `<name>.sample.yaml` next to it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(err) = Self::validate_yaml(&contents) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            return Err(err.context(format!("Invalid configuration in {}", path.display())));
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only the values actually provided override the loaded configuration.
    ///
    /// # Parameters
    ///
    /// * `address` - Address the command and progress listeners bind to
    /// * `command_port` - TCP port of the command channel
    /// * `progress_port` - TCP port of the progress channel
    /// * `workdir` - Root directory of the measurement artifacts
    /// * `settle_delay_ms` - Delay after each power transition
    pub fn apply_args(
        &mut self,
        address: Option<String>,
        command_port: Option<u16>,
        progress_port: Option<u16>,
        workdir: Option<PathBuf>,
        settle_delay_ms: Option<u64>,
    ) {
        if let Some(address) = address {
            debug!("Overriding address from command line: {}", address);
            self.server.address = address;
        }
        if let Some(port) = command_port {
            debug!("Overriding command port from command line: {}", port);
            self.server.command_port = port;
        }
        if let Some(port) = progress_port {
            debug!("Overriding progress port from command line: {}", port);
            self.server.progress_port = port;
        }
        if let Some(workdir) = workdir {
            debug!("Overriding workdir from command line: {:?}", workdir);
            self.output.workdir = workdir;
        }
        if let Some(delay) = settle_delay_ms {
            debug!("Overriding settle delay from command line: {} ms", delay);
            self.hardware.settle_delay_ms = delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_args_only_overrides_given_values() {
        let mut config = Config::default();
        config.apply_args(None, Some(12345), None, Some(PathBuf::from("/data")), None);
        assert_eq!(config.server.command_port, 12345);
        assert_eq!(config.server.progress_port, 9991);
        assert_eq!(config.server.address, "127.0.0.1");
        assert_eq!(config.output.workdir, PathBuf::from("/data"));
        assert_eq!(config.hardware.settle_delay_ms, 2000);
    }

    #[test]
    fn test_default_config_matches_schema() {
        let yaml = serde_yml::to_string(&Config::default()).unwrap();
        Config::validate_yaml(&yaml).unwrap();
    }

    #[test]
    fn test_schema_rejects_unknown_driver() {
        let yaml = r#"
hardware:
  settle_delay_ms: 0
  max_retries: 1
  retry_delay_ms: 0
  current_limit: 11mA
  channels:
    - id: CHX
      driver: picoscope
      device: 0
"#;
        assert!(Config::validate_yaml(yaml).is_err());
    }
}
