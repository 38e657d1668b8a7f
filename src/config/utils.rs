// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::HashSet;

use super::Config;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./juice_scm_gse --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");
    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

/// Check if a string is a valid IP address or one of the special bind names
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// # Validation Rules
///
/// - **Ports**: command and progress ports are distinct
/// - **Channels**: at least one channel, identifiers unique
/// - **Current limit**: parses as a current with unit, strictly positive
/// - **Sweeps**: frequency exponents ascending, offset probes distinct
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.server.command_port == config.server.progress_port {
        anyhow::bail!(
            "Command and progress ports must differ (both {})",
            config.server.command_port
        );
    }
    if !is_valid_ip_address(&config.server.address) {
        // Hostnames are accepted, only warn
        warn!(
            "Potentially invalid address format: {}",
            config.server.address
        );
    }

    if config.hardware.channels.is_empty() {
        anyhow::bail!("At least one hardware channel must be configured");
    }
    let mut seen = HashSet::new();
    for channel in &config.hardware.channels {
        if !seen.insert(channel.id.as_str()) {
            anyhow::bail!("Duplicate channel id: {}", channel.id);
        }
    }

    let limit = config.hardware.current_limit_amps()?;
    if limit <= 0.0 {
        anyhow::bail!(
            "Current limit must be positive: {}",
            config.hardware.current_limit
        );
    }

    if config.dynamic_tf.start_freq_exp > config.dynamic_tf.stop_freq_exp {
        anyhow::bail!(
            "Dynamic sweep start exponent {} is above stop exponent {}",
            config.dynamic_tf.start_freq_exp,
            config.dynamic_tf.stop_freq_exp
        );
    }
    if config.offset_nulling.probe_low == config.offset_nulling.probe_high {
        anyhow::bail!("Offset nulling probes must be two distinct levels");
    }

    Ok(())
}
