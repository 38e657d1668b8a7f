// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Hardware configuration
//!
//! This module defines the bench channels, the driver used for each of them
//! and the timing rules shared by all sessions (settle delay, reconnect
//! policy).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Hardware section of the configuration.
///
/// # Example
///
/// ```yaml
/// hardware:
///   settle_delay_ms: 2000
///   max_retries: 3
///   retry_delay_ms: 500
///   current_limit: 11mA
///   channels:
///     - id: CHX
///       driver: simulated
///       device: -1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Delay after every power transition, in milliseconds.
    ///
    /// The ASIC needs about two seconds to stabilise after power on.
    pub settle_delay_ms: u64,

    /// Reconnect attempts after a communication error before giving up.
    pub max_retries: u32,

    /// Pause before each reconnect attempt, in milliseconds.
    pub retry_delay_ms: u64,

    /// Supply current limit, with unit (`A`, `mA` or `uA`).
    pub current_limit: String,

    /// Channels of the bench, one hardware session each.
    pub channels: Vec<ChannelConfig>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2000,
            max_retries: 3,
            retry_delay_ms: 500,
            current_limit: "11mA".to_string(),
            channels: ["CHX", "CHY", "CHZ"]
                .iter()
                .zip(1u32..)
                .map(|(id, seed)| ChannelConfig {
                    id: id.to_string(),
                    driver: DriverKind::Simulated,
                    device: -1,
                    simulator: SimulatorConfig {
                        seed,
                        ..SimulatorConfig::default()
                    },
                })
                .collect(),
        }
    }
}

impl HardwareConfig {
    /// Current limit in amperes
    pub fn current_limit_amps(&self) -> Result<f64> {
        parse_current(&self.current_limit)
    }
}

/// Parse a current such as `11mA`, `0.5A` or `300uA`
fn parse_current(value: &str) -> Result<f64> {
    let value = value.trim();
    let (number, scale) = if let Some(n) = value.strip_suffix("mA") {
        (n, 1e-3)
    } else if let Some(n) = value.strip_suffix("uA") {
        (n, 1e-6)
    } else if let Some(n) = value.strip_suffix('A') {
        (n, 1.0)
    } else {
        anyhow::bail!("Current '{}' has no unit (A, mA or uA)", value);
    };
    let number: f64 = number
        .trim()
        .parse()
        .with_context(|| format!("Invalid current value '{}'", value))?;
    Ok(number * scale)
}

/// One channel of the bench
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel identifier used in commands (e.g. `CHX`)
    pub id: String,

    /// Driver used to reach the channel hardware
    pub driver: DriverKind,

    /// Acquisition card index, -1 for the first available one
    pub device: i32,

    /// Model parameters, used by the `simulated` driver
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Available hardware drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Linear ASIC model, no hardware required
    Simulated,
}

/// Parameters of the simulated ASIC
///
/// `output = gain * (input(t - delay) + offset) + noise`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub gain: f64,
    /// Input-referred offset in volts
    pub offset: f64,
    /// Propagation delay in seconds
    pub delay: f64,
    /// Standard deviation of the output noise in volts
    pub noise_rms: f64,
    pub seed: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            offset: 0.0,
            delay: 0.0,
            noise_rms: 1e-4,
            seed: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_current() {
        assert_relative_eq!(parse_current("11mA").unwrap(), 0.011);
        assert_relative_eq!(parse_current("0.5A").unwrap(), 0.5);
        assert_relative_eq!(parse_current("300uA").unwrap(), 300e-6);
        assert!(parse_current("11").is_err());
        assert!(parse_current("xmA").is_err());
    }

    #[test]
    fn test_default_channels() {
        let config = HardwareConfig::default();
        let ids: Vec<&str> = config.channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["CHX", "CHY", "CHZ"]);
        assert_ne!(config.channels[0].simulator.seed, config.channels[1].simulator.seed);
    }
}
