// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Hardware abstraction for the characterization bench
//!
//! Each ASIC channel is driven through one [`HardwareSession`]: a power switch,
//! a two-output signal generator and a two-input oscilloscope. By convention
//! analog input 0 senses the stimulus applied to the ASIC and analog input 1
//! captures the ASIC output; generator output 0 drives the ASIC input.
//!
//! Available implementations:
//! - [`simulated::SimulatedSession`]: a linear ASIC model with configurable
//!   gain, offset, delay and noise
//! - [`retry::RetryingSession`]: wraps any session and reconnects on
//!   communication errors, a bounded number of times

pub mod retry;
pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::hardware::{ChannelConfig, DriverKind, HardwareConfig};
use crate::spectral::Waveform;

pub use retry::RetryingSession;
pub use simulated::{SessionEvent, SimulatedSession};

/// Oscilloscope input sensing the stimulus applied to the ASIC
pub const INPUT_CHANNEL: usize = 0;
/// Oscilloscope input capturing the ASIC output
pub const OUTPUT_CHANNEL: usize = 1;
/// Generator output wired to the ASIC input
pub const GENERATOR_CHANNEL: usize = 0;

/// Errors reported by a hardware session
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HardwareError {
    /// Link-level failure, recoverable by reconnecting
    #[error("communication error: {0}")]
    Communication(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// The request is outside the device capabilities
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("device disconnected: {0}")]
    Disconnected(String),
}

impl HardwareError {
    /// Whether reconnecting the link may clear the error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HardwareError::Communication(_))
    }
}

/// Signal generator programming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalogOutput {
    /// Constant level in volts
    Dc { channel: usize, offset: f64 },
    /// `offset + amplitude * sin(2π * frequency * t)`
    Sine {
        channel: usize,
        amplitude: f64,
        offset: f64,
        frequency: f64,
    },
}

impl AnalogOutput {
    pub fn channel(&self) -> usize {
        match self {
            AnalogOutput::Dc { channel, .. } | AnalogOutput::Sine { channel, .. } => *channel,
        }
    }

    /// Instantaneous level at time `t` (seconds)
    pub fn level_at(&self, t: f64) -> f64 {
        match *self {
            AnalogOutput::Dc { offset, .. } => offset,
            AnalogOutput::Sine {
                amplitude,
                offset,
                frequency,
                ..
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin(),
        }
    }
}

/// Oscilloscope capture request
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    /// Analog inputs to capture, all sampled simultaneously
    pub channels: Vec<usize>,
    /// Target sampling rate in Hz; the device may round it
    pub sample_rate: f64,
    /// Samples per channel
    pub samples: usize,
    /// Full-scale voltage range
    pub range: f64,
}

/// Result of a capture, one waveform per requested channel in request order
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub waveforms: Vec<Waveform>,
    /// Sampling rate the device actually used
    pub sample_rate: f64,
}

/// Capabilities of the acquisition device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceLimits {
    pub max_sample_rate: f64,
    pub max_buffer_size: usize,
    pub output_min: f64,
    pub output_max: f64,
    /// Supply current limit programmed at power on, in amperes
    pub current_limit: f64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_sample_rate: 100e6,
            max_buffer_size: 8192,
            output_min: -5.0,
            output_max: 5.0,
            current_limit: 0.011,
        }
    }
}

impl DeviceLimits {
    /// Clamp a generator level to the output range
    pub fn clamp_output(&self, level: f64) -> f64 {
        level.clamp(self.output_min, self.output_max)
    }
}

/// One channel of the bench: power control, generator and oscilloscope
///
/// Sessions are not safe for concurrent use; callers serialize access
/// (the daemon keeps each one behind a `tokio::sync::Mutex`).
#[async_trait]
pub trait HardwareSession: Send {
    /// Channel identifier (e.g. `CHX`)
    fn channel(&self) -> &str;

    /// Switch the ASIC supply on
    async fn power_on(&mut self) -> Result<(), HardwareError>;

    /// Switch the ASIC supply off
    async fn power_off(&mut self) -> Result<(), HardwareError>;

    /// Program the signal generator
    async fn generate(&mut self, output: AnalogOutput) -> Result<(), HardwareError>;

    /// Capture the requested analog inputs
    async fn acquire(&mut self, request: &AcquisitionRequest)
        -> Result<Acquisition, HardwareError>;

    fn limits(&self) -> DeviceLimits;

    /// Close and reopen the link to the device
    async fn reconnect(&mut self) -> Result<(), HardwareError>;
}

/// Open the session of one configured channel, wrapped for bounded retries
pub fn open_session(
    channel: &ChannelConfig,
    hardware: &HardwareConfig,
) -> Result<Box<dyn HardwareSession>> {
    let retry_delay = Duration::from_millis(hardware.retry_delay_ms);
    match channel.driver {
        DriverKind::Simulated => {
            info!(
                "Opening simulated session for channel {} (device {})",
                channel.id, channel.device
            );
            let session = SimulatedSession::new(&channel.id, &channel.simulator).with_limits(
                DeviceLimits {
                    current_limit: hardware.current_limit_amps()?,
                    ..DeviceLimits::default()
                },
            );
            Ok(Box::new(RetryingSession::new(
                session,
                hardware.max_retries,
                retry_delay,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_analog_output_levels() {
        let dc = AnalogOutput::Dc {
            channel: 0,
            offset: 0.25,
        };
        assert_eq!(dc.level_at(1.0), 0.25);

        let sine = AnalogOutput::Sine {
            channel: 1,
            amplitude: 2.0,
            offset: 1.0,
            frequency: 10.0,
        };
        assert_eq!(sine.channel(), 1);
        assert_relative_eq!(sine.level_at(0.025), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_only_communication_errors_are_recoverable() {
        assert!(HardwareError::Communication("usb".into()).is_recoverable());
        assert!(!HardwareError::InvalidRequest("rate".into()).is_recoverable());
        assert!(!HardwareError::Disconnected("gone".into()).is_recoverable());
    }

    #[test]
    fn test_clamp_output() {
        let limits = DeviceLimits::default();
        assert_eq!(limits.clamp_output(7.0), 5.0);
        assert_eq!(limits.clamp_output(-7.0), -5.0);
        assert_eq!(limits.clamp_output(1.5), 1.5);
    }

    #[test]
    fn test_open_session_for_simulated_channel() {
        let hardware = HardwareConfig::default();
        let channel = &hardware.channels[0];
        let session = open_session(channel, &hardware).unwrap();
        assert_eq!(session.channel(), channel.id);
    }

    #[test]
    fn test_open_session_programs_current_limit() {
        let hardware = HardwareConfig {
            current_limit: "300uA".to_string(),
            ..HardwareConfig::default()
        };
        let session = open_session(&hardware.channels[1], &hardware).unwrap();
        assert_relative_eq!(session.limits().current_limit, 300e-6);

        let broken = HardwareConfig {
            current_limit: "lots".to_string(),
            ..HardwareConfig::default()
        };
        assert!(open_session(&broken.channels[0], &broken).is_err());
    }
}
