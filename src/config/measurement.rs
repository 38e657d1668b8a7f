// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Default parameters of the measurement phases
//!
//! Every value here can be overridden per command through the command
//! arguments; these are used when an argument is omitted.

use serde::{Deserialize, Serialize};

use crate::utility::logspace;

/// Noise spectral density phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsdConfig {
    /// Number of output snapshots averaged into one PSD curve
    pub snapshots_count: usize,
    /// Sampling frequency of the snapshots in Hz
    pub sampling_freq: f64,
    /// Samples per snapshot
    pub buffer_size: usize,
}

impl Default for PsdConfig {
    fn default() -> Self {
        Self {
            snapshots_count: 10,
            sampling_freq: 100_000.0,
            buffer_size: 8192,
        }
    }
}

/// Dynamic (sine sweep) transfer function phase
///
/// Drive frequencies are `freq_points` values evenly spaced on a log scale
/// from `10^start_freq_exp` to `10^stop_freq_exp` Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicTfConfig {
    pub start_freq_exp: f64,
    pub stop_freq_exp: f64,
    pub freq_points: usize,
    /// Sine amplitude in volts
    pub amplitude: f64,
    /// Width in bins of the neighbourhood merged around each peak
    pub merge_width: usize,
}

impl Default for DynamicTfConfig {
    fn default() -> Self {
        Self {
            start_freq_exp: 0.0,
            stop_freq_exp: 6.0,
            freq_points: 200,
            amplitude: 0.1,
            merge_width: 50,
        }
    }
}

impl DynamicTfConfig {
    /// Drive frequencies of the sweep, ascending
    pub fn frequencies(&self) -> Vec<f64> {
        logspace(self.start_freq_exp, self.stop_freq_exp, self.freq_points)
    }
}

/// Static (DC sweep) transfer function phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTfConfig {
    /// Half span of the sweep around the nulled bias, in volts
    pub amplitude: f64,
    /// Number of DC levels, both ends included
    pub steps: usize,
    /// Wait after each level change, in milliseconds
    pub step_settle_ms: u64,
    /// Samples averaged at each level
    pub samples_per_step: usize,
    /// Sampling frequency at each level in Hz
    pub sampling_freq: f64,
}

impl Default for StaticTfConfig {
    fn default() -> Self {
        Self {
            amplitude: 0.5,
            steps: 100,
            step_settle_ms: 10,
            samples_per_step: 1024,
            sampling_freq: 100_000.0,
        }
    }
}

/// DC probe levels used to estimate the input offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetNullingConfig {
    pub probe_low: f64,
    pub probe_high: f64,
}

impl Default for OffsetNullingConfig {
    fn default() -> Self {
        Self {
            probe_low: -0.1,
            probe_high: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_sweep_spans_one_hz_to_one_megahertz() {
        let freqs = DynamicTfConfig::default().frequencies();
        assert_eq!(freqs.len(), 200);
        assert_relative_eq!(freqs[0], 1.0);
        assert_relative_eq!(freqs[199], 1e6, max_relative = 1e-12);
        assert!(freqs.windows(2).all(|w| w[0] < w[1]));
    }
}
