// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use serde::{Deserialize, Serialize};

/// A captured sequence of real samples and the rate it was sampled at
///
/// Waveforms are immutable once captured: the acquisition layer builds them and
/// the analysis steps only borrow their samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    samples: Vec<f64>,
    sampling_frequency: f64,
}

impl Waveform {
    /// Wrap `samples` captured at `sampling_frequency` Hz
    pub fn new(samples: Vec<f64>, sampling_frequency: f64) -> Self {
        Self {
            samples,
            sampling_frequency,
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Arithmetic mean of the samples, 0 for an empty waveform
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }
}
