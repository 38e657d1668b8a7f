// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Measurement phases of the characterization bench
//!
//! - [`noise`]: output noise spectral density from averaged snapshots
//! - [`transfer_function`]: offset nulling, dynamic (sine) and static (DC)
//!   transfer function sweeps
//! - [`sequencer`]: the PSD → dynamic TF → static TF sequence of one channel,
//!   with power toggling, settle delays and progress reporting
//!
//! All phases talk to the hardware through a `&mut dyn HardwareSession`,
//! write their artifacts with an [`ArtifactWriter`](crate::storage::ArtifactWriter)
//! and publish progress through a [`PhaseReporter`].

pub mod noise;
pub mod sequencer;
pub mod transfer_function;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hardware::HardwareError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::spectral::AnalysisError;

pub use sequencer::{MeasurementSequencer, SequenceOutcome, SequencePlan, SequencerState};
pub use transfer_function::{DcCapture, DynamicSweep};

/// Full-scale range requested for every capture, in volts
pub const INPUT_RANGE: f64 = 5.0;

/// One point of a dynamic transfer function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicPoint {
    /// Peak frequency in Hz
    pub frequency: f64,
    /// `20 * log10(|out| / |in|)`
    pub gain_db: f64,
    /// `phase(out) - phase(in)` in radians, not wrapped
    pub phase_rad: f64,
}

/// One point of a static transfer function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StaticPoint {
    /// Mean input level in volts
    pub input: f64,
    /// Mean output level in volts
    pub output: f64,
}

/// Errors raised while running a measurement
#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// The two offset probes gave the same output level
    #[error("offset nulling failed: {0}")]
    OffsetNulling(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to store results: {0:#}")]
    Storage(anyhow::Error),
}

/// The three phases of a full measurement, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Psd,
    DynamicTf,
    StaticTf,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Psd, Phase::DynamicTf, Phase::StaticTf];

    /// Step name shown in progress events
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Psd => "PSD",
            Phase::DynamicTf => "Dynamic TF",
            Phase::StaticTf => "Static TF",
        }
    }

    /// Sub-directory of the phase artifacts under the work directory
    pub fn dir_name(&self) -> &'static str {
        match self {
            Phase::Psd => "psd",
            Phase::DynamicTf => "dynamic_tf",
            Phase::StaticTf => "static_tf",
        }
    }

    /// Position in the full sequence
    pub fn index(&self) -> usize {
        match self {
            Phase::Psd => 0,
            Phase::DynamicTf => 1,
            Phase::StaticTf => 2,
        }
    }

    /// Global progress at which the phase starts
    pub fn start_progress(&self) -> f64 {
        self.index() as f64 / Self::ALL.len() as f64
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress publisher bound to one phase of one channel
///
/// The global progress is fixed for the whole phase; sub-steps only move the
/// phase-local `step_progress`.
#[derive(Debug, Clone)]
pub struct PhaseReporter<'a> {
    progress: &'a ProgressReporter,
    channel: String,
    step: &'static str,
    global_progress: f64,
}

impl<'a> PhaseReporter<'a> {
    pub fn new(
        progress: &'a ProgressReporter,
        channel: &str,
        step: &'static str,
        global_progress: f64,
    ) -> Self {
        Self {
            progress,
            channel: channel.to_string(),
            step,
            global_progress,
        }
    }

    pub async fn report(&self, detail: impl Into<String>, step_progress: f64) {
        self.progress
            .report(ProgressEvent::new(
                &self.channel,
                self.step,
                self.global_progress,
                detail,
                step_progress,
            ))
            .await;
    }
}

/// Fraction of `total` sub-steps done after step `index` (0-based)
pub(crate) fn fraction(index: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        (index + 1) as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_start_progress() {
        let starts: Vec<f64> = Phase::ALL.iter().map(|p| p.start_progress()).collect();
        assert_eq!(starts, vec![0.0, 1.0 / 3.0, 2.0 / 3.0]);
    }

    #[test]
    fn test_fraction() {
        assert_eq!(fraction(0, 4), 0.25);
        assert_eq!(fraction(3, 4), 1.0);
        assert_eq!(fraction(0, 0), 1.0);
    }

    #[tokio::test]
    async fn test_phase_reporter_keeps_global_progress() {
        let progress = ProgressReporter::new(8);
        let mut consumer = progress.subscribe();
        let reporter = PhaseReporter::new(&progress, "CHX", Phase::DynamicTf.name(), 1.0 / 3.0);
        reporter.report("f = 10 Hz", 0.5).await;
        reporter.report("f = 100 Hz", 1.0).await;

        let events = consumer.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.global_progress == 1.0 / 3.0));
        assert_eq!(events[1].step, "Dynamic TF");
    }
}
