// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Measurement sequence of one channel
//!
//! ```text
//! Idle → PoweringOn(PSD) → Running(PSD) → PoweringOff(PSD)
//!      → PoweringOn(Dynamic TF) → ... → PoweringOff(Static TF) → Done
//! ```
//!
//! Each phase is framed by a power-on and a power-off, both followed by the
//! settle delay. Phase `k` publishes its events with a global progress of
//! `k / 3`; a last `Done` event closes the sequence at 1.
//!
//! Errors are not caught here: a failing phase returns immediately and the
//! channel stays in whatever state it reached. Powering off on fatal errors is
//! the daemon shutdown hook's job.

use log::{debug, info};
use std::path::PathBuf;
use std::time::Duration;

use super::noise::{measure_psd, PsdCurve};
use super::transfer_function::{
    dynamic_sweep, null_offset, static_sweep, DcCapture, DynamicSweep,
};
use super::{DynamicPoint, MeasurementError, Phase, PhaseReporter, StaticPoint};
use crate::config::{Config, OffsetNullingConfig, PsdConfig, StaticTfConfig};
use crate::hardware::{DeviceLimits, HardwareSession};
use crate::progress::{ProgressEvent, ProgressReporter, DONE_STEP};
use crate::storage::ArtifactWriter;

/// Position of the sequencer in the phase sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    PoweringOn(Phase),
    Running(Phase),
    PoweringOff(Phase),
    Done,
}

/// Parameters and output directories of every phase
#[derive(Debug, Clone, PartialEq)]
pub struct SequencePlan {
    pub psd: PsdConfig,
    pub psd_dir: PathBuf,
    pub dynamic: DynamicSweep,
    pub dynamic_dir: PathBuf,
    pub static_tf: StaticTfConfig,
    pub static_dir: PathBuf,
    pub offset_nulling: OffsetNullingConfig,
}

impl SequencePlan {
    /// Plan built from the configuration defaults for `channel`
    pub fn from_config(config: &Config, channel: &str) -> Self {
        Self {
            psd: config.psd.clone(),
            psd_dir: config.output.phase_dir(channel, Phase::Psd.dir_name()),
            dynamic: DynamicSweep::from(&config.dynamic_tf),
            dynamic_dir: config.output.phase_dir(channel, Phase::DynamicTf.dir_name()),
            static_tf: config.static_tf.clone(),
            static_dir: config.output.phase_dir(channel, Phase::StaticTf.dir_name()),
            offset_nulling: config.offset_nulling.clone(),
        }
    }
}

/// Largest number of PSD snapshots a single run may request
pub const MAX_SNAPSHOTS: usize = 10_000;

/// Largest number of static sweep levels
pub const MAX_STATIC_STEPS: usize = 10_000;

fn check_count(name: &str, value: usize, max: usize) -> Result<(), MeasurementError> {
    if value == 0 || value > max {
        return Err(MeasurementError::InvalidParameter(format!(
            "{} must be between 1 and {}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

impl SequencePlan {
    /// Reject counts the device or the host cannot serve
    pub fn validate(&self, limits: &DeviceLimits) -> Result<(), MeasurementError> {
        check_count("snapshots_count", self.psd.snapshots_count, MAX_SNAPSHOTS)?;
        check_count("buffer_size", self.psd.buffer_size, limits.max_buffer_size)?;
        check_count("steps", self.static_tf.steps, MAX_STATIC_STEPS)?;
        check_count(
            "samples_per_step",
            self.static_tf.samples_per_step,
            limits.max_buffer_size,
        )
    }
}

/// Results of the phases that ran
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceOutcome {
    pub psd: Option<PsdCurve>,
    /// Bias found by the last offset nulling
    pub bias: Option<f64>,
    pub dynamic: Vec<DynamicPoint>,
    pub static_points: Vec<StaticPoint>,
}

/// Wait for the channel to settle after a power transition
async fn settle(delay: Duration) {
    if !delay.is_zero() {
        debug!("Settling for {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

/// Runs measurement phases on one hardware session
pub struct MeasurementSequencer<'a> {
    session: &'a mut dyn HardwareSession,
    progress: &'a ProgressReporter,
    settle_delay: Duration,
    state: SequencerState,
}

impl<'a> MeasurementSequencer<'a> {
    pub fn new(
        session: &'a mut dyn HardwareSession,
        progress: &'a ProgressReporter,
        settle_delay: Duration,
    ) -> Self {
        Self {
            session,
            progress,
            settle_delay,
            state: SequencerState::Idle,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    fn transition(&mut self, state: SequencerState) {
        info!(
            "{}: {:?} -> {:?}",
            self.session.channel(),
            self.state,
            state
        );
        self.state = state;
    }

    /// Run one phase framed by power on/off, publishing at `global_progress`
    async fn run_phase(
        &mut self,
        phase: Phase,
        plan: &SequencePlan,
        global_progress: f64,
        outcome: &mut SequenceOutcome,
    ) -> Result<(), MeasurementError> {
        let channel = self.session.channel().to_string();
        let reporter = PhaseReporter::new(self.progress, &channel, phase.name(), global_progress);

        self.transition(SequencerState::PoweringOn(phase));
        reporter.report("Powering on", 0.0).await;
        self.session.power_on().await?;
        settle(self.settle_delay).await;

        self.transition(SequencerState::Running(phase));
        match phase {
            Phase::Psd => {
                let writer = ArtifactWriter::new(&plan.psd_dir, &channel)
                    .map_err(MeasurementError::Storage)?;
                let curve = measure_psd(&mut *self.session, &plan.psd, &writer, &reporter).await?;
                outcome.psd = Some(curve);
            }
            Phase::DynamicTf => {
                let writer = ArtifactWriter::new(&plan.dynamic_dir, &channel)
                    .map_err(MeasurementError::Storage)?;
                let capture = DcCapture::from(&plan.static_tf);
                let bias = null_offset(&mut *self.session, &plan.offset_nulling, &capture).await?;
                outcome.bias = Some(bias);
                let points =
                    dynamic_sweep(&mut *self.session, bias, &plan.dynamic, &writer, &reporter)
                        .await?;
                outcome.dynamic.extend(points);
            }
            Phase::StaticTf => {
                let writer = ArtifactWriter::new(&plan.static_dir, &channel)
                    .map_err(MeasurementError::Storage)?;
                let capture = DcCapture::from(&plan.static_tf);
                let bias = null_offset(&mut *self.session, &plan.offset_nulling, &capture).await?;
                outcome.bias = Some(bias);
                let points =
                    static_sweep(&mut *self.session, bias, &plan.static_tf, &writer, &reporter)
                        .await?;
                outcome.static_points.extend(points);
            }
        }

        self.transition(SequencerState::PoweringOff(phase));
        self.session.power_off().await?;
        settle(self.settle_delay).await;
        Ok(())
    }

    /// Run a single phase on its own
    pub async fn run_single(
        &mut self,
        phase: Phase,
        plan: &SequencePlan,
    ) -> Result<SequenceOutcome, MeasurementError> {
        plan.validate(&self.session.limits())?;
        let mut outcome = SequenceOutcome::default();
        self.run_phase(phase, plan, 0.0, &mut outcome).await?;
        self.transition(SequencerState::Done);
        Ok(outcome)
    }

    /// Run PSD, dynamic TF and static TF in order
    pub async fn run_all(
        &mut self,
        plan: &SequencePlan,
    ) -> Result<SequenceOutcome, MeasurementError> {
        plan.validate(&self.session.limits())?;
        let mut outcome = SequenceOutcome::default();
        for phase in Phase::ALL {
            self.run_phase(phase, plan, phase.start_progress(), &mut outcome)
                .await?;
        }

        self.transition(SequencerState::Done);
        self.progress
            .report(ProgressEvent::new(
                self.session.channel(),
                DONE_STEP,
                1.0,
                "All phases completed",
                1.0,
            ))
            .await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::hardware::{DeviceLimits, HardwareError, SessionEvent, SimulatedSession};
    use tempfile::tempdir;

    fn small_plan(root: &std::path::Path) -> SequencePlan {
        SequencePlan {
            psd: PsdConfig {
                snapshots_count: 2,
                sampling_freq: 100_000.0,
                buffer_size: 256,
            },
            psd_dir: root.join("psd"),
            dynamic: DynamicSweep {
                frequencies: vec![1000.0],
                amplitude: 0.1,
                merge_width: 50,
            },
            dynamic_dir: root.join("dynamic_tf"),
            static_tf: StaticTfConfig {
                amplitude: 0.2,
                steps: 3,
                step_settle_ms: 0,
                samples_per_step: 32,
                sampling_freq: 10_000.0,
            },
            static_dir: root.join("static_tf"),
            offset_nulling: OffsetNullingConfig::default(),
        }
    }

    fn simulated() -> SimulatedSession {
        SimulatedSession::new("CHX", &SimulatorConfig::default()).with_limits(DeviceLimits {
            max_buffer_size: 1024,
            ..DeviceLimits::default()
        })
    }

    #[tokio::test]
    async fn test_full_sequence_call_order_and_progress() {
        let dir = tempdir().unwrap();
        let plan = small_plan(dir.path());
        let progress = ProgressReporter::new(256);
        let mut consumer = progress.subscribe();
        let mut session = simulated();
        let log = session.event_log();

        let mut sequencer = MeasurementSequencer::new(&mut session, &progress, Duration::ZERO);
        let outcome = sequencer.run_all(&plan).await.unwrap();
        assert_eq!(sequencer.state(), SequencerState::Done);

        // Power framing: on/off around each of the three phases
        let events = log.lock().unwrap().clone();
        let power: Vec<&SessionEvent> = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::PowerOn | SessionEvent::PowerOff))
            .collect();
        assert_eq!(
            power,
            vec![
                &SessionEvent::PowerOn,
                &SessionEvent::PowerOff,
                &SessionEvent::PowerOn,
                &SessionEvent::PowerOff,
                &SessionEvent::PowerOn,
                &SessionEvent::PowerOff,
            ]
        );
        assert_eq!(events.first(), Some(&SessionEvent::PowerOn));
        assert_eq!(events.last(), Some(&SessionEvent::PowerOff));

        // PSD snapshots are taken while the first phase is powered
        let first_off = events
            .iter()
            .position(|e| *e == SessionEvent::PowerOff)
            .unwrap();
        let psd_captures = events[..first_off]
            .iter()
            .filter(|e| matches!(e, SessionEvent::Acquire { .. }))
            .count();
        assert_eq!(psd_captures, 2);

        // Global progress moves by thirds, then closes at 1
        let progress_events = consumer.drain();
        let mut globals: Vec<f64> = progress_events.iter().map(|e| e.global_progress).collect();
        globals.dedup();
        assert_eq!(globals, vec![0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]);
        let last = progress_events.last().unwrap();
        assert_eq!(last.step, DONE_STEP);
        assert_eq!(last.step_progress, 1.0);

        assert!(outcome.psd.is_some());
        assert!(!outcome.dynamic.is_empty());
        assert_eq!(outcome.static_points.len(), 3);
        for phase in ["psd", "dynamic_tf", "static_tf"] {
            assert!(std::fs::read_dir(dir.path().join(phase)).unwrap().count() > 0);
        }
    }

    #[tokio::test]
    async fn test_single_phase_has_no_done_event() {
        let dir = tempdir().unwrap();
        let plan = small_plan(dir.path());
        let progress = ProgressReporter::new(64);
        let mut consumer = progress.subscribe();
        let mut session = simulated();

        let mut sequencer = MeasurementSequencer::new(&mut session, &progress, Duration::ZERO);
        let outcome = sequencer.run_single(Phase::StaticTf, &plan).await.unwrap();

        assert!(outcome.psd.is_none());
        assert_eq!(outcome.static_points.len(), 3);
        let events = consumer.drain();
        assert!(events.iter().all(|e| e.step == "Static TF"));
        assert!(events.iter().all(|e| e.global_progress == 0.0));
        assert!(!session.is_powered());
    }

    #[test]
    fn test_sequence_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}
        let dir = tempdir().unwrap();
        let plan = small_plan(dir.path());
        let progress = ProgressReporter::new(4);
        let mut session = simulated();
        let mut sequencer = MeasurementSequencer::new(&mut session, &progress, Duration::ZERO);
        assert_send(&sequencer.run_all(&plan));
        assert_send(&sequencer.run_single(Phase::Psd, &plan));
    }

    #[tokio::test]
    async fn test_oversized_counts_rejected_before_power_on() {
        let dir = tempdir().unwrap();
        let progress = ProgressReporter::new(16);
        let mut session = simulated();
        let log = session.event_log();

        let mut huge_steps = small_plan(dir.path());
        huge_steps.static_tf.steps = usize::MAX;
        let mut huge_snapshots = small_plan(dir.path());
        huge_snapshots.psd.snapshots_count = usize::MAX;
        let mut huge_buffer = small_plan(dir.path());
        huge_buffer.psd.buffer_size = 1025;

        let mut sequencer = MeasurementSequencer::new(&mut session, &progress, Duration::ZERO);
        for plan in [&huge_steps, &huge_snapshots, &huge_buffer] {
            assert!(matches!(
                sequencer.run_single(Phase::StaticTf, plan).await,
                Err(MeasurementError::InvalidParameter(_))
            ));
            assert!(matches!(
                sequencer.run_all(plan).await,
                Err(MeasurementError::InvalidParameter(_))
            ));
        }
        assert_eq!(sequencer.state(), SequencerState::Idle);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_phase_failure_propagates() {
        let dir = tempdir().unwrap();
        let plan = small_plan(dir.path());
        let progress = ProgressReporter::new(16);
        let mut session = simulated();
        session.inject_failures(1);

        let mut sequencer = MeasurementSequencer::new(&mut session, &progress, Duration::ZERO);
        let err = sequencer.run_all(&plan).await.unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::Hardware(HardwareError::Communication(_))
        ));
        assert_eq!(sequencer.state(), SequencerState::PoweringOn(Phase::Psd));
    }
}
