// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bench operations and their typed arguments
//!
//! Every argument is optional: an absent argument takes its value from the
//! daemon configuration. Unknown argument names are rejected.

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::registry::Operation;
use super::CommandEnv;
use crate::hardware::HardwareSession;
use crate::measurement::{MeasurementError, MeasurementSequencer, Phase, SequencePlan};

/// Arguments of `psd`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PsdArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshots_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_freq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
}

/// Arguments of `dynamic-tf`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicTfArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Stimulus frequencies in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_width: Option<usize>,
}

/// Arguments of `static-tf`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticTfArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Half-span of the DC sweep around the nulled bias, in volts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<usize>,
}

/// Arguments of `run-all-phases`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunAllArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psd_output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psd_snapshots_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_tf_output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_tf_frequencies: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s_tf_output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s_tf_amplitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s_tf_steps: Option<usize>,
}

/// Arguments of the power commands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

impl PsdArgs {
    fn apply(self, plan: &mut SequencePlan) {
        if let Some(dir) = self.output_dir {
            plan.psd_dir = dir;
        }
        if let Some(count) = self.snapshots_count {
            plan.psd.snapshots_count = count;
        }
        if let Some(rate) = self.sampling_freq {
            plan.psd.sampling_freq = rate;
        }
        if let Some(size) = self.buffer_size {
            plan.psd.buffer_size = size;
        }
    }
}

impl DynamicTfArgs {
    fn apply(self, plan: &mut SequencePlan) {
        if let Some(dir) = self.output_dir {
            plan.dynamic_dir = dir;
        }
        if let Some(frequencies) = self.frequencies {
            plan.dynamic.frequencies = frequencies;
        }
        if let Some(amplitude) = self.amplitude {
            plan.dynamic.amplitude = amplitude;
        }
        if let Some(width) = self.merge_width {
            plan.dynamic.merge_width = width;
        }
    }
}

impl StaticTfArgs {
    fn apply(self, plan: &mut SequencePlan) {
        if let Some(dir) = self.output_dir {
            plan.static_dir = dir;
        }
        if let Some(amplitude) = self.amplitude {
            plan.static_tf.amplitude = amplitude;
        }
        if let Some(steps) = self.steps {
            plan.static_tf.steps = steps;
        }
    }
}

impl RunAllArgs {
    fn apply(self, plan: &mut SequencePlan) {
        PsdArgs {
            output_dir: self.psd_output_dir,
            snapshots_count: self.psd_snapshots_count,
            ..PsdArgs::default()
        }
        .apply(plan);
        DynamicTfArgs {
            output_dir: self.d_tf_output_dir,
            frequencies: self.d_tf_frequencies,
            ..DynamicTfArgs::default()
        }
        .apply(plan);
        StaticTfArgs {
            output_dir: self.s_tf_output_dir,
            amplitude: self.s_tf_amplitude,
            steps: self.s_tf_steps,
        }
        .apply(plan);
    }
}

async fn run_phase(
    session: &mut dyn HardwareSession,
    phase: Phase,
    plan: SequencePlan,
    env: &CommandEnv<'_>,
) -> Result<(), MeasurementError> {
    let mut sequencer = MeasurementSequencer::new(session, env.progress, env.settle_delay);
    sequencer.run_single(phase, &plan).await?;
    info!("{}: {} completed", env.channel, phase);
    Ok(())
}

pub struct PsdOperation;

#[async_trait]
impl Operation for PsdOperation {
    type Args = PsdArgs;

    async fn run(
        &self,
        session: &mut dyn HardwareSession,
        args: PsdArgs,
        env: &CommandEnv<'_>,
    ) -> Result<(), MeasurementError> {
        let mut plan = SequencePlan::from_config(env.config, env.channel);
        args.apply(&mut plan);
        run_phase(session, Phase::Psd, plan, env).await
    }
}

pub struct DynamicTfOperation;

#[async_trait]
impl Operation for DynamicTfOperation {
    type Args = DynamicTfArgs;

    async fn run(
        &self,
        session: &mut dyn HardwareSession,
        args: DynamicTfArgs,
        env: &CommandEnv<'_>,
    ) -> Result<(), MeasurementError> {
        let mut plan = SequencePlan::from_config(env.config, env.channel);
        args.apply(&mut plan);
        run_phase(session, Phase::DynamicTf, plan, env).await
    }
}

pub struct StaticTfOperation;

#[async_trait]
impl Operation for StaticTfOperation {
    type Args = StaticTfArgs;

    async fn run(
        &self,
        session: &mut dyn HardwareSession,
        args: StaticTfArgs,
        env: &CommandEnv<'_>,
    ) -> Result<(), MeasurementError> {
        let mut plan = SequencePlan::from_config(env.config, env.channel);
        args.apply(&mut plan);
        run_phase(session, Phase::StaticTf, plan, env).await
    }
}

pub struct RunAllPhasesOperation;

#[async_trait]
impl Operation for RunAllPhasesOperation {
    type Args = RunAllArgs;

    async fn run(
        &self,
        session: &mut dyn HardwareSession,
        args: RunAllArgs,
        env: &CommandEnv<'_>,
    ) -> Result<(), MeasurementError> {
        let mut plan = SequencePlan::from_config(env.config, env.channel);
        args.apply(&mut plan);
        let mut sequencer = MeasurementSequencer::new(session, env.progress, env.settle_delay);
        sequencer.run_all(&plan).await?;
        info!("{}: all phases completed", env.channel);
        Ok(())
    }
}

pub struct PowerOnOperation;

#[async_trait]
impl Operation for PowerOnOperation {
    type Args = NoArgs;

    async fn run(
        &self,
        session: &mut dyn HardwareSession,
        _args: NoArgs,
        _env: &CommandEnv<'_>,
    ) -> Result<(), MeasurementError> {
        session.power_on().await?;
        Ok(())
    }
}

pub struct PowerOffOperation;

#[async_trait]
impl Operation for PowerOffOperation {
    type Args = NoArgs;

    async fn run(
        &self,
        session: &mut dyn HardwareSession,
        _args: NoArgs,
        _env: &CommandEnv<'_>,
    ) -> Result<(), MeasurementError> {
        session.power_off().await?;
        Ok(())
    }
}
