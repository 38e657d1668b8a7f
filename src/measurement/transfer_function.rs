// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Transfer function measurements
//!
//! ## Offset nulling
//!
//! Two DC probes are applied, the output is averaged for each, and the line
//! through both points is solved for the input that zeroes the output. That
//! level, clamped to the generator range, becomes the bias of the sweeps.
//!
//! ## Dynamic sweep
//!
//! For each drive frequency a sine centred on the bias is applied and input
//! and output are captured together, at `min(f * buffer / 10, max_rate)` so a
//! buffer always holds about ten periods. Both captures are Hann-windowed and
//! transformed; peaks are searched in the input spectrum only, and each peak
//! yields one point:
//!
//! ```text
//! gain_db   = 20 * log10(|out| / |in|)
//! phase_rad = phase(out) - phase(in)
//! ```
//!
//! A drive frequency can produce zero, one or several points, depending on
//! how many peaks the input spectrum shows. All points go into one table.
//!
//! ## Static sweep
//!
//! The DC level is stepped over `[bias - amplitude, bias + amplitude]`, both
//! ends included, and the mean input and output are recorded at each step.

use log::{debug, info, warn};
use std::time::Duration;

use super::{
    fraction, DynamicPoint, MeasurementError, PhaseReporter, StaticPoint, INPUT_RANGE,
};
use crate::config::{DynamicTfConfig, OffsetNullingConfig, StaticTfConfig};
use crate::hardware::{
    AcquisitionRequest, AnalogOutput, HardwareSession, GENERATOR_CHANNEL, INPUT_CHANNEL,
    OUTPUT_CHANNEL,
};
use crate::spectral::peaks::{self, apply_noise_floor};
use crate::spectral::{AnalysisError, FftAnalyzer, SpectralAnalyzer, Waveform, Window};
use crate::storage::ArtifactWriter;
use crate::utility::linspace;

/// Minimum separation in bins between two input peaks
pub const MIN_PEAK_DISTANCE: usize = 2;

/// Parameters of a dynamic sweep
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicSweep {
    /// Drive frequencies in Hz, ascending
    pub frequencies: Vec<f64>,
    /// Sine amplitude in volts
    pub amplitude: f64,
    /// Width in bins of the neighbourhood merged around each peak
    pub merge_width: usize,
}

impl From<&DynamicTfConfig> for DynamicSweep {
    fn from(config: &DynamicTfConfig) -> Self {
        Self {
            frequencies: config.frequencies(),
            amplitude: config.amplitude,
            merge_width: config.merge_width,
        }
    }
}

/// Capture settings of DC measurements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcCapture {
    pub sample_rate: f64,
    pub samples: usize,
    /// Wait between a level change and the capture
    pub settle: Duration,
}

impl From<&StaticTfConfig> for DcCapture {
    fn from(config: &StaticTfConfig) -> Self {
        Self {
            sample_rate: config.sampling_freq,
            samples: config.samples_per_step,
            settle: Duration::from_millis(config.step_settle_ms),
        }
    }
}

/// Apply a DC level and return the mean input and output levels
async fn measure_dc(
    session: &mut dyn HardwareSession,
    level: f64,
    capture: &DcCapture,
) -> Result<StaticPoint, MeasurementError> {
    session
        .generate(AnalogOutput::Dc {
            channel: GENERATOR_CHANNEL,
            offset: level,
        })
        .await?;
    if !capture.settle.is_zero() {
        tokio::time::sleep(capture.settle).await;
    }
    let acquisition = session
        .acquire(&AcquisitionRequest {
            channels: vec![INPUT_CHANNEL, OUTPUT_CHANNEL],
            sample_rate: capture.sample_rate,
            samples: capture.samples,
            range: INPUT_RANGE,
        })
        .await?;
    match acquisition.waveforms.as_slice() {
        [input, output] => Ok(StaticPoint {
            input: input.mean(),
            output: output.mean(),
        }),
        other => Err(MeasurementError::InvalidParameter(format!(
            "expected 2 waveforms, device returned {}",
            other.len()
        ))),
    }
}

/// Find the DC input level that zeroes the output and apply it
///
/// Returns the bias, clamped to the generator output range.
pub async fn null_offset(
    session: &mut dyn HardwareSession,
    probes: &OffsetNullingConfig,
    capture: &DcCapture,
) -> Result<f64, MeasurementError> {
    if probes.probe_low == probes.probe_high {
        return Err(MeasurementError::InvalidParameter(
            "offset probes must differ".to_string(),
        ));
    }
    let low = measure_dc(session, probes.probe_low, capture).await?;
    let high = measure_dc(session, probes.probe_high, capture).await?;

    let slope = (high.output - low.output) / (probes.probe_high - probes.probe_low);
    if !slope.is_finite() || slope.abs() < f64::EPSILON {
        return Err(MeasurementError::OffsetNulling(format!(
            "flat response on {}: {} V at {} V and {} V at {} V",
            session.channel(),
            low.output,
            probes.probe_low,
            high.output,
            probes.probe_high
        )));
    }
    let intercept = low.output - slope * probes.probe_low;
    let bias = session.limits().clamp_output(-intercept / slope);

    session
        .generate(AnalogOutput::Dc {
            channel: GENERATOR_CHANNEL,
            offset: bias,
        })
        .await?;
    info!(
        "{}: offset nulled, bias {:.6} V (slope {:.4})",
        session.channel(),
        bias,
        slope
    );
    Ok(bias)
}

/// Gain and phase at the peaks of the input spectrum
///
/// Amplitudes are merged over `merge_width` bins of each channel's floored
/// spectrum; phases are read at the peak bin.
pub fn analyze_pair(
    input: &Waveform,
    output: &Waveform,
    merge_width: usize,
) -> Result<Vec<DynamicPoint>, AnalysisError> {
    if input.len() != output.len() {
        return Err(AnalysisError::InvalidInput(format!(
            "input has {} samples, output has {}",
            input.len(),
            output.len()
        )));
    }
    let window = Window::hann(input.len());
    let mut analyzer = FftAnalyzer::new();
    let input_spectrum = analyzer.analyze_waveform(input, Some(&window), true)?;
    let output_spectrum = analyzer.analyze_waveform(output, Some(&window), true)?;

    let mut input_floored = input_spectrum.magnitudes.clone();
    apply_noise_floor(&mut input_floored);
    let mut output_floored = output_spectrum.magnitudes.clone();
    apply_noise_floor(&mut output_floored);

    let indices = peaks::extract(&input_spectrum.magnitudes, MIN_PEAK_DISTANCE);
    let input_amplitudes = peaks::merge(&input_floored, &indices, merge_width, 1.0);
    let output_amplitudes = peaks::merge(&output_floored, &indices, merge_width, 1.0);

    let points = indices
        .iter()
        .zip(input_amplitudes.iter().zip(&output_amplitudes))
        .map(|(&i, (&amp_in, &amp_out))| {
            if amp_out == 0.0 {
                warn!(
                    "No output above the noise floor at {:.3} Hz",
                    input_spectrum.frequencies[i]
                );
            }
            DynamicPoint {
                frequency: input_spectrum.frequencies[i],
                gain_db: 20.0 * (amp_out / amp_in).log10(),
                phase_rad: output_spectrum.phases[i] - input_spectrum.phases[i],
            }
        })
        .collect();
    Ok(points)
}

/// Run a dynamic sweep around `bias`, persisting raw captures and the table
pub async fn dynamic_sweep(
    session: &mut dyn HardwareSession,
    bias: f64,
    sweep: &DynamicSweep,
    writer: &ArtifactWriter,
    reporter: &PhaseReporter<'_>,
) -> Result<Vec<DynamicPoint>, MeasurementError> {
    if let Some(f) = sweep
        .frequencies
        .iter()
        .find(|f| !(f.is_finite() && **f > 0.0))
    {
        return Err(MeasurementError::InvalidParameter(format!(
            "drive frequency {} Hz",
            f
        )));
    }

    let limits = session.limits();
    let buffer_size = limits.max_buffer_size;
    let total = sweep.frequencies.len();
    let mut points = Vec::new();

    for (index, &frequency) in sweep.frequencies.iter().enumerate() {
        session
            .generate(AnalogOutput::Sine {
                channel: GENERATOR_CHANNEL,
                amplitude: sweep.amplitude,
                offset: bias,
                frequency,
            })
            .await?;

        let sample_rate = (frequency * buffer_size as f64 / 10.0).min(limits.max_sample_rate);
        let acquisition = session
            .acquire(&AcquisitionRequest {
                channels: vec![INPUT_CHANNEL, OUTPUT_CHANNEL],
                sample_rate,
                samples: buffer_size,
                range: INPUT_RANGE,
            })
            .await?;
        writer
            .write_snapshot(
                &format!("dynamic_raw_{:04}", index),
                &["input", "output"],
                &acquisition.waveforms,
            )
            .map_err(MeasurementError::Storage)?;

        let [input, output] = acquisition.waveforms.as_slice() else {
            return Err(MeasurementError::InvalidParameter(format!(
                "expected 2 waveforms, device returned {}",
                acquisition.waveforms.len()
            )));
        };
        let new_points = analyze_pair(input, output, sweep.merge_width)?;
        debug!(
            "{}: {:.3} Hz at {:.1} S/s gave {} point(s)",
            session.channel(),
            frequency,
            acquisition.sample_rate,
            new_points.len()
        );
        points.extend(new_points);

        reporter
            .report(
                format!("f = {:.3} Hz ({}/{})", frequency, index + 1, total),
                fraction(index, total),
            )
            .await;
    }

    writer
        .write_dynamic_tf(&points)
        .map_err(MeasurementError::Storage)?;
    Ok(points)
}

/// Run a static sweep around `bias`, persisting the table
pub async fn static_sweep(
    session: &mut dyn HardwareSession,
    bias: f64,
    config: &StaticTfConfig,
    writer: &ArtifactWriter,
    reporter: &PhaseReporter<'_>,
) -> Result<Vec<StaticPoint>, MeasurementError> {
    if config.steps == 0 {
        return Err(MeasurementError::InvalidParameter(
            "static sweep needs at least one step".to_string(),
        ));
    }
    let limits = session.limits();
    let capture = DcCapture::from(config);
    let levels = linspace(bias - config.amplitude, bias + config.amplitude, config.steps);
    let mut points = Vec::new();

    for (index, &level) in levels.iter().enumerate() {
        let level = limits.clamp_output(level);
        points.push(measure_dc(session, level, &capture).await?);
        reporter
            .report(
                format!("DC = {:.4} V ({}/{})", level, index + 1, levels.len()),
                fraction(index, levels.len()),
            )
            .await;
    }

    writer
        .write_static_tf(&points)
        .map_err(MeasurementError::Storage)?;
    Ok(points)
}
