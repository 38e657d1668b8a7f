// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Output noise spectral density
//!
//! The ASIC input is held at 0 V while `snapshots_count` captures of the
//! output are taken; each capture is persisted, then all of them are averaged
//! into one PSD curve (see [`crate::spectral::psd`]).

use log::info;

use super::{fraction, MeasurementError, PhaseReporter, INPUT_RANGE};
use crate::config::PsdConfig;
use crate::hardware::{
    AcquisitionRequest, AnalogOutput, HardwareSession, GENERATOR_CHANNEL, OUTPUT_CHANNEL,
};
use crate::spectral::psd;
use crate::storage::ArtifactWriter;

/// Frequency axis and PSD values, in Hz and V²/Hz
pub type PsdCurve = (Vec<f64>, Vec<f64>);

/// Capture the output snapshots, estimate and persist the PSD
pub async fn measure_psd(
    session: &mut dyn HardwareSession,
    config: &PsdConfig,
    writer: &ArtifactWriter,
    reporter: &PhaseReporter<'_>,
) -> Result<PsdCurve, MeasurementError> {
    if config.snapshots_count == 0 {
        return Err(MeasurementError::InvalidParameter(
            "at least one snapshot is required".to_string(),
        ));
    }

    session
        .generate(AnalogOutput::Dc {
            channel: GENERATOR_CHANNEL,
            offset: 0.0,
        })
        .await?;

    let request = AcquisitionRequest {
        channels: vec![OUTPUT_CHANNEL],
        sample_rate: config.sampling_freq,
        samples: config.buffer_size,
        range: INPUT_RANGE,
    };
    let mut snapshots = Vec::new();
    let mut sample_rate = config.sampling_freq;

    for index in 0..config.snapshots_count {
        let acquisition = session.acquire(&request).await?;
        sample_rate = acquisition.sample_rate;
        writer
            .write_snapshot(
                &format!("psd_snapshot_{:04}", index),
                &["output"],
                &acquisition.waveforms,
            )
            .map_err(MeasurementError::Storage)?;
        snapshots.extend(acquisition.waveforms);

        reporter
            .report(
                format!("snapshot {}/{}", index + 1, config.snapshots_count),
                fraction(index, config.snapshots_count),
            )
            .await;
    }

    let (frequencies, density) = psd::estimate(&snapshots, sample_rate, true, true)?
        .ok_or_else(|| MeasurementError::InvalidParameter("no snapshot captured".to_string()))?;
    writer
        .write_psd(&frequencies, &density)
        .map_err(MeasurementError::Storage)?;

    info!(
        "{}: PSD from {} snapshots at {:.1} Hz",
        session.channel(),
        snapshots.len(),
        sample_rate
    );
    Ok((frequencies, density))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::hardware::{SessionEvent, SimulatedSession};
    use crate::progress::ProgressReporter;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_noise_level_of_simulated_channel() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "CHX").unwrap();
        let progress = ProgressReporter::new(64);
        let mut consumer = progress.subscribe();
        let reporter = PhaseReporter::new(&progress, "CHX", "PSD", 0.0);

        let model = SimulatorConfig {
            gain: 1.0,
            offset: 0.0,
            delay: 0.0,
            noise_rms: 1e-3,
            seed: 11,
        };
        let mut session = SimulatedSession::new("CHX", &model);
        session.power_on().await.unwrap();

        // 100 MHz / 1000: the requested rate is reachable exactly
        let config = PsdConfig {
            snapshots_count: 16,
            sampling_freq: 100_000.0,
            buffer_size: 1024,
        };
        let (frequencies, density) = measure_psd(&mut session, &config, &writer, &reporter)
            .await
            .unwrap();

        assert_eq!(frequencies.len(), 513);
        let inner = &density[8..density.len() - 8];
        let level = inner.iter().sum::<f64>() / inner.len() as f64;
        // One-sided magnitudes hold half the variance, spread over fs/2
        assert_relative_eq!(level, 1e-6 / 100_000.0, max_relative = 0.2);

        let acquisitions = session
            .events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Acquire { .. }))
            .count();
        assert_eq!(acquisitions, 16);
        assert_eq!(consumer.drain().len(), 16);

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 17);
    }

    #[tokio::test]
    async fn test_zero_snapshots_rejected() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), "CHX").unwrap();
        let progress = ProgressReporter::new(4);
        let reporter = PhaseReporter::new(&progress, "CHX", "PSD", 0.0);
        let mut session = SimulatedSession::new("CHX", &SimulatorConfig::default());
        let config = PsdConfig {
            snapshots_count: 0,
            ..PsdConfig::default()
        };
        assert!(matches!(
            measure_psd(&mut session, &config, &writer, &reporter).await,
            Err(MeasurementError::InvalidParameter(_))
        ));
    }
}
