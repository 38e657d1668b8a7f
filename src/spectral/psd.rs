// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Power spectral density estimation
//!
//! The estimate averages the squared one-sided magnitudes of a series of
//! equal-length snapshots and divides by the bin width, giving a density in
//! amplitude²/Hz (V²/Hz for voltage captures).

use log::debug;

use super::fft::{FftAnalyzer, SpectralAnalyzer, Window};
use super::{AnalysisError, Waveform};

/// Estimate the PSD of a series of snapshots
///
/// ### Parameters
///
/// * `waveforms` - Snapshots to average, all of the same length
/// * `sampling_frequency` - Sampling frequency shared by the snapshots in Hz
/// * `window` - Apply a Hann window sized to the first snapshot
/// * `remove_mean` - Remove the mean of each snapshot before transforming
///
/// ### Returns
///
/// `Ok(None)` for an empty snapshot list, otherwise the frequency axis and
/// the PSD values.
///
/// ### Errors
///
/// [`AnalysisError::InvalidInput`] if a snapshot is empty or its length
/// differs from the first one.
pub fn estimate(
    waveforms: &[Waveform],
    sampling_frequency: f64,
    window: bool,
    remove_mean: bool,
) -> Result<Option<(Vec<f64>, Vec<f64>)>, AnalysisError> {
    let Some(first) = waveforms.first() else {
        return Ok(None);
    };
    let n = first.len();
    let window = window.then(|| Window::hann(n));

    let mut analyzer = FftAnalyzer::new();
    let mut frequencies = Vec::new();
    let mut accumulated: Vec<f64> = Vec::new();

    for (index, waveform) in waveforms.iter().enumerate() {
        if waveform.len() != n {
            return Err(AnalysisError::InvalidInput(format!(
                "snapshot {} has {} samples, expected {}",
                index,
                waveform.len(),
                n
            )));
        }
        let spectrum = analyzer.analyze(
            waveform.samples(),
            sampling_frequency,
            window.as_ref(),
            remove_mean,
        )?;
        if accumulated.is_empty() {
            accumulated = spectrum.magnitudes.iter().map(|m| m * m).collect();
            frequencies = spectrum.frequencies;
        } else {
            for (acc, m) in accumulated.iter_mut().zip(&spectrum.magnitudes) {
                *acc += m * m;
            }
        }
    }

    let count = waveforms.len() as f64;
    let bin_width = sampling_frequency / n as f64;
    let psd: Vec<f64> = accumulated
        .into_iter()
        .map(|power| power / count / bin_width)
        .collect();

    debug!(
        "PSD estimated from {} snapshot(s) of {} samples at {} Hz",
        waveforms.len(),
        n,
        sampling_frequency
    );

    Ok(Some((frequencies, psd)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectral::fft::analyze;
    use crate::utility::noise_generator::NoiseGenerator;
    use approx::assert_relative_eq;

    fn noise(seed: u32, len: usize, fs: f64) -> Waveform {
        let mut generator = NoiseGenerator::new(seed);
        Waveform::new(generator.gaussian_samples(len, 0.1), fs)
    }

    #[test]
    fn test_empty_input_returns_none() {
        assert_eq!(estimate(&[], 1000.0, true, true).unwrap(), None);
    }

    #[test]
    fn test_single_snapshot_is_its_own_squared_spectrum() {
        let fs = 2000.0;
        let waveform = noise(42, 512, fs);
        let (frequencies, psd) = estimate(std::slice::from_ref(&waveform), fs, false, true)
            .unwrap()
            .unwrap();

        let spectrum = analyze(waveform.samples(), fs, None, true).unwrap();
        assert_eq!(frequencies, spectrum.frequencies);
        let bin_width = fs / 512.0;
        for (p, m) in psd.iter().zip(&spectrum.magnitudes) {
            assert_relative_eq!(*p, m * m / bin_width, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_identical_snapshots_average_to_the_same_curve() {
        let fs = 1000.0;
        let waveform = noise(7, 256, fs);
        let (_, single) = estimate(std::slice::from_ref(&waveform), fs, true, true)
            .unwrap()
            .unwrap();
        let repeated = vec![waveform.clone(), waveform.clone(), waveform];
        let (_, averaged) = estimate(&repeated, fs, true, true).unwrap().unwrap();
        for (a, b) in single.iter().zip(&averaged) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_white_noise_density_level() {
        // One-sided magnitudes capture half the variance, spread over fs/2
        let fs = 1000.0;
        let snapshots: Vec<Waveform> = (0..64).map(|seed| noise(seed + 1, 1024, fs)).collect();
        let (_, psd) = estimate(&snapshots, fs, true, true).unwrap().unwrap();
        let variance = 0.1 * 0.1;
        let inner = &psd[10..psd.len() - 10];
        let mean_level = inner.iter().sum::<f64>() / inner.len() as f64;
        assert_relative_eq!(mean_level, variance / fs, max_relative = 0.15);
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let snapshots = vec![noise(1, 128, 100.0), noise(2, 64, 100.0)];
        assert!(matches!(
            estimate(&snapshots, 100.0, true, true),
            Err(AnalysisError::InvalidInput(_))
        ));
    }
}
