// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Spectral peak detection and energy merging
//!
//! Peak detection works on a magnitude spectrum in three steps:
//!
//! 1. **Noise floor**: every bin strictly below the (population) standard
//!    deviation of the whole magnitude sequence is zeroed. The threshold is
//!    fixed and not configurable.
//! 2. **Local maxima**: bins higher than both neighbours; a flat top reports
//!    its centre bin. The first and last bins are never peaks.
//! 3. **Minimum distance**: when two maxima are closer than `min_distance`
//!    bins, only the higher one is kept.
//!
//! Merging then folds the leakage around each peak into one root-sum-square
//! amplitude, since a tone that straddles bins is under-estimated by any
//! single bin.

use serde::{Deserialize, Serialize};

use super::fft::{FftAnalyzer, SpectralAnalyzer, Window};
use super::{AnalysisError, Waveform};

/// One detected spectral peak
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Bin index in the spectrum the peak was found in
    pub index: usize,
    /// Bin frequency in Hz
    pub frequency: f64,
    /// Merged (root-sum-square) amplitude
    pub amplitude: f64,
}

/// Peaks of one spectrum, ordered by ascending frequency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakSet {
    pub peaks: Vec<Peak>,
}

impl PeakSet {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.peaks.iter().map(|p| p.index).collect()
    }
}

/// Population standard deviation of `values` (0 for an empty slice)
fn standard_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
}

/// Zero every bin strictly below the standard deviation of `magnitudes`
pub fn apply_noise_floor(magnitudes: &mut [f64]) {
    let floor = standard_deviation(magnitudes);
    for m in magnitudes.iter_mut() {
        if *m < floor {
            *m = 0.0;
        }
    }
}

/// Indices of the local maxima of `values`, ascending
fn local_maxima(values: &[f64]) -> Vec<usize> {
    let n = values.len();
    let mut maxima = Vec::new();
    if n < 3 {
        return maxima;
    }

    let mut i = 1;
    while i < n - 1 {
        if values[i] > values[i - 1] {
            // Walk to the end of a possible plateau
            let mut end = i;
            while end + 1 < n && values[end + 1] == values[i] {
                end += 1;
            }
            if end + 1 < n && values[end + 1] < values[i] {
                maxima.push((i + end) / 2);
            }
            i = end + 1;
        } else {
            i += 1;
        }
    }
    maxima
}

/// Find the peaks of a magnitude spectrum
///
/// The noise floor is applied to a copy of `magnitudes`, so the caller's data
/// is left untouched. Returned indices are ascending.
///
/// ### Parameters
///
/// * `magnitudes` - Magnitude spectrum
/// * `min_distance` - Minimum separation in bins between two reported peaks
pub fn extract(magnitudes: &[f64], min_distance: usize) -> Vec<usize> {
    let mut floored = magnitudes.to_vec();
    apply_noise_floor(&mut floored);
    search(&floored, min_distance)
}

/// Local maxima of an already floored spectrum, thinned by `min_distance`
fn search(floored: &[f64], min_distance: usize) -> Vec<usize> {
    let candidates = local_maxima(floored);
    if min_distance <= 1 || candidates.len() < 2 {
        return candidates;
    }

    // Highest first; ties keep the lower index first
    let mut by_height = candidates.clone();
    by_height.sort_by(|&a, &b| floored[b].total_cmp(&floored[a]).then(a.cmp(&b)));

    let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
    for candidate in by_height {
        if kept.iter().all(|&k| k.abs_diff(candidate) >= min_distance) {
            kept.push(candidate);
        }
    }
    kept.sort_unstable();
    kept
}

/// Root-sum-square amplitude of the neighbourhood of one bin
fn merge_one(magnitudes: &[f64], index: usize, width: usize, scale: f64) -> f64 {
    let half = width / 2;
    let start = index.saturating_sub(half);
    let end = (index + half + 1).min(magnitudes.len());
    if start >= end {
        return 0.0;
    }
    magnitudes[start..end]
        .iter()
        .map(|m| m * m)
        .sum::<f64>()
        .sqrt()
        * scale
}

/// Merge the energy around each peak into one amplitude
///
/// For each index `i`, the bins `[i - width/2, i + width/2]` (clipped to the
/// spectrum) are combined as `sqrt(sum(m²)) * scale`.
pub fn merge(magnitudes: &[f64], indices: &[usize], width: usize, scale: f64) -> Vec<f64> {
    indices
        .iter()
        .map(|&i| merge_one(magnitudes, i, width, scale))
        .collect()
}

/// Transform a waveform, find its peaks and merge their energy
///
/// Mean removal is always applied. The merge runs on the floored spectrum,
/// the same data the peak search saw.
pub fn extract_peaks(
    waveform: &Waveform,
    window: Option<&Window>,
    min_distance: usize,
    merge_width: usize,
    scale: f64,
) -> Result<PeakSet, AnalysisError> {
    let spectrum = FftAnalyzer::new().analyze_waveform(waveform, window, true)?;
    let mut floored = spectrum.magnitudes;
    apply_noise_floor(&mut floored);

    let indices = search(&floored, min_distance);
    let amplitudes = merge(&floored, &indices, merge_width, scale);
    let peaks = indices
        .into_iter()
        .zip(amplitudes)
        .map(|(index, amplitude)| Peak {
            index,
            frequency: spectrum.frequencies[index],
            amplitude,
        })
        .collect();
    Ok(PeakSet { peaks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_merge_of_unit_impulse_is_one_for_any_width() {
        let mut spectrum = vec![0.0; 64];
        spectrum[20] = 1.0;
        for width in [1, 2, 3, 10, 50, 200] {
            let merged = merge(&spectrum, &[20], width, 1.0);
            assert_relative_eq!(merged[0], 1.0);
        }
    }

    #[test]
    fn test_merge_clips_at_bounds_and_scales() {
        let spectrum = vec![3.0, 4.0, 0.0, 0.0];
        assert_relative_eq!(merge(&spectrum, &[0], 4, 1.0)[0], 5.0);
        assert_relative_eq!(merge(&spectrum, &[0], 4, 2.0)[0], 10.0);
        assert_relative_eq!(merge(&spectrum, &[3], 2, 1.0)[0], 0.0);
    }

    #[test]
    fn test_noise_floor_zeroes_bins_below_std() {
        let mut values = vec![0.1, 0.2, 5.0, 0.1, 0.3];
        apply_noise_floor(&mut values);
        assert_eq!(values, vec![0.0, 0.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_extract_finds_separated_maxima() {
        let mut spectrum = vec![0.0; 100];
        spectrum[10] = 1.0;
        spectrum[50] = 2.0;
        spectrum[80] = 1.5;
        assert_eq!(extract(&spectrum, 2), vec![10, 50, 80]);
    }

    #[test]
    fn test_extract_keeps_highest_of_close_peaks() {
        let mut spectrum = vec![0.0; 40];
        spectrum[10] = 1.0;
        spectrum[12] = 2.0;
        spectrum[30] = 1.0;
        assert_eq!(extract(&spectrum, 3), vec![12, 30]);
        assert_eq!(extract(&spectrum, 2), vec![10, 12, 30]);
    }

    #[test]
    fn test_extract_ignores_edges_and_flat_input() {
        let mut spectrum = vec![0.0; 10];
        spectrum[0] = 5.0;
        spectrum[9] = 5.0;
        assert!(extract(&spectrum, 1).is_empty());
        assert!(extract(&[1.0; 16], 1).is_empty());
    }

    #[test]
    fn test_plateau_reports_centre() {
        let mut spectrum = vec![0.0; 20];
        for v in &mut spectrum[8..11] {
            *v = 1.0;
        }
        assert_eq!(extract(&spectrum, 1), vec![9]);
    }

    #[test]
    fn test_extract_peaks_on_two_tones() {
        let fs = 1000.0;
        let samples: Vec<f64> = (0..1000)
            .map(|i| {
                let t = i as f64 / fs;
                (2.0 * PI * 50.0 * t).sin() + 0.5 * (2.0 * PI * 200.0 * t).sin()
            })
            .collect();
        let waveform = Waveform::new(samples, fs);
        let window = Window::hann(waveform.len());
        let peaks = extract_peaks(&waveform, Some(&window), 2, 10, 1.0).unwrap();

        assert_eq!(peaks.len(), 2);
        assert_relative_eq!(peaks.peaks[0].frequency, 50.0);
        assert_relative_eq!(peaks.peaks[1].frequency, 200.0);
        // Merged amplitude is half the tone amplitude (one-sided, 1/N scaling)
        assert_relative_eq!(peaks.peaks[0].amplitude, 0.5, max_relative = 1e-2);
        assert_relative_eq!(peaks.peaks[1].amplitude, 0.25, max_relative = 1e-2);
    }
}
