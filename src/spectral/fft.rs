// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Fast Fourier Transform (FFT) implementation for spectral analysis
//!
//! This module turns a real, time-domain [`Waveform`] into a one-sided
//! amplitude/phase [`Spectrum`]. It includes:
//!
//! - The `SpectralAnalyzer` trait and its FFT implementation `FftAnalyzer`
//!   (built on the rustfft library)
//! - [`Window`] coefficients paired with their amplitude compensation factor
//! - Optional mean removal before the transform
//!
//! # Example
//!
//! ```
//! use juice_scm_gse::spectral::fft::{analyze, Window};
//!
//! // 10 cycles of a unit sine over 1000 samples at 1 kHz
//! let sampling_frequency = 1000.0;
//! let signal: Vec<f64> = (0..1000)
//!     .map(|i| (2.0 * std::f64::consts::PI * 10.0 * i as f64 / sampling_frequency).sin())
//!     .collect();
//!
//! let window = Window::hann(signal.len());
//! let spectrum = analyze(&signal, sampling_frequency, Some(&window), true).unwrap();
//! assert_eq!(spectrum.len(), 501);
//! ```
//!
//! # Spectral Analysis Process
//!
//! 1. Remove the mean of the samples (optional)
//! 2. Multiply by the window coefficients (optional)
//! 3. Compute the FFT and scale it by 1/N (amplitude-correct)
//! 4. Apply the window compensation factor
//! 5. Keep bins 0..=N/2 and extract magnitude and phase

use rustfft::{num_complex::Complex64, FftPlanner};

use super::{AnalysisError, Waveform};

/// Trait for implementing spectral analysis algorithms
///
/// All implementing types must be `Send` so that an analyzer can live inside
/// the measurement task that owns it.
pub trait SpectralAnalyzer: Send {
    /// Analyze the given samples and extract the one-sided spectrum
    ///
    /// ### Parameters
    ///
    /// * `samples` - The time-domain samples
    /// * `sampling_frequency` - Sampling frequency of the samples in Hz
    /// * `window` - Optional window, must have the same length as `samples`
    /// * `remove_mean` - Subtract the arithmetic mean before transforming
    ///
    /// ### Errors
    ///
    /// Returns [`AnalysisError::InvalidInput`] if `samples` is empty or the
    /// window length differs from the sample count.
    fn analyze(
        &mut self,
        samples: &[f64],
        sampling_frequency: f64,
        window: Option<&Window>,
        remove_mean: bool,
    ) -> Result<Spectrum, AnalysisError>;

    /// Analyze a captured waveform using its own sampling frequency
    fn analyze_waveform(
        &mut self,
        waveform: &Waveform,
        window: Option<&Window>,
        remove_mean: bool,
    ) -> Result<Spectrum, AnalysisError> {
        self.analyze(
            waveform.samples(),
            waveform.sampling_frequency(),
            window,
            remove_mean,
        )
    }
}

/// One-sided spectrum of a real signal
///
/// The vectors `frequencies`, `magnitudes` and `phases` always have the same
/// length, `N/2 + 1` for an `N`-sample input.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Frequency of each bin in Hz, ascending from 0 Hz to the fold frequency
    pub frequencies: Vec<f64>,

    /// Normalized amplitude of each bin
    ///
    /// A unit sine that falls exactly on a bin reads 0.5 here: the DFT is
    /// scaled by 1/N and the negative-frequency half is dropped, not folded.
    pub magnitudes: Vec<f64>,

    /// Principal phase angle of each bin in radians, in (-π, π]
    pub phases: Vec<f64>,
}

impl Spectrum {
    /// Number of bins
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// True when the spectrum holds no bins
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Window coefficients paired with their amplitude compensation factor
///
/// The compensation factor is `1/RMS(window)`; multiplying a windowed
/// spectrum by it restores the amplitude lost to the window taper.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    coefficients: Vec<f64>,
    compensation: f64,
}

impl Window {
    /// Build a window from arbitrary coefficients
    ///
    /// ### Errors
    ///
    /// Fails if the coefficient list is empty or its RMS is zero.
    pub fn from_coefficients(coefficients: Vec<f64>) -> Result<Self, AnalysisError> {
        if coefficients.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "window must contain at least one coefficient".to_string(),
            ));
        }
        let mean_square =
            coefficients.iter().map(|c| c * c).sum::<f64>() / coefficients.len() as f64;
        if mean_square <= 0.0 || !mean_square.is_finite() {
            return Err(AnalysisError::InvalidInput(
                "window RMS must be strictly positive".to_string(),
            ));
        }
        Ok(Self {
            coefficients,
            compensation: 1.0 / mean_square.sqrt(),
        })
    }

    /// Symmetric Hann window of `len` points
    ///
    /// `w[k] = 0.5 - 0.5 * cos(2πk / (N - 1))`, and a single point window is `[1.0]`.
    pub fn hann(len: usize) -> Self {
        let coefficients: Vec<f64> = match len {
            0 => Vec::new(),
            1 => vec![1.0],
            n => (0..n)
                .map(|k| {
                    0.5 - 0.5 * (2.0 * std::f64::consts::PI * k as f64 / (n - 1) as f64).cos()
                })
                .collect(),
        };
        Self::from_parts(coefficients)
    }

    /// Flat window (no tapering), compensation factor 1
    pub fn rectangular(len: usize) -> Self {
        Self::from_parts(vec![1.0; len])
    }

    fn from_parts(coefficients: Vec<f64>) -> Self {
        let compensation = if coefficients.is_empty() {
            1.0
        } else {
            let mean_square =
                coefficients.iter().map(|c| c * c).sum::<f64>() / coefficients.len() as f64;
            1.0 / mean_square.sqrt()
        };
        Self {
            coefficients,
            compensation,
        }
    }

    /// Number of coefficients
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    /// True for a zero-length window
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Window coefficients
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Amplitude compensation factor, `1/RMS(window)`
    pub fn compensation(&self) -> f64 {
        self.compensation
    }
}

/// FFT-based spectral analyzer
///
/// A plan is built for every transform; the analyzer itself carries no state
/// and can be held across await points.
#[derive(Debug, Clone, Copy, Default)]
pub struct FftAnalyzer;

impl FftAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Compute the full complex FFT of a real signal
    fn compute_fft(&self, signal: &[f64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = signal.iter().map(|&x| Complex64::new(x, 0.0)).collect();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(buffer.len());
        fft.process(&mut buffer);
        buffer
    }
}

impl SpectralAnalyzer for FftAnalyzer {
    fn analyze(
        &mut self,
        samples: &[f64],
        sampling_frequency: f64,
        window: Option<&Window>,
        remove_mean: bool,
    ) -> Result<Spectrum, AnalysisError> {
        let n = samples.len();
        if n == 0 {
            return Err(AnalysisError::InvalidInput(
                "cannot analyze an empty waveform".to_string(),
            ));
        }
        if let Some(window) = window {
            if window.len() != n {
                return Err(AnalysisError::InvalidInput(format!(
                    "window length {} does not match waveform length {}",
                    window.len(),
                    n
                )));
            }
        }

        let mean = if remove_mean {
            samples.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };

        let mut scale = 1.0 / n as f64;
        let prepared: Vec<f64> = match window {
            Some(window) => {
                scale *= window.compensation();
                samples
                    .iter()
                    .zip(window.coefficients())
                    .map(|(&x, &w)| (x - mean) * w)
                    .collect()
            }
            None => samples.iter().map(|&x| x - mean).collect(),
        };

        let fft_output = self.compute_fft(&prepared);

        let bins = n / 2 + 1;
        let df = sampling_frequency / n as f64;
        let mut frequencies = Vec::with_capacity(bins);
        let mut magnitudes = Vec::with_capacity(bins);
        let mut phases = Vec::with_capacity(bins);

        for (i, value) in fft_output.iter().take(bins).enumerate() {
            let scaled = value * scale;
            // The fold bin reads as the positive Nyquist frequency for even N
            frequencies.push((i as f64 * df).abs());
            magnitudes.push(scaled.norm());
            phases.push(scaled.arg());
        }

        Ok(Spectrum {
            frequencies,
            magnitudes,
            phases,
        })
    }
}

/// Analyze `samples` with an [`FftAnalyzer`]
pub fn analyze(
    samples: &[f64],
    sampling_frequency: f64,
    window: Option<&Window>,
    remove_mean: bool,
) -> Result<Spectrum, AnalysisError> {
    FftAnalyzer::new().analyze(samples, sampling_frequency, window, remove_mean)
}
