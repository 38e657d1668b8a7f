// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Spectral Analysis Module
//!
//! This module provides the frequency-domain tools used by every measurement
//! phase of the bench:
//!
//! - [`fft`]: one-sided amplitude/phase spectrum with optional windowing and
//!   mean removal
//! - [`psd`]: averaged, amplitude-compensated power spectral density
//! - [`peaks`]: noise-floor peak detection and neighborhood energy merging
//!
//! ## Usage
//!
//! ```
//! use juice_scm_gse::spectral::{self, Waveform};
//!
//! let sampling_frequency = 1000.0;
//! let snapshots: Vec<Waveform> = (0..4)
//!     .map(|_| Waveform::new(vec![0.0; 1024], sampling_frequency))
//!     .collect();
//!
//! let (frequencies, psd) = spectral::psd::estimate(&snapshots, sampling_frequency, true, true)
//!     .unwrap()
//!     .expect("non-empty snapshot list");
//! assert_eq!(frequencies.len(), psd.len());
//! ```

pub mod fft;
pub mod peaks;
pub mod psd;
mod waveform;

use thiserror::Error;

pub use fft::{analyze, FftAnalyzer, SpectralAnalyzer, Spectrum, Window};
pub use peaks::{extract_peaks, PeakSet};
pub use waveform::Waveform;

/// Errors raised by the analysis code before any hardware is touched
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
