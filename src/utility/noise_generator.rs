// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Gaussian Noise Generator
//!
//! This module provides a lightweight generator of Gaussian white noise used
//! by the simulated hardware session and by the test suite:
//!
//! - Fast XORShift pseudo-random number generation
//! - Box-Muller transform for Gaussian distribution
//! - Reproducible sequences from a fixed seed
//!
//! ## Examples
//!
//! ```rust
//! use juice_scm_gse::utility::noise_generator::NoiseGenerator;
//!
//! let mut generator = NoiseGenerator::new(12345);
//!
//! // 1024 samples of noise with a 10 mV standard deviation
//! let samples = generator.gaussian_samples(1024, 0.01);
//! assert_eq!(samples.len(), 1024);
//! ```


/// Seed used when a zero seed is requested (XORShift never leaves state 0)
const FALLBACK_SEED: u32 = 0x9E37_79B9;

/// Gaussian white noise generator
///
/// Uses an XORShift32 core and the Box-Muller transform. The same seed always
/// produces the same sequence.
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    /// Internal state of the XORShift random number generator.
    rng_state: u32,
}

impl NoiseGenerator {
    /// Creates a new noise generator with a given seed.
    ///
    /// # Examples
    ///
    /// ```
    /// use juice_scm_gse::utility::noise_generator::NoiseGenerator;
    ///
    /// let generator = NoiseGenerator::new(12345);
    /// ```
    pub fn new(seed: u32) -> Self {
        let mut generator = Self {
            rng_state: if seed == 0 { FALLBACK_SEED } else { seed },
        };
        // Small seeds give small first outputs, skip past them
        for _ in 0..8 {
            generator.next_u32();
        }
        generator
    }

    fn next_u32(&mut self) -> u32 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        self.rng_state
    }

    /// Generates a random floating-point number between -1.0 and 1.0.
    ///
    /// ```
    /// use juice_scm_gse::utility::noise_generator::NoiseGenerator;
    ///
    /// let mut generator = NoiseGenerator::new(12345);
    /// let value = generator.random_float();
    /// assert!(value >= -1.0 && value <= 1.0);
    /// ```
    pub fn random_float(&mut self) -> f64 {
        (self.next_u32() as f64 / u32::MAX as f64) * 2.0 - 1.0
    }

    /// Generates a random value from a standard Gaussian (normal) distribution.
    ///
    /// The Box-Muller transform converts two uniform variables into a normally
    /// distributed one:
    /// ```text
    /// z = sqrt(-2 * ln(u1)) * cos(2 * π * u2)
    /// ```
    pub fn random_gaussian(&mut self) -> f64 {
        let u1 = (self.random_float() + 1.0) / 2.0;
        let u2 = (self.random_float() + 1.0) / 2.0;

        // Avoid ln(0)
        let u1 = u1.max(1e-12);

        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Generates `num_samples` values of Gaussian noise with standard deviation `sigma`.
    pub fn gaussian_samples(&mut self, num_samples: usize, sigma: f64) -> Vec<f64> {
        (0..num_samples)
            .map(|_| self.random_gaussian() * sigma)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = NoiseGenerator::new(99);
        let mut b = NoiseGenerator::new(99);
        assert_eq!(a.gaussian_samples(32, 1.0), b.gaussian_samples(32, 1.0));
    }

    #[test]
    fn test_zero_seed_still_produces_noise() {
        let mut generator = NoiseGenerator::new(0);
        let samples = generator.gaussian_samples(16, 1.0);
        assert!(samples.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_gaussian_statistics() {
        let mut generator = NoiseGenerator::new(12345);
        let samples = generator.gaussian_samples(20_000, 2.0);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / samples.len() as f64;
        assert!(mean.abs() < 0.1, "mean was {}", mean);
        assert!((variance.sqrt() - 2.0).abs() < 0.1, "std was {}", variance.sqrt());
    }
}
