// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Utility module for common utilities used throughout the project

pub mod noise_generator;

use anyhow::{Context, Result};

/// Parse a `;`-separated list of floats, e.g. `"100;1000;1e4"`
///
/// Surrounding whitespace and empty items (trailing `;`) are ignored.
pub fn list_of_floats(input: &str) -> Result<Vec<f64>> {
    input
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<f64>()
                .with_context(|| format!("'{}' is not a number", item))
        })
        .collect()
}

/// `points` frequencies evenly spaced on a log scale from `10^start_exp` to `10^stop_exp`
///
/// Both ends are included; a single point yields `10^start_exp`.
pub fn logspace(start_exp: f64, stop_exp: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![10f64.powf(start_exp)],
        n => {
            let step = (stop_exp - start_exp) / (n - 1) as f64;
            (0..n)
                .map(|i| 10f64.powf(start_exp + step * i as f64))
                .collect()
        }
    }
}

/// `points` values evenly spaced from `start` to `stop`, both included
pub fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
