// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Measurement artifacts
//!
//! Every artifact is a tab-separated text file with a header row and one row
//! per point. File names carry the channel, the artifact kind and a UTC
//! timestamp so repeated runs never overwrite each other.

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::measurement::{DynamicPoint, StaticPoint};
use crate::spectral::Waveform;

/// Writer of the artifacts of one channel into one directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    directory: PathBuf,
    channel: String,
}

impl ArtifactWriter {
    /// Create the writer, creating `directory` if needed
    pub fn new(directory: impl Into<PathBuf>, channel: &str) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create output directory {:?}", directory))?;
        Ok(Self {
            directory,
            channel: channel.to_string(),
        })
    }

    fn file_path(&self, kind: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f");
        self.directory
            .join(format!("{}_{}_{}.tsv", self.channel, kind, stamp))
    }

    fn write_table<I>(&self, kind: &str, header: &[&str], rows: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = Vec<f64>>,
    {
        let path = self.file_path(kind);
        let file =
            File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "{}", header.join("\t"))?;
        let mut count = 0usize;
        for row in rows {
            let line: Vec<String> = row.iter().map(|v| format!("{:e}", v)).collect();
            writeln!(writer, "{}", line.join("\t"))?;
            count += 1;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {:?}", path))?;

        debug!("Wrote {} rows to {:?}", count, path);
        Ok(path)
    }

    /// Raw capture: a `time` column then one column per waveform
    pub fn write_snapshot(
        &self,
        kind: &str,
        column_names: &[&str],
        waveforms: &[Waveform],
    ) -> Result<PathBuf> {
        if column_names.len() != waveforms.len() {
            anyhow::bail!(
                "{} column names for {} waveforms",
                column_names.len(),
                waveforms.len()
            );
        }
        let rows = waveforms.iter().map(|w| w.len()).min().unwrap_or(0);
        let rate = waveforms
            .first()
            .map(|w| w.sampling_frequency())
            .unwrap_or(1.0);

        let mut header = vec!["time"];
        header.extend_from_slice(column_names);
        self.write_table(
            kind,
            &header,
            (0..rows).map(|i| {
                let mut row = Vec::with_capacity(waveforms.len() + 1);
                row.push(i as f64 / rate);
                row.extend(waveforms.iter().map(|w| w.samples()[i]));
                row
            }),
        )
    }

    pub fn write_psd(&self, frequencies: &[f64], psd: &[f64]) -> Result<PathBuf> {
        self.write_table(
            "psd",
            &["frequency", "psd"],
            frequencies.iter().zip(psd).map(|(&f, &p)| vec![f, p]),
        )
    }

    pub fn write_dynamic_tf(&self, points: &[DynamicPoint]) -> Result<PathBuf> {
        self.write_table(
            "dynamic_tf",
            &["frequency", "gain_db", "phase_rad"],
            points
                .iter()
                .map(|p| vec![p.frequency, p.gain_db, p.phase_rad]),
        )
    }

    pub fn write_static_tf(&self, points: &[StaticPoint]) -> Result<PathBuf> {
        self.write_table(
            "static_tf",
            &["input", "output"],
            points.iter().map(|p| vec![p.input, p.output]),
        )
    }
}
