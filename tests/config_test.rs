// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use juice_scm_gse::config::{Config, DriverKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::tempdir;

static INIT: Once = Once::new();

// Setup logger for tests
fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

#[test]
fn test_config_load_and_save() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let mut config = Config::default();
    config.server.command_port = 10992;
    config.psd.snapshots_count = 25;
    config.hardware.channels[1].simulator.gain = 3.5;
    config.save_to_file(&config_path)?;

    let loaded = Config::from_file(&config_path)?;
    assert_eq!(loaded, config);
    assert_eq!(loaded.hardware.channels[1].driver, DriverKind::Simulated);

    // A missing file is created with the defaults
    let missing = temp_dir.path().join("missing.yaml");
    let default_config = Config::from_file(&missing)?;
    assert!(missing.exists());
    assert_eq!(default_config, Config::default());
    assert_eq!(default_config.server.command_port, 9992);
    assert_eq!(default_config.server.progress_port, 9991);

    Ok(())
}

#[test]
fn test_partial_config_takes_defaults() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(
        &config_path,
        r#"
output:
  workdir: /data/scm
static_tf:
  amplitude: 0.9
  steps: 20
  step_settle_ms: 5
  samples_per_step: 512
  sampling_freq: 50000.0
"#,
    )?;

    let config = Config::from_file(&config_path)?;
    assert_eq!(config.output.workdir, PathBuf::from("/data/scm"));
    assert_eq!(config.static_tf.steps, 20);
    assert_eq!(config.psd, Config::default().psd);
    assert_eq!(config.hardware.channels.len(), 3);
    Ok(())
}

#[test]
fn test_schema_error_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(
        &config_path,
        r#"
server:
  address: 127.0.0.1
  command_port: "not-a-port"
  progress_port: 9991
"#,
    )?;

    let result = Config::from_file(&config_path);
    assert!(result.is_err(), "Config loading should have failed");

    let sample_path = config_path.with_extension("sample.yaml");
    assert!(Path::new(&sample_path).exists(), "Sample config file was not created");
    let sample = Config::from_file(&sample_path)?;
    assert_eq!(sample, Config::default());
    Ok(())
}

#[test]
fn test_unknown_field_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(
        &config_path,
        r#"
psd:
  snapshots_count: 10
  sampling_freq: 100000.0
  buffer_size: 8192
  window: hann
"#,
    )?;

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid configuration"));
    Ok(())
}

#[test]
fn test_specific_rules_after_schema() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Schema-valid, but both listeners on the same port
    let mut config = Config::default();
    config.server.progress_port = config.server.command_port;
    config.save_to_file(&config_path)?;

    assert!(Config::from_file(&config_path).is_err());
    assert!(config_path.with_extension("sample.yaml").exists());
    Ok(())
}
