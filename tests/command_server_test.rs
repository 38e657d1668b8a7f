// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use juice_scm_gse::command::client::{make_cmd, send_command, turn_on_psu, ProgressClient};
use juice_scm_gse::command::operations::RunAllArgs;
use juice_scm_gse::config::Config;
use juice_scm_gse::daemon::Daemon;
use juice_scm_gse::progress::DONE_STEP;
use serde_json::Value;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// Fast configuration on ephemeral ports
fn bench_config(workdir: &Path) -> Config {
    let mut config = Config::default();
    config.server.command_port = 0;
    config.server.progress_port = 0;
    config.output.workdir = workdir.to_path_buf();
    config.hardware.settle_delay_ms = 0;
    config.psd.snapshots_count = 2;
    config.psd.buffer_size = 256;
    config.static_tf.steps = 3;
    config.static_tf.step_settle_ms = 0;
    config.static_tf.samples_per_step = 64;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_sequence_over_tcp() -> Result<()> {
    setup();
    let dir = tempdir()?;
    let mut daemon = Daemon::new();
    daemon.launch(&bench_config(dir.path())).await?;
    let command_addr = daemon.command_addr().unwrap();
    let progress_addr = daemon.progress_addr().unwrap();

    let mut progress = ProgressClient::connect(progress_addr).await?;
    while daemon.progress().subscriber_count() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let request = make_cmd(
        "CHY",
        &RunAllArgs {
            d_tf_frequencies: Some(vec![1000.0]),
            ..RunAllArgs::default()
        },
    )?;
    let reply = timeout(Duration::from_secs(60), send_command(command_addr, &request)).await??;
    assert!(reply.is_success(), "{}", reply.result);
    assert_eq!(reply.name.as_deref(), Some("run-all-phases"));
    assert_eq!(reply.channel.as_deref(), Some("CHY"));

    // Events were published before the reply; read up to the final one
    let mut steps = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), progress.next_event())
            .await??
            .expect("progress connection closed");
        assert_eq!(event.channel, "CHY");
        steps.push(event.step.clone());
        if event.step == DONE_STEP {
            assert_eq!(event.global_progress, 1.0);
            break;
        }
    }
    for step in ["PSD", "Dynamic TF", "Static TF"] {
        assert!(steps.iter().any(|s| s == step), "no {step} event");
    }

    for phase in ["psd", "dynamic_tf", "static_tf"] {
        let phase_dir = dir.path().join("CHY").join(phase);
        assert!(std::fs::read_dir(&phase_dir)?.count() > 0, "{phase_dir:?}");
    }

    daemon.shutdown().await;
    daemon.join().await?;
    Ok(())
}

#[tokio::test]
async fn test_error_replies_over_tcp() -> Result<()> {
    setup();
    let dir = tempdir()?;
    let mut daemon = Daemon::new();
    daemon.launch(&bench_config(dir.path())).await?;
    let command_addr = daemon.command_addr().unwrap();

    let reply = send_command(command_addr, &turn_on_psu("CHW")).await?;
    assert!(reply.result.starts_with("unknown command"));

    // Several lines on one connection, one reply each
    let stream = TcpStream::connect(command_addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(b"this is not json\n{\"CMD\": \"reboot\", \"channel\": \"CHX\"}\n")
        .await?;
    let mut lines = BufReader::new(read_half).lines();

    let first: Value = serde_json::from_str(&lines.next_line().await?.unwrap())?;
    assert!(first["result"]
        .as_str()
        .unwrap()
        .starts_with("unknown command: malformed command"));

    let second: Value = serde_json::from_str(&lines.next_line().await?.unwrap())?;
    assert_eq!(second["CMD"], "reboot");
    assert_eq!(second["channel"], "CHX");
    assert!(second["result"]
        .as_str()
        .unwrap()
        .starts_with("unknown command"));

    daemon.shutdown().await;
    daemon.join().await?;
    Ok(())
}
