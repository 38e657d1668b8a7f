// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Command line client of the measurement daemon
// Sends one command, optionally prints the progress events, then the reply

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use juice_scm_gse::command::client::{
    command, make_cmd, send_command, turn_off_psu, turn_on_psu, ProgressClient,
};
use juice_scm_gse::command::operations::{DynamicTfArgs, PsdArgs, RunAllArgs, StaticTfArgs};
use juice_scm_gse::command::CommandRequest;
use juice_scm_gse::utility::list_of_floats;

/// Send a command to the ASIC characterization daemon
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Daemon address
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Command server port
    #[arg(short, long, default_value_t = 9992)]
    port: u16,

    /// Progress publisher port
    #[arg(long, default_value_t = 9991)]
    progress_port: u16,

    /// Print progress events while the command runs
    #[arg(short, long)]
    follow: bool,

    /// Target channel (CHX, CHY, CHZ)
    #[arg(short, long, default_value = "CHX")]
    channel: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Power the channel on
    On,
    /// Power the channel off
    Off,
    /// Measure the output noise spectral density
    Psd {
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        snapshots_count: Option<usize>,
    },
    /// Measure the dynamic transfer function
    DynamicTf {
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Frequencies in Hz, separated by ';'
        #[arg(long)]
        frequencies: Option<String>,
    },
    /// Measure the static transfer function
    StaticTf {
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        amplitude: Option<f64>,
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Run PSD, dynamic TF and static TF in sequence
    RunAll {
        #[arg(long)]
        psd_output_dir: Option<PathBuf>,
        #[arg(long)]
        psd_snapshots_count: Option<usize>,
        #[arg(long)]
        d_tf_output_dir: Option<PathBuf>,
        /// Frequencies in Hz, separated by ';'
        #[arg(long)]
        d_tf_frequencies: Option<String>,
        #[arg(long)]
        s_tf_output_dir: Option<PathBuf>,
        #[arg(long)]
        s_tf_amplitude: Option<f64>,
        #[arg(long)]
        s_tf_steps: Option<usize>,
    },
}

fn build_request(channel: &str, action: Action) -> Result<CommandRequest> {
    let request = match action {
        Action::On => turn_on_psu(channel),
        Action::Off => turn_off_psu(channel),
        Action::Psd {
            output_dir,
            snapshots_count,
        } => command(
            "psd",
            channel,
            &PsdArgs {
                output_dir,
                snapshots_count,
                ..PsdArgs::default()
            },
        )?,
        Action::DynamicTf {
            output_dir,
            frequencies,
        } => command(
            "dynamic-tf",
            channel,
            &DynamicTfArgs {
                output_dir,
                frequencies: frequencies.as_deref().map(list_of_floats).transpose()?,
                ..DynamicTfArgs::default()
            },
        )?,
        Action::StaticTf {
            output_dir,
            amplitude,
            steps,
        } => command(
            "static-tf",
            channel,
            &StaticTfArgs {
                output_dir,
                amplitude,
                steps,
            },
        )?,
        Action::RunAll {
            psd_output_dir,
            psd_snapshots_count,
            d_tf_output_dir,
            d_tf_frequencies,
            s_tf_output_dir,
            s_tf_amplitude,
            s_tf_steps,
        } => make_cmd(
            channel,
            &RunAllArgs {
                psd_output_dir,
                psd_snapshots_count,
                d_tf_output_dir,
                d_tf_frequencies: d_tf_frequencies
                    .as_deref()
                    .map(list_of_floats)
                    .transpose()?,
                s_tf_output_dir,
                s_tf_amplitude,
                s_tf_steps,
            },
        )?,
    };
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let request = build_request(&args.channel, args.action)?;

    let follower = if args.follow {
        let mut client =
            ProgressClient::connect((args.address.as_str(), args.progress_port)).await?;
        Some(tokio::spawn(async move {
            while let Ok(Some(event)) = client.next_event().await {
                println!(
                    "[{}] {} {:5.1}% | {} {:5.1}%",
                    event.channel,
                    event.step,
                    event.global_progress * 100.0,
                    event.step_detail,
                    event.step_progress * 100.0
                );
            }
        }))
    } else {
        None
    };

    let reply = send_command((args.address.as_str(), args.port), &request).await?;
    if let Some(follower) = follower {
        follower.abort();
    }

    println!("{}", serde_json::to_string(&reply)?);
    if !reply.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
