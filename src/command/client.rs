// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Client side of the command and progress sockets

use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, ToSocketAddrs};

use super::operations::RunAllArgs;
use super::{CommandReply, CommandRequest};
use crate::progress::ProgressEvent;

/// Build a command with typed arguments
pub fn command<A: Serialize>(name: &str, channel: &str, args: &A) -> Result<CommandRequest> {
    let args = serde_json::to_value(args).context("Failed to serialize command arguments")?;
    let args = match args {
        Value::Object(map) if map.is_empty() => Value::Null,
        other => other,
    };
    Ok(CommandRequest::new(name, channel, args))
}

/// `{"CMD": "ON", "channel": ...}`
pub fn turn_on_psu(channel: &str) -> CommandRequest {
    CommandRequest::new("ON", channel, Value::Null)
}

/// `{"CMD": "OFF", "channel": ...}`
pub fn turn_off_psu(channel: &str) -> CommandRequest {
    CommandRequest::new("OFF", channel, Value::Null)
}

/// Full measurement sequence command
pub fn make_cmd(channel: &str, args: &RunAllArgs) -> Result<CommandRequest> {
    command("run-all-phases", channel, args)
}

/// Send one command and wait for its reply
pub async fn send_command<A: ToSocketAddrs>(
    addr: A,
    request: &CommandRequest,
) -> Result<CommandReply> {
    let stream = TcpStream::connect(addr)
        .await
        .context("Failed to connect to the command server")?;
    let (read_half, mut write_half) = stream.into_split();

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    debug!("Sending {}", line.trim_end());
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await?;

    let mut lines = BufReader::new(read_half).lines();
    let reply = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("Connection closed before the reply"))?;
    serde_json::from_str(&reply).with_context(|| format!("Invalid reply: {}", reply))
}

/// Reader of the progress socket
pub struct ProgressClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl ProgressClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("Failed to connect to the progress publisher")?;
        let (read_half, _) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
        })
    }

    /// Next event, `None` once the publisher closed the connection
    pub async fn next_event(&mut self) -> Result<Option<ProgressEvent>> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(
                serde_json::from_str(&line)
                    .with_context(|| format!("Invalid progress event: {}", line))?,
            )),
            None => Ok(None),
        }
    }
}
