// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Command dispatching
//!
//! A command is a JSON object naming an operation, the channel it targets and
//! its arguments:
//!
//! ```json
//! {"CMD": "static-tf", "channel": "CHX", "args": {"amplitude": 0.9, "steps": 100}}
//! ```
//!
//! The [`CommandDispatcher`] looks the name up in an explicit
//! [`CommandRegistry`], finds the session of the channel, deserializes the
//! arguments into the operation's typed structure (unknown fields are
//! rejected) and runs it. The outcome is always a single string: `"success"`,
//! or a message starting with `"unknown command"` that embeds the error.

pub mod client;
pub mod operations;
pub mod registry;

use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::hardware::HardwareSession;
use crate::measurement::MeasurementError;
use crate::progress::ProgressReporter;

pub use registry::{CommandHandler, CommandRegistry, Operation};

/// Reply of a successful command
pub const SUCCESS: &str = "success";
/// Prefix of every failure reply
pub const FAILURE_PREFIX: &str = "unknown command";

/// A session shared between the command executor and the shutdown hook
pub type SharedSession = Arc<Mutex<Box<dyn HardwareSession>>>;

/// Sessions by channel identifier
pub type SessionMap = HashMap<String, SharedSession>;

/// Inbound command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Registered command name
    #[serde(rename = "CMD")]
    pub name: String,
    /// Target channel
    pub channel: String,
    /// Named arguments, typed per command
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl CommandRequest {
    pub fn new(name: &str, channel: &str, args: Value) -> Self {
        Self {
            name: name.to_string(),
            channel: channel.to_string(),
            args,
        }
    }
}

/// Reply to a command: the request fields plus `result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(rename = "CMD", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
    pub result: String,
}

impl CommandReply {
    pub fn is_success(&self) -> bool {
        self.result == SUCCESS
    }
}

/// Why a command did not succeed
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("'{0}' is not a registered command")]
    CommandNotFound(String),

    #[error("no hardware session for channel '{0}'")]
    ChannelNotFound(String),

    #[error("invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error("'{command}' failed: {source}")]
    ExecutionFailed {
        command: String,
        #[source]
        source: MeasurementError,
    },
}

/// The reply string of a command outcome
pub fn reply_text(outcome: &Result<(), CommandError>) -> String {
    match outcome {
        Ok(()) => SUCCESS.to_string(),
        Err(err) => format!("{}: {}", FAILURE_PREFIX, err),
    }
}

/// What an operation gets to work with besides its session and arguments
pub struct CommandEnv<'a> {
    pub config: &'a Config,
    pub progress: &'a ProgressReporter,
    pub channel: &'a str,
    /// Delay after each power transition
    pub settle_delay: Duration,
}

/// Looks commands up and runs them against the channel sessions
pub struct CommandDispatcher {
    registry: CommandRegistry,
    config: Arc<Config>,
}

impl CommandDispatcher {
    pub fn new(registry: CommandRegistry, config: Arc<Config>) -> Self {
        Self { registry, config }
    }

    /// Run a command to completion
    pub async fn execute(
        &self,
        request: &CommandRequest,
        sessions: &SessionMap,
        progress: &ProgressReporter,
    ) -> Result<(), CommandError> {
        let handler = self
            .registry
            .get(&request.name)
            .ok_or_else(|| CommandError::CommandNotFound(request.name.clone()))?;
        let session = sessions
            .get(&request.channel)
            .cloned()
            .ok_or_else(|| CommandError::ChannelNotFound(request.channel.clone()))?;

        let env = CommandEnv {
            config: &self.config,
            progress,
            channel: &request.channel,
            settle_delay: Duration::from_millis(self.config.hardware.settle_delay_ms),
        };
        handler
            .execute(&request.name, session, &request.args, &env)
            .await
    }

    /// Run a command and turn the outcome into its reply string
    pub async fn dispatch(
        &self,
        request: &CommandRequest,
        sessions: &SessionMap,
        progress: &ProgressReporter,
    ) -> String {
        info!("Executing '{}' on {}", request.name, request.channel);
        let outcome = self.execute(request, sessions, progress).await;
        if let Err(err) = &outcome {
            error!("Command '{}' on {}: {}", request.name, request.channel, err);
        }
        reply_text(&outcome)
    }
}
