// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Registry of named commands

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::operations::{
    DynamicTfOperation, PowerOffOperation, PowerOnOperation, PsdOperation, RunAllPhasesOperation,
    StaticTfOperation,
};
use super::{CommandEnv, CommandError, SharedSession};
use crate::hardware::HardwareSession;
use crate::measurement::MeasurementError;

/// A command as seen by the dispatcher: raw JSON arguments in, outcome out
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        session: SharedSession,
        args: &Value,
        env: &CommandEnv<'_>,
    ) -> Result<(), CommandError>;
}

/// A command with typed arguments
///
/// Arguments are deserialized before the session is locked, so a command
/// with bad arguments never reaches the hardware.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;

    async fn run(
        &self,
        session: &mut dyn HardwareSession,
        args: Self::Args,
        env: &CommandEnv<'_>,
    ) -> Result<(), MeasurementError>;
}

struct Typed<O>(O);

#[async_trait]
impl<O: Operation> CommandHandler for Typed<O> {
    async fn execute(
        &self,
        command: &str,
        session: SharedSession,
        args: &Value,
        env: &CommandEnv<'_>,
    ) -> Result<(), CommandError> {
        let args = parse_args::<O::Args>(command, args)?;
        let mut guard = session.lock().await;
        self.0
            .run(&mut **guard, args, env)
            .await
            .map_err(|source| CommandError::ExecutionFailed {
                command: command.to_string(),
                source,
            })
    }
}

/// Deserialize command arguments; absent arguments read as an empty object
pub fn parse_args<T: DeserializeOwned>(command: &str, args: &Value) -> Result<T, CommandError> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(args).map_err(|e| CommandError::InvalidArguments {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

/// Name to handler table
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bench command
    ///
    /// `ON` and `OFF` are the power command names of the legacy
    /// client scripts and stay registered as aliases.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("psd", PsdOperation);
        registry.register("dynamic-tf", DynamicTfOperation);
        registry.register("static-tf", StaticTfOperation);
        registry.register("power-on", PowerOnOperation);
        registry.register("power-off", PowerOffOperation);
        registry.register("run-all-phases", RunAllPhasesOperation);
        registry.alias("ON", "power-on");
        registry.alias("OFF", "power-off");
        registry
    }

    pub fn register<O: Operation>(&mut self, name: &str, operation: O) {
        debug!("Registering command '{}'", name);
        self.handlers
            .insert(name.to_string(), Arc::new(Typed(operation)));
    }

    /// Make `alias` run the handler registered as `target`
    ///
    /// Returns false when `target` is not registered.
    pub fn alias(&mut self, alias: &str, target: &str) -> bool {
        match self.handlers.get(target).cloned() {
            Some(handler) => {
                self.handlers.insert(alias.to_string(), handler);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
