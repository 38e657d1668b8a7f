// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! One-way progress side channel
//!
//! Measurement phases publish [`ProgressEvent`]s while the command that
//! started them is still running. Events are broadcast to any number of
//! subscribers (the TCP progress publisher, tests); nobody acknowledges them
//! and publishing never blocks or fails when nobody listens.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Step name of the final event of a full sequence
pub const DONE_STEP: &str = "Done";

/// Progress of a measurement, as shown by the monitoring panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Channel being measured
    pub channel: String,
    /// Current phase (`PSD`, `Dynamic TF`, `Static TF`, `Done`)
    pub step: String,
    /// Progress of the whole sequence in [0, 1]
    pub global_progress: f64,
    /// Human readable detail of the current sub-step
    pub step_detail: String,
    /// Progress inside the current phase in [0, 1]
    pub step_progress: f64,
}

impl ProgressEvent {
    pub fn new(
        channel: &str,
        step: &str,
        global_progress: f64,
        step_detail: impl Into<String>,
        step_progress: f64,
    ) -> Self {
        Self {
            channel: channel.to_string(),
            step: step.to_string(),
            global_progress: global_progress.clamp(0.0, 1.0),
            step_detail: step_detail.into(),
            step_progress: step_progress.clamp(0.0, 1.0),
        }
    }
}

/// Broadcast sender of progress events
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressEvent>,
    /// Latest event, replayed to new subscribers
    latest: Arc<RwLock<Option<ProgressEvent>>>,
}

impl ProgressReporter {
    /// Create a reporter
    ///
    /// ### Parameters
    /// * `capacity` - Events buffered per subscriber before it starts lagging
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn subscribe(&self) -> ProgressConsumer {
        ProgressConsumer {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish an event to all subscribers
    pub async fn report(&self, event: ProgressEvent) {
        log::debug!(
            "[{}] {} {:.0}% - {} {:.0}%",
            event.channel,
            event.step,
            event.global_progress * 100.0,
            event.step_detail,
            event.step_progress * 100.0
        );
        *self.latest.write().await = Some(event.clone());
        // No active receivers is not an error
        let _ = self.sender.send(event);
    }

    pub async fn latest(&self) -> Option<ProgressEvent> {
        self.latest.read().await.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of the progress channel
pub struct ProgressConsumer {
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressConsumer {
    /// Next event, `None` once every reporter is dropped
    ///
    /// A consumer that falls behind skips the events it missed.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Progress consumer lagged behind, skipped {} events", skipped);
                }
            }
        }
    }

    /// Drain the events already queued, without waiting
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }
}
