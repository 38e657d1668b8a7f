// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;

use crate::command::{CommandDispatcher, CommandRegistry, SessionMap};
use crate::config::Config;
use crate::hardware::open_session;
use crate::progress::ProgressReporter;
use crate::server::{run_executor, CommandServer, ProgressPublisher, QueuedCommand, QUEUE_CAPACITY};

/// Events buffered per progress subscriber
const PROGRESS_CAPACITY: usize = 256;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// The measurement daemon and its tasks
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    sessions: Arc<SessionMap>,
    progress: ProgressReporter,
    executor: Option<JoinHandle<Result<()>>>,
    command_addr: Option<SocketAddr>,
    progress_addr: Option<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            sessions: Arc::new(SessionMap::new()),
            progress: ProgressReporter::new(PROGRESS_CAPACITY),
            executor: None,
            command_addr: None,
            progress_addr: None,
        }
    }

    /// Open the channel sessions and start every task
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let sessions = open_sessions(config)?;
        self.launch_with_sessions(config, sessions).await
    }

    /// Start every task on sessions opened by the caller
    pub async fn launch_with_sessions(
        &mut self,
        config: &Config,
        sessions: SessionMap,
    ) -> Result<()> {
        info!("{} hardware session(s) open", sessions.len());
        self.sessions = Arc::new(sessions);

        let (queue, receiver) = mpsc::channel(QUEUE_CAPACITY);
        self.start_executor(config, receiver);
        self.start_command_server(config, queue).await?;
        self.start_progress_publisher(config).await?;
        self.start_heartbeat()?;

        Ok(())
    }

    /// Start the task running queued commands one at a time
    fn start_executor(&mut self, config: &Config, receiver: mpsc::Receiver<QueuedCommand>) {
        let dispatcher = Arc::new(CommandDispatcher::new(
            CommandRegistry::standard(),
            Arc::new(config.clone()),
        ));
        let task = tokio::spawn(run_executor(
            receiver,
            dispatcher,
            self.sessions.clone(),
            self.progress.clone(),
        ));
        self.executor = Some(task);
    }

    async fn start_command_server(
        &mut self,
        config: &Config,
        queue: mpsc::Sender<QueuedCommand>,
    ) -> Result<()> {
        let server = CommandServer::bind(
            (config.server.address.as_str(), config.server.command_port),
            queue,
        )
        .await?;
        self.command_addr = Some(server.local_addr()?);

        let running = self.running.clone();
        self.tasks.push(tokio::spawn(server.run(running)));
        Ok(())
    }

    async fn start_progress_publisher(&mut self, config: &Config) -> Result<()> {
        let publisher = ProgressPublisher::bind(
            (config.server.address.as_str(), config.server.progress_port),
            self.progress.clone(),
        )
        .await?;
        self.progress_addr = Some(publisher.local_addr()?);

        let running = self.running.clone();
        self.tasks.push(tokio::spawn(publisher.run(running)));
        Ok(())
    }

    /// Start a heartbeat task that logs the latest progress periodically
    fn start_heartbeat(&mut self) -> Result<()> {
        debug!("Starting heartbeat monitor");

        let running = self.running.clone();
        let progress = self.progress.clone();
        let task = tokio::spawn(async move {
            let mut last_beat = time::Instant::now();
            while running.load(Ordering::SeqCst) {
                time::sleep(Duration::from_millis(250)).await;
                if last_beat.elapsed() < HEARTBEAT_PERIOD {
                    continue;
                }
                last_beat = time::Instant::now();
                match progress.latest().await {
                    Some(event) => debug!(
                        "Daemon heartbeat: {} {} {:.0}%",
                        event.channel,
                        event.step,
                        event.global_progress * 100.0
                    ),
                    None => debug!("Daemon heartbeat: idle"),
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Address the command server is bound to
    pub fn command_addr(&self) -> Option<SocketAddr> {
        self.command_addr
    }

    /// Address the progress publisher is bound to
    pub fn progress_addr(&self) -> Option<SocketAddr> {
        self.progress_addr
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn sessions(&self) -> Arc<SessionMap> {
        self.sessions.clone()
    }

    /// Wait until the command executor exits
    ///
    /// The executor only exits on its own when it fails; never resolves when
    /// no executor was started.
    pub async fn wait_for_executor(&mut self) -> Result<()> {
        let Some(task) = self.executor.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = task.await;
        self.executor = None;
        match outcome {
            Ok(result) => result,
            Err(e) => Err(anyhow!("Command executor crashed: {}", e)),
        }
    }

    /// Stop all tasks and power every channel off
    ///
    /// The executor is aborted first so that no measurement holds a session
    /// while the channels are powered off.
    pub async fn shutdown(&mut self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);

        if let Some(executor) = self.executor.take() {
            executor.abort();
            match executor.await {
                Err(e) if e.is_cancelled() => debug!("Command executor aborted"),
                Err(e) => error!("Command executor panicked: {}", e),
                Ok(Err(e)) => warn!("Command executor failed: {:#}", e),
                Ok(Ok(())) => debug!("Command executor already stopped"),
            }
        }

        power_off_all(&self.sessions).await;
    }

    /// Wait for all tasks to complete
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match task.await {
                Ok(Err(e)) => error!("Task failed: {:#}", e),
                Err(e) => error!("Task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }
}

/// Open the session of every configured channel
fn open_sessions(config: &Config) -> Result<SessionMap> {
    let mut sessions = SessionMap::new();
    for channel in &config.hardware.channels {
        let session = open_session(channel, &config.hardware)
            .with_context(|| format!("Failed to open channel {}", channel.id))?;
        sessions.insert(channel.id.clone(), Arc::new(Mutex::new(session)));
    }
    Ok(sessions)
}

/// Power off every channel, logging failures and going on with the others
pub async fn power_off_all(sessions: &SessionMap) {
    let mut channels: Vec<&String> = sessions.keys().collect();
    channels.sort();
    for channel in channels {
        let Some(session) = sessions.get(channel) else {
            continue;
        };
        let mut session = session.lock().await;
        match session.power_off().await {
            Ok(()) => info!("{}: powered off", channel),
            Err(e) => error!("{}: power off failed: {}", channel, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::client::{make_cmd, send_command, turn_on_psu};
    use crate::command::operations::RunAllArgs;
    use crate::config::SimulatorConfig;
    use crate::hardware::{HardwareSession, SessionEvent, SimulatedSession};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    type EventLog = Arc<StdMutex<Vec<SessionEvent>>>;

    fn simulated_sessions(ids: &[&str]) -> (SessionMap, Vec<EventLog>) {
        let mut sessions = SessionMap::new();
        let mut logs = Vec::new();
        for id in ids {
            let session = SimulatedSession::new(id, &SimulatorConfig::default());
            logs.push(session.event_log());
            let boxed: Box<dyn HardwareSession> = Box::new(session);
            sessions.insert(id.to_string(), Arc::new(Mutex::new(boxed)));
        }
        (sessions, logs)
    }

    #[tokio::test]
    async fn test_power_off_all_reaches_every_channel() {
        let (sessions, logs) = simulated_sessions(&["CHX", "CHY"]);
        for session in sessions.values() {
            session.lock().await.power_on().await.unwrap();
        }

        power_off_all(&sessions).await;

        for log in logs {
            assert_eq!(
                log.lock().unwrap().last(),
                Some(&SessionEvent::PowerOff)
            );
        }
    }

    #[tokio::test]
    async fn test_launch_and_shutdown() {
        let mut config = Config::default();
        config.server.command_port = 0;
        config.server.progress_port = 0;
        config.hardware.settle_delay_ms = 0;

        let mut daemon = Daemon::new();
        daemon.launch(&config).await.unwrap();
        assert!(daemon.command_addr().is_some());
        assert!(daemon.progress_addr().is_some());
        assert_eq!(daemon.sessions().len(), 3);

        daemon.shutdown().await;
        daemon.join().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_powers_off_during_measurement() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.server.command_port = 0;
        config.server.progress_port = 0;
        config.output.workdir = dir.path().to_path_buf();
        // Long enough for the sequence to still be settling at shutdown
        config.hardware.settle_delay_ms = 5_000;

        let (sessions, logs) = simulated_sessions(&["CHX", "CHY", "CHZ"]);
        let mut daemon = Daemon::new();
        daemon.launch_with_sessions(&config, sessions).await.unwrap();
        let addr = daemon.command_addr().unwrap();

        let reply = send_command(addr, &turn_on_psu("CHX")).await.unwrap();
        assert!(reply.is_success(), "{}", reply.result);

        let request = make_cmd("CHY", &RunAllArgs::default()).unwrap();
        let in_flight = tokio::spawn(async move { send_command(addr, &request).await });
        while !logs[1].lock().unwrap().contains(&SessionEvent::PowerOn) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        daemon.shutdown().await;

        for log in &logs {
            assert_eq!(log.lock().unwrap().last(), Some(&SessionEvent::PowerOff));
        }
        // The sequence never got past its first settle delay
        assert!(!logs[1]
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SessionEvent::Acquire { .. })));

        let reply = in_flight.await.unwrap().unwrap();
        assert!(!reply.is_success());
        daemon.join().await.unwrap();
    }
}
