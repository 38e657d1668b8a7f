// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the juice-scm-gse project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! TCP endpoints of the daemon
//!
//! - The command server reads one JSON command per line and answers with the
//!   same object plus a `result` field. Commands from every connection go
//!   through one queue to a single executor, so exactly one command runs at a
//!   time.
//! - The progress publisher writes every [`ProgressEvent`](crate::progress::ProgressEvent)
//!   as one JSON line to each connected client. Clients never send anything.

use anyhow::{Context, Result};
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::command::{
    reply_text, CommandDispatcher, CommandError, CommandRequest, SessionMap, FAILURE_PREFIX,
};
use crate::progress::ProgressReporter;

/// How often blocking loops check the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Commands waiting for the executor
pub const QUEUE_CAPACITY: usize = 32;

/// A command with the channel its reply goes back through
#[derive(Debug)]
pub struct QueuedCommand {
    pub request: CommandRequest,
    pub reply: oneshot::Sender<String>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Run queued commands one after the other until the queue closes
///
/// A command that panics gets a failure reply; the executor keeps serving.
pub async fn run_executor(
    mut queue: mpsc::Receiver<QueuedCommand>,
    dispatcher: Arc<CommandDispatcher>,
    sessions: Arc<SessionMap>,
    progress: ProgressReporter,
) -> Result<()> {
    info!("Command executor started");
    while let Some(job) = queue.recv().await {
        let dispatch = dispatcher.dispatch(&job.request, &sessions, &progress);
        let result = match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(
                    "Command '{}' on {} panicked: {}",
                    job.request.name, job.request.channel, reason
                );
                format!("{}: '{}' aborted: {}", FAILURE_PREFIX, job.request.name, reason)
            }
        };
        if job.reply.send(result).is_err() {
            warn!("Client of '{}' left before the reply", job.request.name);
        }
    }
    info!("Command queue closed, executor stopping");
    Ok(())
}

/// Queue a command and wait for its reply string
pub async fn submit(queue: &mpsc::Sender<QueuedCommand>, request: CommandRequest) -> String {
    let (reply, receiver) = oneshot::channel();
    if queue.send(QueuedCommand { request, reply }).await.is_err() {
        return format!("{}: command executor is not running", FAILURE_PREFIX);
    }
    receiver
        .await
        .unwrap_or_else(|_| format!("{}: command executor stopped", FAILURE_PREFIX))
}

/// Reply to one request line
///
/// The reply echoes the request object with `result` added; a line that is
/// not a JSON object gets a bare `{"result": ...}`.
pub async fn process_line(line: &str, queue: &mpsc::Sender<QueuedCommand>) -> Value {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            let mut reply = Map::new();
            reply.insert(
                "result".to_string(),
                Value::String(reply_text(&Err(CommandError::Malformed(e.to_string())))),
            );
            return Value::Object(reply);
        }
    };

    let result = match serde_json::from_value::<CommandRequest>(value.clone()) {
        Ok(request) => submit(queue, request).await,
        Err(e) => reply_text(&Err(CommandError::Malformed(e.to_string()))),
    };
    let mut reply = match value {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    reply.insert("result".to_string(), Value::String(result));
    Value::Object(reply)
}

async fn handle_command_connection(
    stream: TcpStream,
    queue: mpsc::Sender<QueuedCommand>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received {}", line);
        let reply = process_line(&line, &queue).await;
        let mut text = serde_json::to_string(&reply)?;
        text.push('\n');
        write_half.write_all(text.as_bytes()).await?;
        write_half.flush().await?;
    }
    Ok(())
}

/// Accept connections while `running` is set
///
/// A failed accept is logged and the loop goes on.
async fn accept_loop<S, A, F, H>(
    service: &str,
    running: Arc<AtomicBool>,
    mut accept: A,
    mut handle: H,
) where
    A: FnMut() -> F,
    F: Future<Output = std::io::Result<(S, SocketAddr)>>,
    H: FnMut(S, SocketAddr),
{
    while running.load(Ordering::SeqCst) {
        match timeout(POLL_INTERVAL, accept()).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                error!("{}: accept failed: {}", service, e);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Ok(Ok((stream, peer))) => handle(stream, peer),
        }
    }
}

/// Line-delimited JSON command server
pub struct CommandServer {
    listener: TcpListener,
    queue: mpsc::Sender<QueuedCommand>,
}

impl CommandServer {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        queue: mpsc::Sender<QueuedCommand>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind the command server")?;
        Ok(Self { listener, queue })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients while `running` is set
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<()> {
        info!("Command server listening on {}", self.local_addr()?);
        let listener = &self.listener;
        accept_loop(
            "Command server",
            running,
            move || listener.accept(),
            |stream, peer| {
                debug!("Command client connected from {}", peer);
                let queue = self.queue.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_command_connection(stream, queue).await {
                        error!("Command connection {}: {:#}", peer, e);
                    }
                    debug!("Command client {} disconnected", peer);
                });
            },
        )
        .await;
        Ok(())
    }
}

async fn publish_to(
    mut stream: TcpStream,
    progress: ProgressReporter,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let mut consumer = progress.subscribe();
    if let Some(latest) = progress.latest().await {
        let mut text = serde_json::to_string(&latest)?;
        text.push('\n');
        stream.write_all(text.as_bytes()).await?;
    }
    while running.load(Ordering::SeqCst) {
        let event = match timeout(POLL_INTERVAL, consumer.next_event()).await {
            Err(_) => continue,
            Ok(Some(event)) => event,
            Ok(None) => break,
        };
        let mut text = serde_json::to_string(&event)?;
        text.push('\n');
        stream.write_all(text.as_bytes()).await?;
    }
    Ok(())
}

/// Pushes progress events to every connected client
pub struct ProgressPublisher {
    listener: TcpListener,
    progress: ProgressReporter,
}

impl ProgressPublisher {
    pub async fn bind<A: ToSocketAddrs>(addr: A, progress: ProgressReporter) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind the progress publisher")?;
        Ok(Self { listener, progress })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, running: Arc<AtomicBool>) -> Result<()> {
        info!("Progress publisher listening on {}", self.local_addr()?);
        let listener = &self.listener;
        let flag = running.clone();
        accept_loop(
            "Progress publisher",
            flag,
            move || listener.accept(),
            |stream, peer| {
                debug!("Progress subscriber connected from {}", peer);
                let progress = self.progress.clone();
                let running = running.clone();
                tokio::spawn(async move {
                    // A write error means the subscriber went away
                    if let Err(e) = publish_to(stream, progress, running).await {
                        debug!("Progress subscriber {} dropped: {}", peer, e);
                    }
                });
            },
        )
        .await;
        Ok(())
    }
}
