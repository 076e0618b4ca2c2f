//! Session driver, the one task that owns the core and its I/O.
//!
//! DESIGN
//! ======
//! `spawn_session` starts a tokio task that owns the [`ChatCore`], the open
//! transport session and the collaborators. It `select!`s over:
//! - commands from [`SessionHandle`]s (unbounded mpsc)
//! - results of spawned work: transport opens, history fetches, probes
//! - the open session's inbound frames
//! - the core's next timer deadline
//!
//! Every input becomes a [`CoreEvent`]; the returned [`Effect`]s are executed
//! here. After each step the view is published on a `watch` channel, so
//! consumers observe state without ever touching the core.
//!
//! Opens run in their own task under the connect timeout. Each open carries
//! a generation number; closing the transport bumps it, so an open that
//! completes after the session moved on is closed and discarded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::SourceStatus;
use crate::engine::{ChatCore, ChatView, CoreEvent, Effect};
use crate::error::{ErrorCode, SendError, TransportError};
use crate::message::SelfProfile;
use crate::transport::{HistorySource, Inbound, LivenessProbe, Transport, TransportSession};

/// External dependencies of a session.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub history: Arc<dyn HistorySource>,
    pub probe: Arc<dyn LivenessProbe>,
}

enum Command {
    Connect(String),
    Disconnect,
    Send {
        body: String,
        reply_parent: Option<String>,
        reply: oneshot::Sender<Result<String, SendError>>,
    },
    SetPaused(bool),
    Resume,
    Scroll { distance_from_tail: f64, programmatic: bool },
    ReportHeight { id: String, index: usize, extent: f64 },
    Shutdown,
}

enum Completion {
    Opened {
        generation: u64,
        result: Result<Box<dyn TransportSession>, TransportError>,
    },
    History { channel: String, result: Result<Vec<String>, String> },
    Probe { channel: String, result: Result<SourceStatus, String> },
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cheap, cloneable control surface for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ChatView>,
}

impl SessionHandle {
    pub fn connect(&self, channel: impl Into<String>) {
        self.command(Command::Connect(channel.into()));
    }

    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Send a chat line. The local echo is visible before this resolves.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] when the body is empty, the session is not
    /// connected, or the write is rejected or times out. The echo has been
    /// rolled back by then.
    pub async fn send(&self, body: impl Into<String>, reply_parent: Option<String>) -> Result<String, SendError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send { body: body.into(), reply_parent, reply })
            .map_err(|_| SendError::SessionClosed)?;
        response.await.map_err(|_| SendError::SessionClosed)?
    }

    pub fn set_paused(&self, paused: bool) {
        self.command(Command::SetPaused(paused));
    }

    pub fn resume(&self) {
        self.command(Command::Resume);
    }

    pub fn scroll(&self, distance_from_tail: f64, programmatic: bool) {
        self.command(Command::Scroll { distance_from_tail, programmatic });
    }

    pub fn report_height(&self, id: impl Into<String>, index: usize, extent: f64) {
        self.command(Command::ReportHeight { id: id.into(), index, extent });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> ChatView {
        self.view.borrow().clone()
    }

    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("session: driver has exited; command dropped");
        }
    }
}

/// Spawn the driver task. Dropping every handle also stops it.
#[must_use]
pub fn spawn_session(config: Config, profile: SelfProfile, collaborators: Collaborators) -> (SessionHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let send_timeout = config.send_timeout;
    let core = ChatCore::new(config, profile, now());
    let (view_tx, view_rx) = watch::channel(core.view());

    let driver = Driver {
        core,
        session: None,
        collaborators,
        completions: completions_tx,
        open_generation: 0,
        send_timeout,
        view: view_tx,
    };
    let task = tokio::spawn(driver.run(commands_rx, completions_rx));
    (SessionHandle { commands: commands_tx, view: view_rx }, task)
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    core: ChatCore,
    session: Option<Box<dyn TransportSession>>,
    collaborators: Collaborators,
    completions: mpsc::UnboundedSender<Completion>,
    open_generation: u64,
    send_timeout: Duration,
    view: watch::Sender<ChatView>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!("session: driver started");
        loop {
            let deadline = self.core.next_deadline();
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => break,
                        Some(command) => self.on_command(command).await,
                    }
                }
                Some(completion) = completions.recv() => self.on_completion(completion).await,
                inbound = recv_inbound(self.session.as_mut()) => self.on_inbound(inbound).await,
                () = sleep_until(deadline) => self.dispatch(CoreEvent::Tick).await,
            }
            self.publish();
        }

        self.dispatch(CoreEvent::Disconnect).await;
        self.publish();
        info!("session: driver stopped");
    }

    async fn on_command(&mut self, command: Command) {
        let event = match command {
            Command::Connect(channel) => CoreEvent::Connect { channel },
            Command::Disconnect => CoreEvent::Disconnect,
            Command::Send { body, reply_parent, reply } => {
                let result = self.send(&body, reply_parent).await;
                self.publish();
                let _ = reply.send(result);
                return;
            }
            Command::SetPaused(paused) => CoreEvent::SetPaused(paused),
            Command::Resume => CoreEvent::Resume,
            Command::Scroll { distance_from_tail, programmatic } => {
                CoreEvent::Scroll { distance_from_tail, programmatic }
            }
            Command::ReportHeight { id, index, extent } => CoreEvent::ReportHeight { id, index, extent },
            Command::Shutdown => return,
        };
        self.dispatch(event).await;
    }

    async fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Opened { generation, result } => {
                if generation != self.open_generation {
                    if let Ok(mut stale) = result {
                        debug!(generation, "session: discarding stale transport");
                        stale.close().await;
                    }
                    return;
                }
                match result {
                    Ok(session) => {
                        self.session = Some(session);
                        self.dispatch(CoreEvent::TransportOpened).await;
                    }
                    Err(err) => {
                        warn!(error = %err, code = err.error_code(), "session: transport open failed");
                        self.dispatch(CoreEvent::ConnectFailed { reason: err.to_string() }).await;
                    }
                }
            }
            Completion::History { channel, result } => {
                self.dispatch(CoreEvent::HistoryLoaded { channel, result }).await;
            }
            Completion::Probe { channel, result } => {
                self.dispatch(CoreEvent::ProbeCompleted { channel, result }).await;
            }
        }
    }

    async fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Text(raw) => self.dispatch(CoreEvent::Payload { raw }).await,
            Inbound::Closed { abnormal, reason } => {
                info!(abnormal, %reason, "session: transport closed");
                self.session = None;
                self.dispatch(CoreEvent::TransportClosed { abnormal, reason }).await;
            }
        }
    }

    async fn send(&mut self, body: &str, reply_parent: Option<String>) -> Result<String, SendError> {
        let outgoing = self.core.send(body, reply_parent, now())?;
        self.publish();

        let written = match self.session.as_mut() {
            Some(session) => match tokio::time::timeout(self.send_timeout, session.send(&outgoing.line)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(SendError::Rejected(err.to_string())),
                Err(_) => Err(SendError::Timeout),
            },
            None => Err(SendError::NotConnected),
        };

        match written {
            Ok(()) => Ok(outgoing.local_id),
            Err(err) => {
                debug!(code = err.error_code(), retryable = err.retryable(), "session: send failed");
                self.dispatch(CoreEvent::SendFailed { local_id: outgoing.local_id, reason: err.to_string() })
                    .await;
                Err(err)
            }
        }
    }

    async fn dispatch(&mut self, event: CoreEvent) {
        let effects = self.core.handle(event, now());
        for effect in effects {
            self.execute(effect).await;
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport { channel, attempt, timeout } => self.spawn_open(channel, attempt, timeout),
            Effect::CloseTransport => self.close_session().await,
            Effect::FetchHistory { channel } => {
                let history = Arc::clone(&self.collaborators.history);
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let result = history.recent(&channel).await.map_err(|err| {
                        debug!(%channel, code = err.error_code(), retryable = err.retryable(), "session: history fetch failed");
                        err.to_string()
                    });
                    let _ = completions.send(Completion::History { channel, result });
                });
            }
            Effect::ProbeSource { channel } => {
                let probe = Arc::clone(&self.collaborators.probe);
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let result = probe.status(&channel).await.map_err(|err| {
                        warn!(%channel, error = %err, code = err.error_code(), "session: liveness probe failed");
                        err.to_string()
                    });
                    let _ = completions.send(Completion::Probe { channel, result });
                });
            }
            Effect::Transmit { line } => {
                if let Some(session) = self.session.as_mut() {
                    if let Err(err) = session.send(&line).await {
                        warn!(error = %err, code = err.error_code(), "session: control write failed");
                    }
                }
            }
            Effect::ScrollToTail => debug!("session: consumer asked to scroll to tail"),
            Effect::SourceEnded { channel } => info!(%channel, "session: upstream source ended"),
        }
    }

    fn spawn_open(&mut self, channel: String, attempt: u32, timeout: Duration) {
        self.open_generation += 1;
        let generation = self.open_generation;
        let transport = Arc::clone(&self.collaborators.transport);
        let completions = self.completions.clone();
        debug!(%channel, attempt, generation, "session: opening transport");
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.open(&channel)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };
            let _ = completions.send(Completion::Opened { generation, result });
        });
    }

    async fn close_session(&mut self) {
        self.open_generation += 1;
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    fn publish(&self) {
        let view = self.core.view();
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}

async fn recv_inbound(session: Option<&mut Box<dyn TransportSession>>) -> Inbound {
    match session {
        Some(session) => session.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
