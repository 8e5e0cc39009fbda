//! Per-connection bridge between a websocket client and the datastore.
//!
//! A [`Bridge`] is created for each websocket connection. Opening it spawns a
//! [`PollLoop`] whose changes are pushed into the connection's outbound
//! channel; inbound client messages are written through to the datastore.
//! Closing it stops the loop and joins the spawned task, aborting it if the
//! in-flight long-poll does not return within the grace period.

use avb_bridge_protocol::{
    decode_update, decode_update_bytes, ErrorKind, ResourcePath, ServerMessage,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::context::ConnectionId;
use crate::error::BridgeError;
use crate::poller::PollLoop;
use crate::upstream::Upstream;

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long [`Bridge::close`] waits for the poll task before aborting it.
    pub shutdown_grace: Duration,
    /// Relay failed updates to the client as error messages.
    pub report_update_failures: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(2),
            report_update_failures: false,
        }
    }
}

/// Connection lifecycle as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Created, not yet bound to a connection target.
    Idle,
    /// Polling and relaying.
    Open,
    /// Stop requested, waiting for the poll task.
    Closing,
    /// Poll task gone.
    Closed,
}

/// How the poll task ended when the bridge closed.
#[derive(Debug)]
pub enum Shutdown {
    /// The task observed the stop flag and returned.
    Joined(Result<(), BridgeError>),
    /// The task was still inside a long-poll and was aborted.
    Aborted,
    /// No task was running.
    NoTask,
}

/// Relays one websocket connection to one datastore resource.
pub struct Bridge {
    upstream: Arc<dyn Upstream>,
    config: BridgeConfig,
    connection: ConnectionId,
    state: BridgeState,
    poller: Option<PollLoop>,
    outbound: Option<mpsc::UnboundedSender<ServerMessage>>,
    task: Option<JoinHandle<Result<(), BridgeError>>>,
    span: Span,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("connection", &self.connection)
            .field("state", &self.state)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Create an idle bridge with a fresh connection ID.
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>, config: BridgeConfig) -> Self {
        Self::with_connection_id(upstream, config, ConnectionId::generate())
    }

    /// Create an idle bridge for a known connection.
    #[must_use]
    pub fn with_connection_id(
        upstream: Arc<dyn Upstream>,
        config: BridgeConfig,
        connection: ConnectionId,
    ) -> Self {
        let span = info_span!("connection", connection = %connection, path = field::Empty);
        Self {
            upstream,
            config,
            connection,
            state: BridgeState::Idle,
            poller: None,
            outbound: None,
            task: None,
            span,
        }
    }

    /// The connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// The poll loop, once open.
    #[must_use]
    pub fn poller(&self) -> Option<&PollLoop> {
        self.poller.as_ref()
    }

    /// The bridged resource path, once open.
    #[must_use]
    pub fn path(&self) -> Option<&ResourcePath> {
        self.poller.as_ref().map(PollLoop::path)
    }

    /// The tracing span carrying this connection's identity.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Bind the bridge to a connection target such as `/datastore/mixer/1`
    /// and start polling in a background task.
    ///
    /// Every change is pushed to `outbound` as [`ServerMessage::Update`].
    /// Returns as soon as the task is spawned.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge was already opened or the target is not
    /// a datastore path.
    pub fn open(
        &mut self,
        target: &str,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<(), BridgeError> {
        if self.state != BridgeState::Idle {
            return Err(BridgeError::AlreadyStarted);
        }

        let path = ResourcePath::from_target(target)?;
        self.span.record("path", field::display(&path));
        let _enter = self.span.enter();

        info!("Client connected - creating a datastore loop");

        let poller = PollLoop::new(self.upstream.clone(), path, None);
        let task = tokio::spawn(
            {
                let poller = poller.clone();
                let sink = outbound.clone();
                async move {
                    poller
                        .start(move |payload| {
                            sink.send(ServerMessage::Update(payload))
                                .map_err(|_| BridgeError::SinkClosed)
                        })
                        .await
                }
            }
            .instrument(self.span.clone()),
        );

        self.poller = Some(poller);
        self.outbound = Some(outbound);
        self.task = Some(task);
        self.state = BridgeState::Open;

        Ok(())
    }

    /// Forward a text message from the client to the datastore.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedMessage`] if the text is not JSON, or
    /// the update's failure.
    pub async fn on_message(&self, text: &str) -> Result<(), BridgeError> {
        let update = decode_update(text).map_err(BridgeError::MalformedMessage)?;
        self.forward(update).await
    }

    /// Forward a binary message holding UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Same as [`on_message`](Self::on_message).
    pub async fn on_binary(&self, data: &[u8]) -> Result<(), BridgeError> {
        let update = decode_update_bytes(data).map_err(BridgeError::MalformedMessage)?;
        self.forward(update).await
    }

    async fn forward(&self, update: Value) -> Result<(), BridgeError> {
        let poller = match (&self.poller, self.state) {
            (Some(poller), BridgeState::Open) => poller,
            _ => return Err(BridgeError::NotOpen),
        };

        async {
            info!(update = %update, "Client sent a message");
            let result = poller.send(&update).await;
            if let Err(e) = &result {
                self.report(e);
            }
            result
        }
        .instrument(self.span.clone())
        .await
    }

    fn report(&self, e: &BridgeError) {
        if !self.config.report_update_failures {
            return;
        }

        let message = match e {
            BridgeError::UpdateRejected { status } => {
                ServerMessage::error(ErrorKind::UpdateRejected, e.to_string(), Some(*status))
            }
            BridgeError::Transport(_) => {
                ServerMessage::error(ErrorKind::UpdateFailed, e.to_string(), None)
            }
            _ => return,
        };

        if let Some(outbound) = &self.outbound {
            if outbound.send(message).is_err() {
                debug!("Outbound channel closed, dropping error report");
            }
        }
    }

    /// Wait for the poll task to end on its own.
    ///
    /// Resolves with the task's result when the loop fails or is stopped;
    /// stays pending if there is no task. Cancel safe.
    pub async fn finished(&mut self) -> Result<(), BridgeError> {
        let Some(handle) = self.task.as_mut() else {
            return std::future::pending().await;
        };

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(BridgeError::TaskFailed(e.to_string())),
        };
        self.task = None;
        result
    }

    /// Stop polling and join the poll task.
    ///
    /// Waits at most the configured grace period for the in-flight long-poll
    /// to return, then aborts the task.
    pub async fn close(&mut self) -> Shutdown {
        if self.state == BridgeState::Closed {
            return Shutdown::NoTask;
        }

        self.state = BridgeState::Closing;
        self.span
            .in_scope(|| info!("Client disconnected - stopping the datastore loop"));

        if let Some(poller) = &self.poller {
            poller.stop();
        }
        self.outbound = None;

        let outcome = match self.task.take() {
            None => Shutdown::NoTask,
            Some(mut handle) => {
                match tokio::time::timeout(self.config.shutdown_grace, &mut handle).await {
                    Ok(Ok(result)) => Shutdown::Joined(result),
                    Ok(Err(e)) => {
                        self.span
                            .in_scope(|| error!(error = %e, "Poll task failed"));
                        Shutdown::Joined(Err(BridgeError::TaskFailed(e.to_string())))
                    }
                    Err(_) => {
                        self.span.in_scope(|| {
                            warn!(
                                grace_ms = self.config.shutdown_grace.as_millis() as u64,
                                "Poll task still waiting on datastore, aborting"
                            )
                        });
                        handle.abort();
                        Shutdown::Aborted
                    }
                }
            }
        };

        self.state = BridgeState::Closed;
        outcome
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(poller) = &self.poller {
            poller.stop();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
