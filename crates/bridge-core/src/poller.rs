//! Long-poll loop against one datastore resource.
//!
//! A [`PollLoop`] repeatedly issues a conditional GET carrying the last change
//! token it saw. The datastore holds the request open until the resource
//! changes (or its own timeout fires), then answers either `304 Not Modified`
//! or `200` with the current state. Every answer carries a fresh token.
//!
//! The loop is cooperative: [`PollLoop::stop`] is checked only at the top of
//! each iteration, so an in-flight GET always runs to completion.

use avb_bridge_protocol::{datastore_url, ChangeToken, ClientId, ResourcePath};
use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::context::random_client_id;
use crate::error::BridgeError;
use crate::upstream::Upstream;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of a poll loop. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Created, not started.
    Idle,
    /// Polling.
    Running,
    /// Stopped or failed. Never restarts.
    Stopped,
}

struct Inner {
    upstream: Arc<dyn Upstream>,
    path: ResourcePath,
    client: ClientId,
    url: String,
    state: AtomicU8,
    token: watch::Sender<ChangeToken>,
    span: Span,
}

/// Long-polls one datastore resource and hands each change to a sink.
///
/// Cloning yields another handle to the same loop, which is how the owner
/// keeps the ability to [`stop`](Self::stop) and [`send`](Self::send) while
/// [`start`](Self::start) runs in a spawned task.
#[derive(Clone)]
pub struct PollLoop {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("token", &*self.inner.token.borrow())
            .finish_non_exhaustive()
    }
}

impl PollLoop {
    /// Create a poll loop for `path`.
    ///
    /// Without an explicit `client`, a random 32-bit identity is drawn.
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>, path: ResourcePath, client: Option<ClientId>) -> Self {
        let client = client.unwrap_or_else(random_client_id);
        let url = datastore_url(upstream.base_url(), &path, client);
        let (token, _) = watch::channel(ChangeToken::initial());
        let span = info_span!("poller", client = %client, path = %path);

        span.in_scope(|| info!("Initialised poller"));

        Self {
            inner: Arc::new(Inner {
                upstream,
                path,
                client,
                url,
                state: AtomicU8::new(IDLE),
                token,
                span,
            }),
        }
    }

    /// The resource path being tracked.
    #[must_use]
    pub fn path(&self) -> &ResourcePath {
        &self.inner.path
    }

    /// The identity presented to the datastore.
    #[must_use]
    pub fn client(&self) -> ClientId {
        self.inner.client
    }

    /// The datastore address polled and patched by this loop.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PollState {
        match self.inner.state.load(Ordering::SeqCst) {
            IDLE => PollState::Idle,
            RUNNING => PollState::Running,
            _ => PollState::Stopped,
        }
    }

    /// Whether the cycle should continue.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == RUNNING
    }

    /// The last change token received, or the sentinel before the first
    /// response.
    #[must_use]
    pub fn change_token(&self) -> ChangeToken {
        self.inner.token.borrow().clone()
    }

    /// Observe every change-token replacement.
    #[must_use]
    pub fn subscribe_change_token(&self) -> watch::Receiver<ChangeToken> {
        self.inner.token.subscribe()
    }

    /// Stop polling at the next iteration boundary.
    ///
    /// Idempotent. Stopping a loop that was never started prevents it from
    /// ever issuing a request.
    pub fn stop(&self) {
        let previous = self.inner.state.swap(STOPPED, Ordering::SeqCst);
        if previous != STOPPED {
            self.inner
                .span
                .in_scope(|| info!("Disabling loop, which will stop at next iteration"));
        }
    }

    /// Run the poll cycle until stopped, invoking `sink` for every change.
    ///
    /// The sink runs inline, so a slow sink delays the next poll. A sink
    /// error ends the cycle with that error.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop was already started, if a request fails,
    /// if the datastore answers with an unexpected status or body, or if the
    /// sink fails. The loop is stopped in every case.
    pub async fn start<F>(&self, mut sink: F) -> Result<(), BridgeError>
    where
        F: FnMut(Value) -> Result<(), BridgeError> + Send,
    {
        match self.inner.state.compare_exchange(
            IDLE,
            RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STOPPED) => {
                self.inner
                    .span
                    .in_scope(|| debug!("Stopped before first poll"));
                return Ok(());
            }
            Err(_) => return Err(BridgeError::AlreadyStarted),
        }

        let result = self
            .run(&mut sink)
            .instrument(self.inner.span.clone())
            .await;
        self.inner.state.store(STOPPED, Ordering::SeqCst);

        self.inner.span.in_scope(|| match &result {
            Ok(()) => info!("Stopping"),
            Err(e) => error!(error = %e, "Poll loop terminated"),
        });

        result
    }

    async fn run<F>(&self, sink: &mut F) -> Result<(), BridgeError>
    where
        F: FnMut(Value) -> Result<(), BridgeError> + Send,
    {
        while self.is_running() {
            let token = self.change_token();
            debug!(url = %self.inner.url, token = %token, "Reading from datastore");

            let response = self.inner.upstream.poll(&self.inner.url, &token).await?;

            if !response.is_success() && !response.is_not_modified() {
                if let Some(next) = response.change_token {
                    self.inner.token.send_replace(next);
                }
                return Err(BridgeError::UnexpectedStatus {
                    status: response.status,
                });
            }

            let not_modified = response.is_not_modified();
            let next = response
                .change_token
                .ok_or(BridgeError::MissingChangeToken)?;
            self.inner.token.send_replace(next);

            if not_modified {
                debug!("Nothing to update");
                continue;
            }

            let payload: Value = serde_json::from_slice(&response.body)?;
            debug!("Forwarding update");
            sink(payload)?;
        }

        Ok(())
    }

    /// PATCH an update to this loop's resource.
    ///
    /// Independent of the poll cycle: it neither reads nor changes the
    /// change token or the lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UpdateRejected`] if the datastore answers with
    /// anything but 200, or a transport error if the request fails.
    pub async fn send(&self, update: &Value) -> Result<(), BridgeError> {
        async {
            info!(url = %self.inner.url, "Sending update to datastore");
            let status = self.inner.upstream.update(&self.inner.url, update).await?;
            if status != 200 {
                warn!(status, "Error in update");
                return Err(BridgeError::UpdateRejected { status });
            }
            Ok(())
        }
        .instrument(self.inner.span.clone())
        .await
    }
}
