//! Scripted upstream for driving poll loops in tests.

use async_trait::async_trait;
use avb_bridge_protocol::ChangeToken;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use crate::error::BridgeError;
use crate::upstream::{PollResponse, Upstream};

/// One scripted answer to a poll.
pub(crate) enum Step {
    /// Answer immediately.
    Respond(PollResponse),
    /// Answer once `release` is called.
    Gated(PollResponse),
    /// Fail with a transport error.
    Fail(&'static str),
}

/// A poll as seen by the upstream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PollRequest {
    pub url: String,
    pub token: ChangeToken,
}

/// Answers polls from a script, then holds every further poll open forever.
pub(crate) struct ScriptedUpstream {
    base_url: String,
    script: Mutex<VecDeque<Step>>,
    polls: mpsc::UnboundedSender<PollRequest>,
    updates: Mutex<Vec<(String, Value)>>,
    update_status: AtomicU16,
    release: Notify,
}

impl ScriptedUpstream {
    pub fn new(
        base_url: &str,
        script: Vec<Step>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PollRequest>) {
        let (polls, rx) = mpsc::unbounded_channel();
        let upstream = Arc::new(Self {
            base_url: base_url.to_string(),
            script: Mutex::new(script.into()),
            polls,
            updates: Mutex::new(Vec::new()),
            update_status: AtomicU16::new(200),
            release: Notify::new(),
        });
        (upstream, rx)
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn set_update_status(&self, status: u16) {
        self.update_status.store(status, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<(String, Value)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn poll(&self, url: &str, token: &ChangeToken) -> Result<PollResponse, BridgeError> {
        let _ = self.polls.send(PollRequest {
            url: url.to_string(),
            token: token.clone(),
        });

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Gated(response)) => {
                self.release.notified().await;
                Ok(response)
            }
            Some(Step::Fail(reason)) => Err(BridgeError::Transport(reason.to_string())),
            None => std::future::pending().await,
        }
    }

    async fn update(&self, url: &str, update: &Value) -> Result<u16, BridgeError> {
        self.updates
            .lock()
            .unwrap()
            .push((url.to_string(), update.clone()));
        Ok(self.update_status.load(Ordering::SeqCst))
    }
}
