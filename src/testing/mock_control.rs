use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::connection::{ControlChannel, HandshakeEvent};
use crate::error::Result;

/// How the mock device answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Capability supported, authentication and setup succeed
    Accept,
    /// Capability query answers "unsupported"
    Unsupported,
    /// Authentication is rejected with this reason
    RejectAuth(String),
    /// Channel opens but no event ever arrives
    Silent,
    /// Channel closes right after opening
    CloseChannel,
}

/// A call received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    /// `query_capability`
    QueryCapability(SocketAddr),
    /// `start`
    Start(SocketAddr),
    /// `set_audio_output`
    SetAudioOutput(SocketAddr),
    /// `disconnect`
    Disconnect,
}

/// Scripted control channel that records every call
#[derive(Debug)]
pub struct MockControlChannel {
    outcome: MockOutcome,
    stream_address: Option<SocketAddr>,
    events: Mutex<Option<mpsc::Sender<HandshakeEvent>>>,
    calls: Mutex<Vec<ControlCall>>,
}

impl MockControlChannel {
    /// Create a mock with the given behaviour
    #[must_use]
    pub fn new(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            stream_address: None,
            events: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Mock that accepts everything
    #[must_use]
    pub fn accepting() -> Self {
        Self::new(MockOutcome::Accept)
    }

    /// Announce `addr` in `SetupComplete` instead of the requested output
    #[must_use]
    pub fn with_stream_address(mut self, addr: SocketAddr) -> Self {
        self.stream_address = Some(addr);
        self
    }

    /// Calls received so far
    #[must_use]
    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `disconnect` calls
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == ControlCall::Disconnect)
            .count()
    }

    fn record(&self, call: ControlCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn events(&self) -> Option<mpsc::Sender<HandshakeEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    async fn query_capability(&self, device: SocketAddr) -> Result<bool> {
        self.record(ControlCall::QueryCapability(device));
        Ok(self.outcome != MockOutcome::Unsupported)
    }

    async fn start(&self, device: SocketAddr, events: mpsc::Sender<HandshakeEvent>) -> Result<()> {
        self.record(ControlCall::Start(device));

        let first = match &self.outcome {
            MockOutcome::Accept => Some(HandshakeEvent::AuthSucceeded),
            MockOutcome::RejectAuth(reason) => Some(HandshakeEvent::AuthFailed(reason.clone())),
            MockOutcome::CloseChannel => return Ok(()),
            MockOutcome::Silent | MockOutcome::Unsupported => None,
        };
        if let Some(event) = first {
            let _ = events.send(event).await;
        }
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
        Ok(())
    }

    async fn set_audio_output(&self, output: SocketAddr) -> Result<()> {
        self.record(ControlCall::SetAudioOutput(output));

        if let Some(events) = self.events() {
            let stream = self.stream_address.unwrap_or(output);
            let _ = events.send(HandshakeEvent::SetupComplete(stream)).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(ControlCall::Disconnect);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
