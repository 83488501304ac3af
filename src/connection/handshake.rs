//! Control-channel collaborator
//!
//! The control protocol that negotiates the stream lives outside this
//! crate. It reports progress as [`HandshakeEvent`]s.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Outcome notifications from the setup exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Device accepted our credentials; audio output may be requested
    AuthSucceeded,
    /// Device will stream to this local address
    SetupComplete(SocketAddr),
    /// Device rejected authentication
    AuthFailed(String),
}

/// Control channel to the streaming device
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Ask whether the device supports private listening
    async fn query_capability(&self, device: SocketAddr) -> Result<bool>;

    /// Open the control channel; progress is reported on `events`
    async fn start(&self, device: SocketAddr, events: mpsc::Sender<HandshakeEvent>) -> Result<()>;

    /// Ask the device to stream audio to `output`
    async fn set_audio_output(&self, output: SocketAddr) -> Result<()>;

    /// Close the control channel
    async fn disconnect(&self) -> Result<()>;
}
