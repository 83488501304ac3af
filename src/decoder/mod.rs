//! External decoder sink
//!
//! The receive loop relays every accepted datagram to a loopback input
//! address. A [`DecoderSink`] owns whatever reads from that address.

mod process;


use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use process::ProcessDecoder;

/// Decoder acquisition and release errors
#[derive(Debug, Error)]
pub enum DecoderError {
    /// Session description could not be written
    #[error("failed to write session description {}: {source}", path.display())]
    SessionDescription {
        /// Target path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Decoder program could not be started
    #[error("failed to spawn decoder {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Decoder could not be stopped
    #[error("failed to stop decoder: {0}")]
    Release(#[source] io::Error),

    /// Handle was never issued or already released
    #[error("unknown decoder handle {0}")]
    UnknownHandle(u64),
}

/// A running decoder instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderHandle {
    id: u64,
    input: SocketAddr,
}

impl DecoderHandle {
    /// Create a handle for a decoder reading from `input`
    #[must_use]
    pub fn new(id: u64, input: SocketAddr) -> Self {
        Self { id, input }
    }

    /// Sink-assigned identifier
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address the decoder reads relayed packets from
    #[must_use]
    pub fn input(&self) -> SocketAddr {
        self.input
    }
}

/// Consumer of the relayed audio stream
#[async_trait]
pub trait DecoderSink: Send + Sync {
    /// Start a decoder reading RTP from `input`
    async fn acquire(&self, input: SocketAddr) -> Result<DecoderHandle, DecoderError>;

    /// Stop a decoder started by `acquire`
    async fn release(&self, handle: DecoderHandle) -> Result<(), DecoderError>;
}
