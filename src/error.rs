use std::io;
use thiserror::Error;

use crate::decoder::DecoderError;
use crate::protocol::rtcp::RtcpError;
use crate::protocol::rtp::RtpDecodeError;

/// Errors that can occur while negotiating or running a listening session
#[derive(Debug, Error)]
pub enum ListenError {
    // ===== Negotiation Errors =====
    /// Device reported that it cannot stream to a private listener
    #[error("device does not support private listening")]
    CapabilityUnsupported,

    /// Device rejected the control-channel authentication
    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        /// Reason reported by the device
        reason: String,
    },

    /// Handshake collaborator failed or went away mid-exchange
    #[error("handshake failed: {message}")]
    HandshakeFailed {
        /// Description of the failure
        message: String,
    },

    /// Handshake did not complete in time
    #[error("handshake timeout after {duration:?}")]
    HandshakeTimeout {
        /// The duration of the timeout
        duration: std::time::Duration,
    },

    // ===== Addressing Errors =====
    /// A configured host name or address could not be resolved
    #[error("cannot resolve address {host}")]
    AddressResolution {
        /// The host that failed to resolve
        host: String,
        /// The underlying source of the error
        #[source]
        source: Option<io::Error>,
    },

    // ===== Configuration / State Errors =====
    /// Configuration rejected before any I/O
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem
        message: String,
    },

    /// Operation not valid in current lifecycle state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid
        message: String,
        /// The current state
        current_state: String,
    },

    // ===== Resource / Protocol Errors =====
    /// External decoder could not be acquired or released
    #[error("decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// Malformed RTP packet
    #[error("RTP error: {0}")]
    Rtp(#[from] RtpDecodeError),

    /// Malformed RTCP packet
    #[error("RTCP error: {0}")]
    Rtcp(#[from] RtcpError),

    /// Network I/O error
    #[error("network error: {0}")]
    NetworkError(#[from] io::Error),
}

impl ListenError {
    /// Check if retrying `connect` may succeed
    ///
    /// Negotiation failures count: the device may gain the capability or
    /// accept different credentials on the next attempt.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CapabilityUnsupported
                | Self::AuthenticationFailed { .. }
                | Self::HandshakeTimeout { .. }
                | Self::HandshakeFailed { .. }
                | Self::AddressResolution { .. }
                | Self::NetworkError(_)
        )
    }

    /// Check if this error came out of capability/handshake negotiation
    #[must_use]
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(
            self,
            Self::CapabilityUnsupported
                | Self::AuthenticationFailed { .. }
                | Self::HandshakeFailed { .. }
                | Self::HandshakeTimeout { .. }
        )
    }
}

/// Result type alias for listening-session operations
pub type Result<T> = std::result::Result<T, ListenError>;
