//! Session lifecycle state

use std::net::SocketAddr;

/// Lifecycle of one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// No connection attempted yet
    #[default]
    Idle,
    /// Capability query and setup exchange in progress
    Handshaking,
    /// Session running
    Active,
    /// Session ended or the attempt failed
    Closed,
}

impl LifecycleState {
    /// Check whether moving to `next` is allowed
    #[must_use]
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Closed, Self::Handshaking)
                | (Self::Handshaking, Self::Active | Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }

    /// Check if a connection is in progress or established
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Handshaking | Self::Active)
    }
}

/// Lifecycle events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// State changed
    StateChanged {
        /// The previous state
        old: LifecycleState,
        /// The new state
        new: LifecycleState,
    },
    /// Session established
    Connected {
        /// The device streaming to us
        device: SocketAddr,
        /// Our own SSRC
        ssrc: u32,
    },
    /// Connection attempt failed
    Failed {
        /// The error message
        message: String,
        /// Whether retrying may help
        recoverable: bool,
    },
    /// Session torn down
    Disconnected {
        /// Our SSRC in the ended session
        ssrc: u32,
    },
}
