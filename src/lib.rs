//! # private-listening
//!
//! Client side of a private listening audio session: negotiate a stream
//! with a device over an external control channel, receive its RTP audio,
//! relay it to a local decoder and take part in the RTCP session while the
//! stream runs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use private_listening::decoder::ProcessDecoder;
//! use private_listening::testing::MockControlChannel;
//! use private_listening::{SessionConfig, SessionManager};
//!
//! # async fn example() -> Result<(), private_listening::ListenError> {
//! let config = SessionConfig::default();
//! let decoder = Arc::new(ProcessDecoder::new(&config));
//! let control = Arc::new(MockControlChannel::accepting());
//!
//! let manager = SessionManager::new(config, control, decoder);
//! manager.set_debug_mode(true);
//!
//! let session = manager.connect("192.168.1.20").await?;
//! println!("listening as {:#010x}", session.local_ssrc());
//!
//! manager.disconnect(Some(&session)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Lifecycle**: [`SessionManager`] runs the handshake, binds sockets and
//!   starts or stops everything else
//! - **Session engine**: [`session`] holds the membership table, the RTCP
//!   timing rules and the two network loops
//! - **Wire formats**: [`protocol`] encodes and decodes RTP, RTCP and SDP

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

pub mod connection;
pub mod decoder;
pub mod net;
pub mod protocol;
pub mod session;

// Re-exports
pub use connection::{
    ActiveSession, ConnectionListener, ControlChannel, HandshakeEvent, LifecycleState,
    SessionEvent, SessionManager,
};
pub use decoder::{DecoderHandle, DecoderSink, ProcessDecoder};
pub use error::{ListenError, Result};
pub use session::{SharedSession, Source};
pub use types::{BandwidthMode, Diagnostics, SessionConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ActiveSession, ConnectionListener, ControlChannel, DecoderSink, ListenError,
        SessionConfig, SessionManager,
    };
}
