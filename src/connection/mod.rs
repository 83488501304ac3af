//! Session lifecycle: handshake, startup and teardown

mod handshake;
mod manager;
mod state;

pub use handshake::{ControlChannel, HandshakeEvent};
pub use manager::{ActiveSession, ConnectionListener, SessionManager};
pub use state::{LifecycleState, SessionEvent};

#[cfg(test)]
mod tests;
