//! Session state engine
//!
//! One [`SharedSession`] holds the session counters and the membership
//! table behind a single lock. Two loops share it:
//!
//! - [`PacketReceiver`] records data senders and relays packets to the decoder
//! - [`ReportLoop`] schedules, sends and receives RTCP reports
//!
//! Neither loop performs I/O while holding the lock.

pub mod interval;
mod receiver;
mod reporter;
mod source;
mod state;
mod task;

#[cfg(test)]
mod tests;

pub use interval::{Interval, IntervalInput, rtcp_interval};
pub use receiver::{PacketReceiver, ReceiveError};
pub use reporter::ReportLoop;
pub use source::{ReceptionStats, Source, SourceTable};
pub use state::{Session, SessionState, SharedSession, TRANSPORT_OVERHEAD, TimerAction};
pub use task::LoopHandle;
