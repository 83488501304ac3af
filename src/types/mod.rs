//! Core types module

mod config;
mod diagnostics;

#[cfg(test)]
mod tests;

pub use config::{BandwidthMode, DecoderCommand, SessionConfig, SessionConfigBuilder, defaults};
pub use diagnostics::Diagnostics;
