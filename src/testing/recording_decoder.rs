use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::decoder::{DecoderError, DecoderHandle, DecoderSink};

/// Decoder sink that only counts calls
#[derive(Debug, Default)]
pub struct RecordingDecoder {
    fail_acquire: bool,
    fail_release: bool,
    acquired: AtomicUsize,
    released: AtomicUsize,
    inputs: Mutex<Vec<SocketAddr>>,
}

impl RecordingDecoder {
    /// Sink where every call succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose `acquire` always fails
    #[must_use]
    pub fn failing_acquire() -> Self {
        Self {
            fail_acquire: true,
            ..Self::default()
        }
    }

    /// Sink whose `release` always fails
    #[must_use]
    pub fn failing_release() -> Self {
        Self {
            fail_release: true,
            ..Self::default()
        }
    }

    /// Number of `acquire` calls
    #[must_use]
    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Number of `release` calls
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Inputs passed to `acquire`
    #[must_use]
    pub fn inputs(&self) -> Vec<SocketAddr> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DecoderSink for RecordingDecoder {
    async fn acquire(&self, input: SocketAddr) -> Result<DecoderHandle, DecoderError> {
        let id = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input);

        if self.fail_acquire {
            return Err(DecoderError::Spawn {
                program: "recording".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "decoder disabled"),
            });
        }
        Ok(DecoderHandle::new(id as u64, input))
    }

    async fn release(&self, _handle: DecoderHandle) -> Result<(), DecoderError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(DecoderError::Release(io::Error::other("decoder stuck")));
        }
        Ok(())
    }
}
