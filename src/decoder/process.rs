use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{DecoderError, DecoderHandle, DecoderSink};
use crate::protocol::sdp::relay_session_description;
use crate::types::{DecoderCommand, SessionConfig};

struct Running {
    child: Child,
    sdp_path: PathBuf,
}

/// Decoder sink that runs an external player program
///
/// Each acquisition writes a session description for the relayed stream
/// and spawns the configured program. Children are killed when the sink is
/// dropped.
pub struct ProcessDecoder {
    command: DecoderCommand,
    payload_type: u8,
    clock_rate: u32,
    channels: u8,
    sdp_dir: PathBuf,
    next_id: AtomicU64,
    running: Mutex<HashMap<u64, Running>>,
}

impl std::fmt::Debug for ProcessDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessDecoder")
            .field("command", &self.command)
            .field("sdp_dir", &self.sdp_dir)
            .finish_non_exhaustive()
    }
}

impl ProcessDecoder {
    /// Create a decoder sink for the stream described by `config`
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            command: config.decoder.clone(),
            payload_type: config.payload_type,
            clock_rate: config.clock_rate,
            channels: config.channels,
            sdp_dir: config.sdp_dir.clone().unwrap_or_else(std::env::temp_dir),
            next_id: AtomicU64::new(1),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Number of decoders currently running
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn sdp_path(&self, id: u64) -> PathBuf {
        self.sdp_dir
            .join(format!("private-listening-{}-{}.sdp", std::process::id(), id))
    }
}

/// Substitute `{sdp}` and `{input}` in each argument
pub(crate) fn expand_args(args: &[String], sdp: &Path, input: SocketAddr) -> Vec<String> {
    let sdp = sdp.display().to_string();
    let input = input.to_string();
    args.iter()
        .map(|arg| arg.replace("{sdp}", &sdp).replace("{input}", &input))
        .collect()
}

async fn remove_sdp(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[async_trait]
impl DecoderSink for ProcessDecoder {
    async fn acquire(&self, input: SocketAddr) -> Result<DecoderHandle, DecoderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sdp_path = self.sdp_path(id);

        let description =
            relay_session_description(input, self.payload_type, self.clock_rate, self.channels);
        tokio::fs::write(&sdp_path, description)
            .await
            .map_err(|source| DecoderError::SessionDescription {
                path: sdp_path.clone(),
                source,
            })?;

        let args = expand_args(&self.command.args, &sdp_path, input);
        let spawned = Command::new(&self.command.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                remove_sdp(&sdp_path).await;
                return Err(DecoderError::Spawn {
                    program: self.command.program.clone(),
                    source,
                });
            }
        };

        tracing::info!(
            "Started decoder {} (pid {:?}) reading {}",
            self.command.program,
            child.id(),
            input
        );
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Running { child, sdp_path });

        Ok(DecoderHandle::new(id, input))
    }

    async fn release(&self, handle: DecoderHandle) -> Result<(), DecoderError> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id());
        let Some(Running {
            mut child,
            sdp_path,
        }) = running
        else {
            return Err(DecoderError::UnknownHandle(handle.id()));
        };

        let result = match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("Decoder already exited with {}", status);
                Ok(())
            }
            _ => child.kill().await.map_err(DecoderError::Release),
        };
        remove_sdp(&sdp_path).await;

        if result.is_ok() {
            tracing::info!("Stopped decoder {}", self.command.program);
        }
        result
    }
}
