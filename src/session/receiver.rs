//! Packet receive loop
//!
//! Reads RTP datagrams on the data socket, records the sender in the
//! membership table and relays each datagram to the decoder input.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;

use super::state::SharedSession;
use crate::protocol::rtp::{RtpDecodeError, RtpPacket};
use crate::types::Diagnostics;

/// Maximum UDP packet size
const MAX_PACKET_SIZE: usize = 2048;

/// Errors from RTP reception
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid RTP packet
    #[error("Invalid RTP packet: {0}")]
    InvalidPacket(#[from] RtpDecodeError),

    /// Wrong payload type
    #[error("Wrong payload type: {0}")]
    WrongPayloadType(u8),

    /// Packet carries our own SSRC (looped back or colliding)
    #[error("Packet carries our own SSRC {0:#010x}")]
    OwnSsrc(u32),
}

/// RTP receive loop bound to one data socket
pub struct PacketReceiver {
    socket: Arc<UdpSocket>,
    session: Arc<SharedSession>,
    relay: Arc<UdpSocket>,
    decoder_input: SocketAddr,
    payload_type: u8,
    diagnostics: Diagnostics,
}

impl PacketReceiver {
    /// Create a receiver relaying through `relay` to `decoder_input`
    #[must_use]
    pub fn new(
        socket: Arc<UdpSocket>,
        session: Arc<SharedSession>,
        relay: Arc<UdpSocket>,
        decoder_input: SocketAddr,
        payload_type: u8,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            socket,
            session,
            relay,
            decoder_input,
            payload_type,
            diagnostics,
        }
    }

    /// Run until `shutdown` flips to true
    ///
    /// # Errors
    /// Returns `ReceiveError::Io` if the data socket fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ReceiveError> {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, _src)) => {
                            if let Err(e) = self.process_packet(&buf[..len]).await {
                                tracing::warn!("Dropping RTP packet: {}", e);
                            }
                        }
                        Err(e) if is_transient_udp_error(&e) => {
                            tracing::debug!("Transient data socket error: {}", e);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Packet receiver stopping");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Process a single datagram
    async fn process_packet(&self, data: &[u8]) -> Result<(), ReceiveError> {
        let packet = RtpPacket::decode(data)?;
        let header = &packet.header;
        if header.payload_type != self.payload_type {
            return Err(ReceiveError::WrongPayloadType(header.payload_type));
        }

        let (is_new, members, senders) = {
            let mut session = self.session.lock();
            if header.ssrc == session.ssrc() {
                return Err(ReceiveError::OwnSsrc(header.ssrc));
            }
            let is_new = session.record_received(header, Instant::now());
            (
                is_new,
                session.sources.count(),
                session.sources.count_active_senders(),
            )
        };

        if is_new {
            tracing::info!(
                "New sender {:#010x} ({} members, {} senders)",
                header.ssrc,
                members,
                senders
            );
        }
        if self.diagnostics.is_verbose() {
            tracing::debug!(
                "RTP ssrc={:#010x} seq={} ts={} len={}",
                header.ssrc,
                header.sequence,
                header.timestamp,
                data.len()
            );
        }

        // Relay failures must not stop reception
        if let Err(e) = self.relay.send_to(data, self.decoder_input).await {
            tracing::warn!("Relay to decoder at {} failed: {}", self.decoder_input, e);
        }

        Ok(())
    }
}

/// Errors a UDP socket may report for an earlier send, not for this receive
pub(crate) fn is_transient_udp_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
    )
}
