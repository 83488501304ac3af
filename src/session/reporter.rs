//! Report loop
//!
//! Sleeps until the scheduled report time, reconsiders the interval, sends
//! the compound report and processes reports arriving on the same socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;

use super::receiver::is_transient_udp_error;
use super::state::{SharedSession, TimerAction};
use crate::protocol::rtcp::CompoundPacket;
use crate::types::Diagnostics;

/// Maximum inbound report size
const MAX_PACKET_SIZE: usize = 1500;

/// RTCP report loop bound to one report socket
pub struct ReportLoop {
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
    session: Arc<SharedSession>,
    diagnostics: Diagnostics,
}

impl ReportLoop {
    /// Create a loop sending reports to `destination`
    #[must_use]
    pub fn new(
        socket: Arc<UdpSocket>,
        destination: SocketAddr,
        session: Arc<SharedSession>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            socket,
            destination,
            session,
            diagnostics,
        }
    }

    /// Run until `shutdown` flips to true, then send a BYE
    ///
    /// # Errors
    /// Returns `std::io::Error` if the report socket fails on receive.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            let deadline = self.session.lock().state.tn;

            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    if !self.on_expire().await {
                        break;
                    }
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => self.on_inbound(&buf[..len], src),
                        Err(e) if is_transient_udp_error(&e) => {
                            tracing::debug!("Transient report socket error: {}", e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.session.request_bye();
                        self.on_expire().await;
                        break;
                    }
                }
            }
        }

        tracing::debug!("Report loop stopped");
        Ok(())
    }

    /// Handle timer expiry; returns false once the BYE went out
    async fn on_expire(&self) -> bool {
        let now = Instant::now();
        let action = self.session.lock().on_timer(now);

        match action {
            TimerAction::Reschedule(at) => {
                if self.diagnostics.is_verbose() {
                    tracing::debug!(
                        "Report reconsidered, next in {:?}",
                        at.saturating_duration_since(now)
                    );
                }
                true
            }
            TimerAction::Send(report) => {
                let bytes = report.encode();
                if let Err(e) = self.socket.send_to(&bytes, self.destination).await {
                    tracing::warn!("Failed to send report to {}: {}", self.destination, e);
                }

                let mut session = self.session.lock();
                session.report_sent(bytes.len(), Instant::now());
                if self.diagnostics.is_verbose() {
                    tracing::debug!(
                        "Sent {} byte report: members={} senders={} T={:.3}s Td={:.3}s",
                        bytes.len(),
                        session.sources.count(),
                        session.sources.count_active_senders(),
                        session.state.randomized_interval,
                        session.state.deterministic_interval
                    );
                }
                true
            }
            TimerAction::Leave(bye) => {
                let bytes = bye.encode();
                match self.socket.send_to(&bytes, self.destination).await {
                    Ok(_) => tracing::debug!("Sent BYE to {}", self.destination),
                    Err(e) => tracing::warn!("Failed to send BYE to {}: {}", self.destination, e),
                }
                false
            }
        }
    }

    fn on_inbound(&self, data: &[u8], src: SocketAddr) {
        let compound = match CompoundPacket::decode(data) {
            Ok(compound) => compound,
            Err(e) => {
                tracing::warn!("Dropping report from {}: {}", src, e);
                return;
            }
        };

        let removed = self
            .session
            .lock()
            .on_rtcp(&compound, data.len(), Instant::now());

        for ssrc in removed {
            tracing::info!("Source {:#010x} left the session", ssrc);
        }
        if self.diagnostics.is_verbose() {
            tracing::debug!(
                "Report from {}: {} packets",
                src,
                compound.packets.len()
            );
        }
    }
}
