//! Test doubles for the external collaborators
//!
//! [`MockControlChannel`] scripts the handshake, [`RecordingDecoder`]
//! stands in for the decoder process, and [`rtp_datagram`] builds data
//! packets.

mod mock_control;
mod recording_decoder;


pub use mock_control::{ControlCall, MockControlChannel, MockOutcome};
pub use recording_decoder::RecordingDecoder;

use crate::protocol::rtp::{RtpHeader, RtpPacket};

/// Build an RTP datagram with no CSRCs
#[must_use]
pub fn rtp_datagram(
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    payload: &[u8],
) -> Vec<u8> {
    RtpPacket::new(
        RtpHeader::new(payload_type, sequence, timestamp, ssrc),
        payload.to_vec(),
    )
    .encode()
}
