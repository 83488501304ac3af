//! RTP data packets and NTP timestamps

mod packet;
mod timing;


pub use packet::{RtpDecodeError, RtpHeader, RtpPacket};
pub use timing::{NtpTimestamp, to_dlsr_units};
