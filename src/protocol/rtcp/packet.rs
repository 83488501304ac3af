use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::protocol::rtp::NtpTimestamp;

/// RTCP packet type numbers
pub mod packet_type {
    /// Sender report
    pub const SENDER_REPORT: u8 = 200;
    /// Receiver report
    pub const RECEIVER_REPORT: u8 = 201;
    /// Source description
    pub const SOURCE_DESCRIPTION: u8 = 202;
    /// Goodbye
    pub const GOODBYE: u8 = 203;
    /// Application defined
    pub const APPLICATION: u8 = 204;
}

/// Report count is a 5-bit field
pub const MAX_REPORT_BLOCKS: usize = 31;

const SDES_END: u8 = 0;
const SDES_CNAME: u8 = 1;

/// RTCP decode errors
#[derive(Debug, Error)]
pub enum RtcpError {
    /// Not enough bytes for the structure being read
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },

    /// Version field is not 2
    #[error("invalid RTCP version: {0}")]
    InvalidVersion(u8),

    /// Compound packet must start with SR or RR
    #[error("compound packet starts with type {0}")]
    NotAReport(u8),

    /// Body of a packet is malformed
    #[error("malformed {kind} packet")]
    Malformed {
        /// Packet kind being parsed
        kind: &'static str,
    },
}

impl From<std::io::Error> for RtcpError {
    fn from(_: std::io::Error) -> Self {
        Self::Malformed { kind: "RTCP" }
    }
}

/// Sender information block of an SR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// Wall-clock time of the report
    pub ntp_timestamp: NtpTimestamp,
    /// Same instant in RTP timestamp units
    pub rtp_timestamp: u32,
    /// Sender's packet count
    pub packet_count: u32,
    /// Sender's payload octet count
    pub octet_count: u32,
}

/// Reception report block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportBlock {
    /// Source this block reports on
    pub ssrc: u32,
    /// Fraction lost since the previous report (fixed point /256)
    pub fraction_lost: u8,
    /// Cumulative packets lost (24-bit signed on the wire)
    pub cumulative_lost: i32,
    /// Extended highest sequence number received
    pub extended_highest_seq: u32,
    /// Interarrival jitter in timestamp units
    pub jitter: u32,
    /// Middle 32 bits of the last SR's NTP timestamp
    pub last_sr: u32,
    /// Delay since last SR in 1/65536 seconds
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    /// Wire size of one block
    pub const SIZE: usize = 24;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        let lost = self.cumulative_lost.clamp(-0x80_0000, 0x7F_FFFF).to_be_bytes();
        buf.push(self.fraction_lost);
        buf.extend_from_slice(&lost[1..4]);
        buf.extend_from_slice(&self.extended_highest_seq.to_be_bytes());
        buf.extend_from_slice(&self.jitter.to_be_bytes());
        buf.extend_from_slice(&self.last_sr.to_be_bytes());
        buf.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self, RtcpError> {
        let ssrc = cursor.read_u32::<BigEndian>()?;
        let fraction_lost = cursor.read_u8()?;
        let cumulative_lost = cursor.read_i24::<BigEndian>()?;
        Ok(Self {
            ssrc,
            fraction_lost,
            cumulative_lost,
            extended_highest_seq: cursor.read_u32::<BigEndian>()?,
            jitter: cursor.read_u32::<BigEndian>()?,
            last_sr: cursor.read_u32::<BigEndian>()?,
            delay_since_last_sr: cursor.read_u32::<BigEndian>()?,
        })
    }
}

/// One SDES chunk; only CNAME is kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    /// Source described by this chunk
    pub ssrc: u32,
    /// Canonical name, if present
    pub cname: Option<String>,
}

/// A single RTCP packet within a compound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    /// SR: sent by active senders
    SenderReport {
        /// Reporter
        ssrc: u32,
        /// Transmission statistics
        sender_info: SenderInfo,
        /// Reception reports
        reports: Vec<ReportBlock>,
    },
    /// RR: sent by receivers
    ReceiverReport {
        /// Reporter
        ssrc: u32,
        /// Reception reports
        reports: Vec<ReportBlock>,
    },
    /// SDES
    SourceDescription {
        /// Described sources
        chunks: Vec<SdesChunk>,
    },
    /// BYE: sources leaving the session
    Goodbye {
        /// Departing sources
        sources: Vec<u32>,
        /// Optional reason for leaving
        reason: Option<String>,
    },
    /// Any other packet type, skipped
    Unknown {
        /// Packet type number
        packet_type: u8,
    },
}

impl RtcpPacket {
    /// Packet type number of this packet
    #[must_use]
    pub fn packet_type(&self) -> u8 {
        match self {
            Self::SenderReport { .. } => packet_type::SENDER_REPORT,
            Self::ReceiverReport { .. } => packet_type::RECEIVER_REPORT,
            Self::SourceDescription { .. } => packet_type::SOURCE_DESCRIPTION,
            Self::Goodbye { .. } => packet_type::GOODBYE,
            Self::Unknown { packet_type } => *packet_type,
        }
    }

    /// Append the encoded packet to `buf`
    ///
    /// Report blocks beyond 31 are dropped, as are SDES chunks and BYE
    /// sources beyond 31.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        let count = match self {
            Self::SenderReport { reports, .. } | Self::ReceiverReport { reports, .. } => {
                reports.len().min(MAX_REPORT_BLOCKS)
            }
            Self::SourceDescription { chunks } => chunks.len().min(MAX_REPORT_BLOCKS),
            Self::Goodbye { sources, .. } => sources.len().min(MAX_REPORT_BLOCKS),
            Self::Unknown { .. } => 0,
        };

        // V=2, P=0, count; length patched below
        buf.push(0x80 | u8::try_from(count).unwrap_or(0));
        buf.push(self.packet_type());
        buf.extend_from_slice(&[0, 0]);

        match self {
            Self::SenderReport {
                ssrc,
                sender_info,
                reports,
            } => {
                buf.extend_from_slice(&ssrc.to_be_bytes());
                buf.extend_from_slice(&sender_info.ntp_timestamp.encode());
                buf.extend_from_slice(&sender_info.rtp_timestamp.to_be_bytes());
                buf.extend_from_slice(&sender_info.packet_count.to_be_bytes());
                buf.extend_from_slice(&sender_info.octet_count.to_be_bytes());
                for block in reports.iter().take(count) {
                    block.encode_into(buf);
                }
            }
            Self::ReceiverReport { ssrc, reports } => {
                buf.extend_from_slice(&ssrc.to_be_bytes());
                for block in reports.iter().take(count) {
                    block.encode_into(buf);
                }
            }
            Self::SourceDescription { chunks } => {
                for chunk in chunks.iter().take(count) {
                    buf.extend_from_slice(&chunk.ssrc.to_be_bytes());
                    if let Some(ref cname) = chunk.cname {
                        let text = &cname.as_bytes()[..cname.len().min(255)];
                        buf.push(SDES_CNAME);
                        buf.push(u8::try_from(text.len()).unwrap_or(u8::MAX));
                        buf.extend_from_slice(text);
                    }
                    // END item, then pad the chunk to a word boundary
                    buf.push(SDES_END);
                    pad_to_word(buf);
                }
            }
            Self::Goodbye { sources, reason } => {
                for ssrc in sources.iter().take(count) {
                    buf.extend_from_slice(&ssrc.to_be_bytes());
                }
                if let Some(reason) = reason {
                    let text = &reason.as_bytes()[..reason.len().min(255)];
                    buf.push(u8::try_from(text.len()).unwrap_or(u8::MAX));
                    buf.extend_from_slice(text);
                    pad_to_word(buf);
                }
            }
            Self::Unknown { .. } => {}
        }

        let words = u16::try_from((buf.len() - start) / 4 - 1).unwrap_or(u16::MAX);
        buf[start + 2..start + 4].copy_from_slice(&words.to_be_bytes());
    }

    /// Decode one packet from the start of `buf`, returning it and its size
    ///
    /// # Errors
    ///
    /// Returns `RtcpError` if the header or body is truncated or malformed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RtcpError> {
        if buf.len() < 4 {
            return Err(RtcpError::BufferTooSmall {
                needed: 4,
                have: buf.len(),
            });
        }

        let version = buf[0] >> 6;
        if version != 2 {
            return Err(RtcpError::InvalidVersion(version));
        }
        let padding = buf[0] & 0x20 != 0;
        let count = usize::from(buf[0] & 0x1F);
        let pt = buf[1];
        let size = (usize::from(u16::from_be_bytes([buf[2], buf[3]])) + 1) * 4;
        if buf.len() < size {
            return Err(RtcpError::BufferTooSmall {
                needed: size,
                have: buf.len(),
            });
        }

        let mut body = &buf[4..size];
        if padding {
            let pad = usize::from(*body.last().ok_or(RtcpError::Malformed { kind: "padded" })?);
            if pad == 0 || pad > body.len() {
                return Err(RtcpError::Malformed { kind: "padded" });
            }
            body = &body[..body.len() - pad];
        }

        let packet = match pt {
            packet_type::SENDER_REPORT => Self::decode_sender_report(body, count)?,
            packet_type::RECEIVER_REPORT => Self::decode_receiver_report(body, count)?,
            packet_type::SOURCE_DESCRIPTION => Self::decode_sdes(body, count)?,
            packet_type::GOODBYE => Self::decode_goodbye(body, count)?,
            other => Self::Unknown { packet_type: other },
        };

        Ok((packet, size))
    }

    fn decode_sender_report(body: &[u8], count: usize) -> Result<Self, RtcpError> {
        if body.len() < 24 + count * ReportBlock::SIZE {
            return Err(RtcpError::Malformed {
                kind: "sender report",
            });
        }
        let mut cursor = Cursor::new(body);
        let ssrc = cursor.read_u32::<BigEndian>()?;
        let sender_info = SenderInfo {
            ntp_timestamp: NtpTimestamp::from_u64(cursor.read_u64::<BigEndian>()?),
            rtp_timestamp: cursor.read_u32::<BigEndian>()?,
            packet_count: cursor.read_u32::<BigEndian>()?,
            octet_count: cursor.read_u32::<BigEndian>()?,
        };
        let reports = (0..count)
            .map(|_| ReportBlock::decode(&mut cursor))
            .collect::<Result<_, _>>()?;

        Ok(Self::SenderReport {
            ssrc,
            sender_info,
            reports,
        })
    }

    fn decode_receiver_report(body: &[u8], count: usize) -> Result<Self, RtcpError> {
        if body.len() < 4 + count * ReportBlock::SIZE {
            return Err(RtcpError::Malformed {
                kind: "receiver report",
            });
        }
        let mut cursor = Cursor::new(body);
        let ssrc = cursor.read_u32::<BigEndian>()?;
        let reports = (0..count)
            .map(|_| ReportBlock::decode(&mut cursor))
            .collect::<Result<_, _>>()?;

        Ok(Self::ReceiverReport { ssrc, reports })
    }

    fn decode_sdes(body: &[u8], count: usize) -> Result<Self, RtcpError> {
        let malformed = || RtcpError::Malformed {
            kind: "source description",
        };
        let mut chunks = Vec::with_capacity(count);
        let mut pos = 0;

        for _ in 0..count {
            let ssrc_bytes = body.get(pos..pos + 4).ok_or_else(malformed)?;
            let ssrc = u32::from_be_bytes([ssrc_bytes[0], ssrc_bytes[1], ssrc_bytes[2], ssrc_bytes[3]]);
            pos += 4;

            let mut cname = None;
            loop {
                let item = *body.get(pos).ok_or_else(malformed)?;
                if item == SDES_END {
                    pos += 1;
                    break;
                }
                let len = usize::from(*body.get(pos + 1).ok_or_else(malformed)?);
                let text = body.get(pos + 2..pos + 2 + len).ok_or_else(malformed)?;
                if item == SDES_CNAME {
                    cname = Some(String::from_utf8_lossy(text).into_owned());
                }
                pos += 2 + len;
            }
            // Chunks end on a word boundary
            pos = pos.div_ceil(4) * 4;

            chunks.push(SdesChunk { ssrc, cname });
        }

        Ok(Self::SourceDescription { chunks })
    }

    fn decode_goodbye(body: &[u8], count: usize) -> Result<Self, RtcpError> {
        if body.len() < count * 4 {
            return Err(RtcpError::Malformed { kind: "goodbye" });
        }
        let mut cursor = Cursor::new(body);
        let sources = (0..count)
            .map(|_| cursor.read_u32::<BigEndian>())
            .collect::<Result<Vec<_>, _>>()?;

        let reason = match cursor.read_u8() {
            Ok(len) => {
                let mut text = vec![0u8; usize::from(len)];
                cursor.read_exact(&mut text)?;
                Some(String::from_utf8_lossy(&text).into_owned())
            }
            Err(_) => None,
        };

        Ok(Self::Goodbye { sources, reason })
    }
}

fn pad_to_word(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

/// Sequence of RTCP packets sent as one datagram
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundPacket {
    /// Packets in wire order
    pub packets: Vec<RtcpPacket>,
}

impl CompoundPacket {
    /// Create from packets in wire order
    #[must_use]
    pub fn new(packets: Vec<RtcpPacket>) -> Self {
        Self { packets }
    }

    /// Encode all packets back to back
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        for packet in &self.packets {
            packet.encode_into(&mut buf);
        }
        buf
    }

    /// Decode a datagram into its packets
    ///
    /// # Errors
    ///
    /// Returns `RtcpError` if any packet is malformed or the first packet
    /// is not a sender or receiver report.
    pub fn decode(buf: &[u8]) -> Result<Self, RtcpError> {
        let mut packets = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let (packet, size) = RtcpPacket::decode(&buf[offset..])?;
            packets.push(packet);
            offset += size;
        }

        match packets.first() {
            Some(RtcpPacket::SenderReport { .. } | RtcpPacket::ReceiverReport { .. }) => {
                Ok(Self { packets })
            }
            Some(other) => Err(RtcpError::NotAReport(other.packet_type())),
            None => Err(RtcpError::BufferTooSmall { needed: 4, have: 0 }),
        }
    }
}
