use bytes::Bytes;
use thiserror::Error;

/// RTP fixed header (RFC 3550 §5.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Version (2 bits, always 2)
    pub version: u8,
    /// Padding flag
    pub padding: bool,
    /// Extension flag
    pub extension: bool,
    /// CSRC count (4 bits)
    pub csrc_count: u8,
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number (16 bits)
    pub sequence: u16,
    /// Timestamp (32 bits)
    pub timestamp: u32,
    /// Synchronization source ID (32 bits)
    pub ssrc: u32,
}

impl RtpHeader {
    /// Fixed RTP header size
    pub const SIZE: usize = 12;

    /// Create a plain header with no CSRCs or extension
    #[must_use]
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Encode header to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];

        // Byte 0: V(2) | P(1) | X(1) | CC(4)
        buf[0] = (self.version << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc_count & 0x0F);

        // Byte 1: M(1) | PT(7)
        buf[1] = (u8::from(self.marker) << 7) | (self.payload_type & 0x7F);

        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        buf
    }

    /// Decode the fixed header
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if buffer is too small or version is not 2.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        if buf.len() < Self::SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }

        let version = (buf[0] >> 6) & 0x03;
        if version != 2 {
            return Err(RtpDecodeError::InvalidVersion(version));
        }

        Ok(Self {
            version,
            padding: (buf[0] >> 5) & 0x01 != 0,
            extension: (buf[0] >> 4) & 0x01 != 0,
            csrc_count: buf[0] & 0x0F,
            marker: (buf[1] >> 7) & 0x01 != 0,
            payload_type: buf[1] & 0x7F,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// RTP decode errors
#[derive(Debug, Error)]
pub enum RtpDecodeError {
    /// Datagram shorter than the header it announces
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },

    /// Version field is not 2
    #[error("invalid RTP version: {0}")]
    InvalidVersion(u8),

    /// Padding count runs past the payload
    #[error("invalid padding length: {0}")]
    InvalidPadding(u8),
}

/// RTP packet with CSRC list and extension skipped
#[derive(Debug, Clone)]
pub struct RtpPacket {
    /// Packet header
    pub header: RtpHeader,
    /// Contributing sources
    pub csrcs: Vec<u32>,
    /// Payload with padding removed
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a packet with no CSRCs
    #[must_use]
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            csrcs: Vec::new(),
            payload: payload.into(),
        }
    }

    /// Encode packet to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut header = self.header.clone();
        header.csrc_count = u8::try_from(self.csrcs.len().min(15)).unwrap_or(15);
        header.extension = false;
        header.padding = false;

        let mut buf =
            Vec::with_capacity(RtpHeader::SIZE + self.csrcs.len() * 4 + self.payload.len());
        buf.extend_from_slice(&header.encode());
        for csrc in self.csrcs.iter().take(15) {
            buf.extend_from_slice(&csrc.to_be_bytes());
        }
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a full datagram
    ///
    /// # Errors
    ///
    /// Returns `RtpDecodeError` if the header, CSRC list, extension or
    /// padding do not fit the buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpDecodeError> {
        let header = RtpHeader::decode(buf)?;

        let mut offset = RtpHeader::SIZE;
        let csrc_end = offset + usize::from(header.csrc_count) * 4;
        if buf.len() < csrc_end {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: csrc_end,
                have: buf.len(),
            });
        }
        let csrcs = buf[offset..csrc_end]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        offset = csrc_end;

        if header.extension {
            if buf.len() < offset + 4 {
                return Err(RtpDecodeError::BufferTooSmall {
                    needed: offset + 4,
                    have: buf.len(),
                });
            }
            let words = usize::from(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
            offset += 4 + words * 4;
            if buf.len() < offset {
                return Err(RtpDecodeError::BufferTooSmall {
                    needed: offset,
                    have: buf.len(),
                });
            }
        }

        let mut end = buf.len();
        if header.padding {
            let pad = buf[end - 1];
            if pad == 0 || usize::from(pad) > end - offset {
                return Err(RtpDecodeError::InvalidPadding(pad));
            }
            end -= usize::from(pad);
        }

        Ok(Self {
            header,
            csrcs,
            payload: Bytes::copy_from_slice(&buf[offset..end]),
        })
    }
}
