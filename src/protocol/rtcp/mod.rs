//! RTCP compound packets (RFC 3550 §6.4-6.6)
//!
//! Only the packet types a listening client sends or reacts to are
//! modelled: sender and receiver reports, SDES CNAME and BYE. Anything
//! else in an inbound compound packet is skipped by its length field.

mod packet;


pub use packet::{
    CompoundPacket, MAX_REPORT_BLOCKS, ReportBlock, RtcpError, RtcpPacket, SdesChunk, SenderInfo,
    packet_type,
};
