//! Wire formats used by a listening session

pub mod rtcp;
pub mod rtp;
pub mod sdp;
