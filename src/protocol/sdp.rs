//! Minimal SDP writer for describing the relayed stream to the decoder

use std::fmt::Write;
use std::net::SocketAddr;

/// Builder for SDP session descriptions.
///
/// Lines are emitted in insertion order within each section.
#[derive(Debug, Clone)]
pub struct SdpBuilder {
    session: Vec<String>,
    media: Vec<String>,
}

impl Default for SdpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SdpBuilder {
    /// Create a new builder with `v=0`
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: vec!["v=0".to_string()],
            media: Vec::new(),
        }
    }

    /// Set origin
    #[must_use]
    pub fn origin(mut self, username: &str, session_id: &str, addr: &str) -> Self {
        self.session.push(format!(
            "o={username} {session_id} 1 IN {} {addr}",
            addr_type(addr)
        ));
        self
    }

    /// Set session name
    #[must_use]
    pub fn session_name(mut self, name: &str) -> Self {
        self.session.push(format!("s={name}"));
        self
    }

    /// Set connection info
    #[must_use]
    pub fn connection(mut self, addr: &str) -> Self {
        self.session.push(format!("c=IN {} {addr}", addr_type(addr)));
        self
    }

    /// Set timing (usually 0 0 for live streams)
    #[must_use]
    pub fn timing(mut self, start: u64, stop: u64) -> Self {
        self.session.push(format!("t={start} {stop}"));
        self
    }

    /// Start a media section
    #[must_use]
    pub fn media(mut self, media_type: &str, port: u16, protocol: &str, formats: &[&str]) -> Self {
        self.media.push(format!(
            "m={media_type} {port} {protocol} {}",
            formats.join(" ")
        ));
        self
    }

    /// Add media-level attribute
    #[must_use]
    pub fn media_attribute(mut self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.media.push(format!("a={name}:{v}")),
            None => self.media.push(format!("a={name}")),
        }
        self
    }

    /// Encode as string
    #[must_use]
    pub fn encode(self) -> String {
        let mut output = String::new();
        for line in self.session.iter().chain(self.media.iter()) {
            let _ = write!(output, "{line}\r\n");
        }
        output
    }
}

fn addr_type(addr: &str) -> &'static str {
    if addr.contains(':') { "IP6" } else { "IP4" }
}

/// Describe an Opus-style RTP audio stream arriving at `relay`
#[must_use]
pub fn relay_session_description(
    relay: SocketAddr,
    payload_type: u8,
    clock_rate: u32,
    channels: u8,
) -> String {
    let ip = relay.ip().to_string();
    let pt = payload_type.to_string();
    SdpBuilder::new()
        .origin("-", "0", &ip)
        .session_name("Private Listening")
        .connection(&ip)
        .timing(0, 0)
        .media("audio", relay.port(), "RTP/AVP", &[&pt])
        .media_attribute("rtpmap", Some(&format!("{pt} opus/{clock_rate}/{channels}")))
        .media_attribute("recvonly", None)
        .encode()
}
