use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ListenError, Result};

/// Default ports and stream parameters used by private listening devices
pub mod defaults {
    use std::time::Duration;

    /// External control protocol (capability query / handshake) port
    pub const CONTROL_PORT: u16 = 8060;
    /// RTP audio data port
    pub const DATA_PORT: u16 = 6970;
    /// RTCP report port
    pub const REPORT_PORT: u16 = 5150;
    /// Loopback port the decoder listens on for relayed packets
    pub const DECODER_PORT: u16 = 6980;
    /// Dynamic payload type carried by the audio stream
    pub const PAYLOAD_TYPE: u8 = 97;
    /// RTP clock rate of the audio stream
    pub const CLOCK_RATE: u32 = 48_000;
    /// Channel count of the audio stream
    pub const CHANNELS: u8 = 2;
    /// Session bandwidth in bytes per second
    pub const BANDWIDTH: f64 = 10_000.0;
    /// Minimum average time between reports
    pub const RTCP_MIN_TIME: Duration = Duration::from_secs(5);
}

/// How the report bandwidth share is derived on each interval computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BandwidthMode {
    /// Scale the base report bandwidth fresh on every computation
    #[default]
    Fresh,
    /// Scale the stored report bandwidth in place; repeated asymmetric
    /// computations keep shrinking it. Only useful for behavioural parity
    /// with older receivers.
    Cumulative,
}

/// External decoder process invocation.
///
/// `{sdp}` in an argument is replaced with the path of the generated
/// session description, `{input}` with the relay address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderCommand {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
}

impl Default for DecoderCommand {
    fn default() -> Self {
        Self {
            program: "ffplay".to_string(),
            args: [
                "-nodisp",
                "-loglevel",
                "warning",
                "-protocol_whitelist",
                "file,udp,rtp",
                "-i",
                "{sdp}",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Configuration for a listening session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port of the device's control endpoint (default: 8060)
    pub control_port: u16,

    /// Local port receiving RTP audio (default: 6970)
    pub data_port: u16,

    /// Device port RTCP reports are sent to (default: 5150)
    pub report_port: u16,

    /// Local port RTCP reports are sent from and received on (default: 5150)
    pub local_report_port: u16,

    /// Loopback port the decoder reads relayed packets from (default: 6980)
    pub decoder_port: u16,

    /// Expected RTP payload type (default: 97)
    pub payload_type: u8,

    /// RTP clock rate in Hz (default: 48000)
    pub clock_rate: u32,

    /// Audio channel count (default: 2)
    pub channels: u8,

    /// Session bandwidth in bytes per second (default: 10000)
    pub bandwidth: f64,

    /// Minimum average report interval (default: 5 seconds)
    pub rtcp_min_time: Duration,

    /// Report bandwidth derivation (default: fresh per computation)
    pub bandwidth_mode: BandwidthMode,

    /// Timeout for the whole handshake exchange (default: 10 seconds)
    pub handshake_timeout: Duration,

    /// Time allowed for each loop to stop before it is aborted (default: 2 seconds)
    pub stop_timeout: Duration,

    /// Canonical name sent in SDES (None = `user@hostname`)
    pub cname: Option<String>,

    /// Decoder process invocation
    pub decoder: DecoderCommand,

    /// Directory for generated session descriptions (None = system temp dir)
    pub sdp_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_port: defaults::CONTROL_PORT,
            data_port: defaults::DATA_PORT,
            report_port: defaults::REPORT_PORT,
            local_report_port: defaults::REPORT_PORT,
            decoder_port: defaults::DECODER_PORT,
            payload_type: defaults::PAYLOAD_TYPE,
            clock_rate: defaults::CLOCK_RATE,
            channels: defaults::CHANNELS,
            bandwidth: defaults::BANDWIDTH,
            rtcp_min_time: defaults::RTCP_MIN_TIME,
            bandwidth_mode: BandwidthMode::Fresh,
            handshake_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(2),
            cname: None,
            decoder: DecoderCommand::default(),
            sdp_dir: None,
        }
    }
}

impl SessionConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Check the configuration before any socket is bound
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if bandwidth or minimum interval are not
    /// positive, the payload type does not fit in 7 bits, or two of the
    /// control/data/report/decoder ports collide. Port 0 (ephemeral) never
    /// collides.
    pub fn validate(&self) -> Result<()> {
        if !(self.bandwidth.is_finite() && self.bandwidth > 0.0) {
            return Err(invalid(format!(
                "bandwidth must be positive, got {}",
                self.bandwidth
            )));
        }
        if self.rtcp_min_time.is_zero() {
            return Err(invalid("rtcp_min_time must be non-zero".to_string()));
        }
        if self.payload_type > 127 {
            return Err(invalid(format!(
                "payload type {} does not fit in 7 bits",
                self.payload_type
            )));
        }
        if self.clock_rate == 0 {
            return Err(invalid("clock_rate must be non-zero".to_string()));
        }

        // Ports on the device side
        check_distinct(&[
            ("control_port", self.control_port),
            ("data_port", self.data_port),
            ("report_port", self.report_port),
            ("decoder_port", self.decoder_port),
        ])?;
        // Ports bound locally
        check_distinct(&[
            ("data_port", self.data_port),
            ("local_report_port", self.local_report_port),
            ("decoder_port", self.decoder_port),
        ])?;

        Ok(())
    }

    /// Canonical name used in SDES items
    #[must_use]
    pub fn cname(&self) -> String {
        if let Some(ref cname) = self.cname {
            return cname.clone();
        }
        let user = std::env::var("USER").unwrap_or_else(|_| "listener".to_string());
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        format!("{user}@{host}")
    }
}

fn check_distinct(ports: &[(&str, u16)]) -> Result<()> {
    for (i, (name_a, a)) in ports.iter().enumerate() {
        for (name_b, b) in &ports[i + 1..] {
            if *a != 0 && a == b {
                return Err(invalid(format!("{name_a} and {name_b} are both {a}")));
            }
        }
    }
    Ok(())
}

fn invalid(message: String) -> ListenError {
    ListenError::InvalidConfig { message }
}

/// Builder for `SessionConfig`
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the device control port
    #[must_use]
    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    /// Set the RTP data port
    #[must_use]
    pub fn data_port(mut self, port: u16) -> Self {
        self.config.data_port = port;
        self
    }

    /// Set the RTCP report port
    #[must_use]
    pub fn report_port(mut self, port: u16) -> Self {
        self.config.report_port = port;
        self
    }

    /// Set the local RTCP port
    #[must_use]
    pub fn local_report_port(mut self, port: u16) -> Self {
        self.config.local_report_port = port;
        self
    }

    /// Set the decoder relay port
    #[must_use]
    pub fn decoder_port(mut self, port: u16) -> Self {
        self.config.decoder_port = port;
        self
    }

    /// Set the expected payload type
    #[must_use]
    pub fn payload_type(mut self, payload_type: u8) -> Self {
        self.config.payload_type = payload_type;
        self
    }

    /// Set the RTP clock rate
    #[must_use]
    pub fn clock_rate(mut self, clock_rate: u32) -> Self {
        self.config.clock_rate = clock_rate;
        self
    }

    /// Set the session bandwidth in bytes per second
    #[must_use]
    pub fn bandwidth(mut self, bandwidth: f64) -> Self {
        self.config.bandwidth = bandwidth;
        self
    }

    /// Set the minimum report interval
    #[must_use]
    pub fn rtcp_min_time(mut self, min_time: Duration) -> Self {
        self.config.rtcp_min_time = min_time;
        self
    }

    /// Set how report bandwidth is derived
    #[must_use]
    pub fn bandwidth_mode(mut self, mode: BandwidthMode) -> Self {
        self.config.bandwidth_mode = mode;
        self
    }

    /// Set handshake timeout
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set loop stop timeout
    #[must_use]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    /// Set the SDES canonical name
    #[must_use]
    pub fn cname(mut self, cname: impl Into<String>) -> Self {
        self.config.cname = Some(cname.into());
        self
    }

    /// Set the decoder invocation
    #[must_use]
    pub fn decoder(mut self, decoder: DecoderCommand) -> Self {
        self.config.decoder = decoder;
        self
    }

    /// Set the directory for generated session descriptions
    #[must_use]
    pub fn sdp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sdp_dir = Some(dir.into());
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
