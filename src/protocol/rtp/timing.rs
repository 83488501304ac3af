use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// NTP timestamp (64-bit, seconds since 1900-01-01)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtpTimestamp {
    /// Seconds since NTP epoch
    pub seconds: u32,
    /// Fractional seconds (1/2^32 of a second)
    pub fraction: u32,
}

impl NtpTimestamp {
    /// NTP epoch offset from Unix epoch (70 years in seconds)
    const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

    /// Create from current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a wall-clock time
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_system_time(time: SystemTime) -> Self {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();

        let ntp_secs = duration.as_secs() + Self::NTP_UNIX_OFFSET;
        let fraction = (u64::from(duration.subsec_nanos()) << 32) / 1_000_000_000;

        Self {
            seconds: ntp_secs as u32,
            fraction: fraction as u32,
        }
    }

    /// Encode to 8 bytes
    #[must_use]
    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.seconds.to_be_bytes());
        buf[4..8].copy_from_slice(&self.fraction.to_be_bytes());
        buf
    }

    /// Split a 64-bit NTP value
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_u64(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Full 64-bit representation
    #[must_use]
    pub fn to_u64(self) -> u64 {
        (u64::from(self.seconds) << 32) | u64::from(self.fraction)
    }

    /// Middle 32 bits, as carried in the LSR field of a report block
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn middle_32(self) -> u32 {
        (self.to_u64() >> 16) as u32
    }
}

/// Express a delay in units of 1/65536 seconds (the DLSR field)
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_dlsr_units(delay: Duration) -> u32 {
    (delay.as_secs_f64() * 65536.0).min(f64::from(u32::MAX)) as u32
}
