//! RTCP transmission interval (RFC 3550 A.7)

use rand::Rng;

/// Minimum average time between reports, in seconds
pub const RTCP_MIN_TIME: f64 = 5.0;
/// Fraction of report bandwidth shared by active senders
pub const SENDER_BW_FRACTION: f64 = 0.25;
/// Fraction of report bandwidth shared by receivers
pub const RCVR_BW_FRACTION: f64 = 1.0 - SENDER_BW_FRACTION;
/// Fraction of session bandwidth reserved for reports
pub const RTCP_BW_FRACTION: f64 = 0.05;

/// Inputs to one interval computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalInput {
    /// Members in the source table, self included
    pub members: usize,
    /// Members flagged as active senders
    pub senders: usize,
    /// Whether our own entry is an active sender
    pub we_sent: bool,
    /// No report sent yet
    pub initial: bool,
    /// Average compound report size in bytes, transport overhead included
    pub avg_rtcp_size: f64,
    /// Report bandwidth in bytes per second
    pub rtcp_bw: f64,
    /// Minimum interval in seconds before halving for the first report
    pub min_time: f64,
}

/// Result of one interval computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    /// Deterministic interval `Td`, seconds
    pub deterministic: f64,
    /// Randomized interval `T`, seconds
    pub randomized: f64,
    /// Report bandwidth after the sender/receiver split
    pub effective_bw: f64,
    /// Member count the bandwidth was divided by
    pub divisor: usize,
}

/// Compute `Td` and `T` for the given membership
///
/// The random multiplier is drawn uniformly from `[0.5, 1.5)`.
#[must_use]
pub fn rtcp_interval<R: Rng + ?Sized>(input: &IntervalInput, rng: &mut R) -> Interval {
    let min_time = if input.initial {
        input.min_time / 2.0
    } else {
        input.min_time
    };

    let mut rtcp_bw = input.rtcp_bw;
    let mut n = input.members;
    #[allow(clippy::cast_precision_loss, reason = "member counts are small")]
    let sender_threshold = input.members as f64 * SENDER_BW_FRACTION;
    #[allow(clippy::cast_precision_loss, reason = "member counts are small")]
    let asymmetric = input.senders > 0 && (input.senders as f64) < sender_threshold;
    if asymmetric {
        if input.we_sent {
            rtcp_bw *= SENDER_BW_FRACTION;
            n = input.senders;
        } else {
            rtcp_bw *= RCVR_BW_FRACTION;
            n = input.members - input.senders;
        }
    }

    #[allow(clippy::cast_precision_loss, reason = "member counts are small")]
    let t = (input.avg_rtcp_size * n as f64 / rtcp_bw).max(min_time);

    Interval {
        deterministic: t,
        randomized: t * (rng.r#gen::<f64>() + 0.5),
        effective_bw: rtcp_bw,
        divisor: n,
    }
}
