//! Membership table keyed by synchronization source

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::debug;

use crate::protocol::rtcp::ReportBlock;
use crate::protocol::rtp::{RtpHeader, to_dlsr_units};

/// Sequence jump treated as in-order progress
const MAX_DROPOUT: u16 = 3000;
/// Sequence step backwards still treated as reordering
const MAX_MISORDER: u16 = 100;
const SEQ_MOD: u32 = 1 << 16;

/// Per-source reception statistics used to fill report blocks
#[derive(Debug, Clone, Default)]
pub struct ReceptionStats {
    base_seq: u16,
    max_seq: u16,
    /// Sequence number that would confirm a restart after a large jump
    bad_seq: Option<u16>,
    cycles: u32,
    received: u32,
    expected_prior: u32,
    received_prior: u32,
    /// Arrival of the first packet, the origin for transit times
    epoch: Option<Instant>,
    transit: Option<u32>,
    jitter: f64,
    last_sr: u32,
    last_sr_at: Option<Instant>,
}

impl ReceptionStats {
    /// Record an RTP packet that arrived at `arrival`
    pub fn record(&mut self, header: &RtpHeader, arrival: Instant, clock_rate: u32) {
        let seq = header.sequence;
        let Some(epoch) = self.epoch else {
            self.epoch = Some(arrival);
            self.base_seq = seq;
            self.max_seq = seq;
            self.received = 1;
            self.transit = Some(0u32.wrapping_sub(header.timestamp));
            return;
        };

        let delta = seq.wrapping_sub(self.max_seq);
        if delta < MAX_DROPOUT {
            if seq < self.max_seq {
                self.cycles = self.cycles.wrapping_add(SEQ_MOD);
            }
            self.max_seq = seq;
        } else if delta <= u16::MAX - MAX_MISORDER {
            // Large jump: restart only once the next packet follows it
            if self.bad_seq != Some(seq) {
                self.bad_seq = Some(seq.wrapping_add(1));
                return;
            }
            self.base_seq = seq;
            self.max_seq = seq;
            self.cycles = 0;
            self.received = 0;
            self.expected_prior = 0;
            self.received_prior = 0;
        }
        self.bad_seq = None;
        self.received = self.received.wrapping_add(1);

        // Interarrival jitter (RFC 3550 A.8)
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "RTP timestamps wrap modulo 2^32"
        )]
        let arrival_units =
            (arrival.duration_since(epoch).as_secs_f64() * f64::from(clock_rate)) as u64 as u32;
        let transit = arrival_units.wrapping_sub(header.timestamp);
        if let Some(previous) = self.transit {
            #[allow(clippy::cast_possible_wrap, reason = "difference of wrapping counters")]
            let d = f64::from((transit.wrapping_sub(previous) as i32).unsigned_abs());
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.transit = Some(transit);
    }

    /// Record a sender report from this source
    pub fn record_sender_report(&mut self, ntp_middle: u32, arrival: Instant) {
        self.last_sr = ntp_middle;
        self.last_sr_at = Some(arrival);
    }

    /// Highest sequence number received, extended with wrap cycles
    #[must_use]
    pub fn extended_max(&self) -> u32 {
        self.cycles.wrapping_add(u32::from(self.max_seq))
    }

    /// Packets expected since the first one
    #[must_use]
    pub fn expected(&self) -> u32 {
        if self.epoch.is_none() {
            return 0;
        }
        self.extended_max()
            .wrapping_sub(u32::from(self.base_seq))
            .wrapping_add(1)
    }

    /// Packets received
    #[must_use]
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Cumulative packets lost, clamped to the 24-bit signed report range
    #[must_use]
    pub fn cumulative_lost(&self) -> i32 {
        let lost = i64::from(self.expected()) - i64::from(self.received);
        i32::try_from(lost.clamp(-0x80_0000, 0x7F_FFFF)).unwrap_or_default()
    }

    /// Interarrival jitter in timestamp units
    #[must_use]
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Build a report block and advance the interval counters
    pub fn report_block(&mut self, ssrc: u32, now: Instant) -> ReportBlock {
        let expected = self.expected();
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = i64::from(expected_interval) - i64::from(received_interval);
        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            u8::try_from((lost_interval << 8) / i64::from(expected_interval)).unwrap_or(u8::MAX)
        };

        let delay_since_last_sr = self
            .last_sr_at
            .map_or(0, |at| to_dlsr_units(now.duration_since(at)));

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "jitter is non-negative and reported modulo 2^32"
        )]
        let jitter = self.jitter as u32;

        ReportBlock {
            ssrc,
            fraction_lost,
            cumulative_lost: self.cumulative_lost(),
            extended_highest_seq: self.extended_max(),
            jitter,
            last_sr: self.last_sr,
            delay_since_last_sr,
        }
    }
}

/// One session participant
#[derive(Debug, Clone)]
pub struct Source {
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Sent data recently
    pub is_active_sender: bool,
    /// Last time any packet was seen from this source
    pub last_seen: Instant,
    /// Last time a data packet was seen from this source
    pub last_data: Option<Instant>,
    /// Canonical name from SDES, once known
    pub cname: Option<String>,
    /// Reception statistics
    pub stats: ReceptionStats,
}

impl Source {
    /// Create a non-sending source first seen at `now`
    #[must_use]
    pub fn new(ssrc: u32, now: Instant) -> Self {
        Self {
            ssrc,
            is_active_sender: false,
            last_seen: now,
            last_data: None,
            cname: None,
            stats: ReceptionStats::default(),
        }
    }

    /// Record a data packet from this source
    pub fn record_data(&mut self, header: &RtpHeader, now: Instant, clock_rate: u32) {
        self.is_active_sender = true;
        self.last_seen = now;
        self.last_data = Some(now);
        self.stats.record(header, now, clock_rate);
    }
}

/// Membership map keyed by SSRC
#[derive(Debug, Default)]
pub struct SourceTable {
    sources: HashMap<u32, Source>,
}

impl SourceTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `ssrc`, inserting a non-sending one if absent
    pub fn get_or_create(&mut self, ssrc: u32) -> &mut Source {
        let count = self.sources.len();
        self.sources.entry(ssrc).or_insert_with(|| {
            debug!("Adding source {:#010x} ({} members)", ssrc, count + 1);
            Source::new(ssrc, Instant::now())
        })
    }

    /// Look up a source
    #[must_use]
    pub fn get(&self, ssrc: u32) -> Option<&Source> {
        self.sources.get(&ssrc)
    }

    /// Look up a source for update
    pub fn get_mut(&mut self, ssrc: u32) -> Option<&mut Source> {
        self.sources.get_mut(&ssrc)
    }

    /// Check membership
    #[must_use]
    pub fn contains(&self, ssrc: u32) -> bool {
        self.sources.contains_key(&ssrc)
    }

    /// Remove a source; unknown identifiers are ignored
    pub fn remove(&mut self, ssrc: u32) -> Option<Source> {
        let removed = self.sources.remove(&ssrc);
        if removed.is_some() {
            debug!(
                "Removed source {:#010x} ({} members)",
                ssrc,
                self.sources.len()
            );
        } else {
            debug!("Ignoring removal of unknown source {:#010x}", ssrc);
        }
        removed
    }

    /// Total members
    #[must_use]
    pub fn count(&self) -> usize {
        self.sources.len()
    }

    /// Members currently flagged as senders
    #[must_use]
    pub fn count_active_senders(&self) -> usize {
        self.sources.values().filter(|s| s.is_active_sender).count()
    }

    /// Point-in-time copy of every entry, ordered by SSRC
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.sources.values().cloned().collect();
        sources.sort_by_key(|s| s.ssrc);
        sources
    }

    /// Drop every entry except `keep`, returning the remaining count
    pub fn remove_all_except(&mut self, keep: u32) -> usize {
        let before = self.sources.len();
        self.sources.retain(|&ssrc, _| ssrc == keep);
        if before != self.sources.len() {
            debug!(
                "Reset membership: dropped {} sources",
                before - self.sources.len()
            );
        }
        self.sources.len()
    }

    /// Iterate over entries in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    /// Iterate mutably over entries in no particular order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Source> {
        self.sources.values_mut()
    }

    /// Keep only entries matching `keep`
    pub fn retain(&mut self, keep: impl FnMut(&u32, &mut Source) -> bool) {
        self.sources.retain(keep);
    }
}
