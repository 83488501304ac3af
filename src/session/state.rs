//! Session-wide state shared by the receive and report loops

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::RngCore;
use tokio::time::Instant;
use tracing::debug;

use super::interval::{IntervalInput, RTCP_BW_FRACTION, rtcp_interval};
use super::source::{Source, SourceTable};
use crate::protocol::rtcp::{
    CompoundPacket, MAX_REPORT_BLOCKS, RtcpPacket, SdesChunk, SenderInfo,
};
use crate::protocol::rtp::{NtpTimestamp, RtpHeader};
use crate::types::{BandwidthMode, SessionConfig};

/// UDP over IPv4 header bytes counted into report sizes
pub const TRANSPORT_OVERHEAD: usize = 28;

/// A member unseen for this many deterministic intervals is evicted
const MEMBER_TIMEOUT_INTERVALS: f64 = 5.0;
/// A sender silent for this many randomized intervals becomes a receiver
const SENDER_TIMEOUT_INTERVALS: f64 = 2.0;

/// Session-wide counters and timing fields
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Our own synchronization source
    pub ssrc: u32,
    /// Session bandwidth, bytes per second
    pub bandwidth: f64,
    /// Report bandwidth, bytes per second
    pub rtcp_bw: f64,
    /// Data packets we sent
    pub packet_count: u32,
    /// Payload octets we sent
    pub octet_count: u32,
    /// Average compound report size, transport overhead included
    pub avg_rtcp_size: f64,
    /// Average data packet size
    pub avg_pkt_size: f64,
    /// Member count at the last report
    pub pmembers: usize,
    /// We sent data since the second-to-last report
    pub we_sent: bool,
    /// No report sent yet
    pub initial: bool,
    /// Randomized interval `T`, seconds
    pub randomized_interval: f64,
    /// Deterministic interval `Td`, seconds
    pub deterministic_interval: f64,
    /// Next scheduled report
    pub tn: Instant,
    /// Current time as of the last timer expiry
    pub tc: Instant,
    /// When the last report went out (`tp`)
    pub time_of_last_rtcp_sent: Instant,
    /// When we last sent data
    pub time_of_last_rtp_sent: Option<Instant>,
    /// Leave the session at the next opportunity
    pub bye_requested: bool,
}

/// What the report loop should do after its timer fires
#[derive(Debug, Clone, PartialEq)]
pub enum TimerAction {
    /// Send this report now
    Send(CompoundPacket),
    /// Reconsidered: sleep until this instant instead
    Reschedule(Instant),
    /// Send this BYE and stop
    Leave(CompoundPacket),
}

/// Session state and membership, always accessed together
pub struct Session {
    /// Counters and timing
    pub state: SessionState,
    /// Membership table, self included
    pub sources: SourceTable,
    cname: String,
    clock_rate: u32,
    min_time: f64,
    bandwidth_mode: BandwidthMode,
    started: Instant,
    rng: Box<dyn RngCore + Send>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("sources", &self.sources)
            .field("cname", &self.cname)
            .field("bandwidth_mode", &self.bandwidth_mode)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start a session at `now`
    ///
    /// Draws our SSRC from `rng`, inserts self into the table and schedules
    /// the first report.
    #[must_use]
    pub fn initialize(
        config: &SessionConfig,
        mut rng: Box<dyn RngCore + Send>,
        now: Instant,
    ) -> Self {
        let ssrc = rng.next_u32() & 0x7FFF_FFFF;
        let rtcp_bw = config.bandwidth * RTCP_BW_FRACTION;

        let mut sources = SourceTable::new();
        sources.get_or_create(ssrc);

        let mut session = Self {
            state: SessionState {
                ssrc,
                bandwidth: config.bandwidth,
                rtcp_bw,
                packet_count: 0,
                octet_count: 0,
                avg_rtcp_size: 0.0,
                avg_pkt_size: 0.0,
                pmembers: 1,
                we_sent: false,
                initial: true,
                randomized_interval: 0.0,
                deterministic_interval: 0.0,
                tn: now,
                tc: now,
                time_of_last_rtcp_sent: now,
                time_of_last_rtp_sent: None,
                bye_requested: false,
            },
            sources,
            cname: config.cname(),
            clock_rate: config.clock_rate,
            min_time: config.rtcp_min_time.as_secs_f64(),
            bandwidth_mode: config.bandwidth_mode,
            started: now,
            rng,
        };

        // First report estimate: an empty RR plus our SDES
        #[allow(clippy::cast_precision_loss, reason = "packet sizes are small")]
        let first_report_size =
            (session.empty_report().encode().len() + TRANSPORT_OVERHEAD) as f64;
        session.state.avg_rtcp_size = first_report_size;
        session.calculate_interval();
        session.state.tn = now + secs(session.state.randomized_interval);

        debug!(
            "Session {:#010x} initialized, first report in {:.3}s",
            ssrc, session.state.randomized_interval
        );
        session
    }

    /// Our own SSRC
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.state.ssrc
    }

    /// Canonical name sent in SDES
    #[must_use]
    pub fn cname(&self) -> &str {
        &self.cname
    }

    /// Recompute `T` and `Td` from current membership
    pub fn calculate_interval(&mut self) {
        let we_sent = self
            .sources
            .get(self.state.ssrc)
            .is_some_and(|s| s.is_active_sender);
        let input = IntervalInput {
            members: self.sources.count(),
            senders: self.sources.count_active_senders(),
            we_sent,
            initial: self.state.initial,
            avg_rtcp_size: self.state.avg_rtcp_size,
            rtcp_bw: self.state.rtcp_bw,
            min_time: self.min_time,
        };
        let interval = rtcp_interval(&input, &mut self.rng);

        if self.bandwidth_mode == BandwidthMode::Cumulative {
            self.state.rtcp_bw = interval.effective_bw;
        }
        self.state.deterministic_interval = interval.deterministic;
        self.state.randomized_interval = interval.randomized;
    }

    /// Drop every member except self and resynchronize the interval
    pub fn reset_membership(&mut self) -> usize {
        let remaining = self.sources.remove_all_except(self.state.ssrc);
        self.state.pmembers = remaining;
        self.calculate_interval();
        remaining
    }

    /// Record a data packet received at `now`; returns true for a new source
    pub fn record_received(&mut self, header: &RtpHeader, now: Instant) -> bool {
        let is_new = !self.sources.contains(header.ssrc);
        let clock_rate = self.clock_rate;
        self.sources
            .get_or_create(header.ssrc)
            .record_data(header, now, clock_rate);
        is_new
    }

    /// Record a data packet we sent with `payload_len` payload octets
    pub fn record_sent(&mut self, payload_len: usize, now: Instant) {
        self.state.packet_count = self.state.packet_count.wrapping_add(1);
        #[allow(clippy::cast_possible_truncation, reason = "octet count wraps modulo 2^32")]
        let octets = payload_len as u32;
        self.state.octet_count = self.state.octet_count.wrapping_add(octets);
        #[allow(clippy::cast_precision_loss, reason = "packet sizes are small")]
        let size = (payload_len + RtpHeader::SIZE) as f64;
        self.state.avg_pkt_size = if self.state.packet_count == 1 {
            size
        } else {
            size / 16.0 + self.state.avg_pkt_size * 15.0 / 16.0
        };
        self.state.we_sent = true;
        self.state.time_of_last_rtp_sent = Some(now);

        let ssrc = self.state.ssrc;
        let source = self.sources.get_or_create(ssrc);
        source.is_active_sender = true;
        source.last_seen = now;
        source.last_data = Some(now);
    }

    /// Apply an inbound compound report of `size` bytes
    ///
    /// Returns the sources removed by BYE packets. Our own SSRC is never
    /// added or removed by inbound reports.
    pub fn on_rtcp(&mut self, compound: &CompoundPacket, size: usize, now: Instant) -> Vec<u32> {
        let own = self.state.ssrc;
        let mut removed = Vec::new();

        for packet in &compound.packets {
            match packet {
                RtcpPacket::SenderReport {
                    ssrc, sender_info, ..
                } if *ssrc != own => {
                    let source = self.sources.get_or_create(*ssrc);
                    source.last_seen = now;
                    source.last_data = Some(now);
                    source.is_active_sender = true;
                    source
                        .stats
                        .record_sender_report(sender_info.ntp_timestamp.middle_32(), now);
                }
                RtcpPacket::ReceiverReport { ssrc, .. } if *ssrc != own => {
                    self.sources.get_or_create(*ssrc).last_seen = now;
                }
                RtcpPacket::SourceDescription { chunks } => {
                    for chunk in chunks.iter().filter(|c| c.ssrc != own) {
                        let source = self.sources.get_or_create(chunk.ssrc);
                        source.last_seen = now;
                        if chunk.cname.is_some() {
                            source.cname.clone_from(&chunk.cname);
                        }
                    }
                }
                RtcpPacket::Goodbye { sources, .. } => {
                    for &ssrc in sources.iter().filter(|&&s| s != own) {
                        if self.sources.remove(ssrc).is_some() {
                            removed.push(ssrc);
                        }
                    }
                }
                _ => {}
            }
        }

        #[allow(clippy::cast_precision_loss, reason = "packet sizes are small")]
        let size = (size + TRANSPORT_OVERHEAD) as f64;
        self.state.avg_rtcp_size = size / 16.0 + self.state.avg_rtcp_size * 15.0 / 16.0;

        if !removed.is_empty() {
            self.reverse_reconsider(now);
        }
        removed
    }

    /// Pull the next report closer after members leave (RFC 3550 6.3.4)
    fn reverse_reconsider(&mut self, now: Instant) {
        let members = self.sources.count();
        if members >= self.state.pmembers {
            return;
        }
        #[allow(clippy::cast_precision_loss, reason = "member counts are small")]
        let ratio = members as f64 / self.state.pmembers as f64;
        let until_next = self.state.tn.saturating_duration_since(now);
        let since_last = now.saturating_duration_since(self.state.time_of_last_rtcp_sent);
        self.state.tn = now + until_next.mul_f64(ratio);
        self.state.time_of_last_rtcp_sent = now
            .checked_sub(since_last.mul_f64(ratio))
            .unwrap_or(self.state.time_of_last_rtcp_sent);
        self.state.pmembers = members;
    }

    /// Age out silent members and senders, returning the evicted SSRCs
    pub fn expire_members(&mut self, now: Instant) -> Vec<u32> {
        let own = self.state.ssrc;
        let sender_timeout = secs(self.state.randomized_interval * SENDER_TIMEOUT_INTERVALS);
        let member_timeout = secs(self.state.deterministic_interval * MEMBER_TIMEOUT_INTERVALS);

        for source in self.sources.iter_mut().filter(|s| s.ssrc != own) {
            let silent = source
                .last_data
                .is_none_or(|at| now.saturating_duration_since(at) > sender_timeout);
            if source.is_active_sender && silent {
                debug!("Source {:#010x} stopped sending", source.ssrc);
                source.is_active_sender = false;
            }
        }

        let mut expired = Vec::new();
        self.sources.retain(|&ssrc, source| {
            let keep =
                ssrc == own || now.saturating_duration_since(source.last_seen) <= member_timeout;
            if !keep {
                expired.push(ssrc);
            }
            keep
        });
        for ssrc in &expired {
            debug!("Source {:#010x} timed out", ssrc);
        }
        expired
    }

    /// Handle report timer expiry at `now` with reconsideration
    pub fn on_timer(&mut self, now: Instant) -> TimerAction {
        self.state.tc = now;
        if self.state.bye_requested {
            return TimerAction::Leave(self.build_bye(now));
        }

        self.expire_members(now);
        self.calculate_interval();

        let candidate = self.state.time_of_last_rtcp_sent + secs(self.state.randomized_interval);
        if candidate <= now {
            TimerAction::Send(self.build_report(now))
        } else {
            self.state.tn = candidate;
            TimerAction::Reschedule(candidate)
        }
    }

    /// Account for a report of `size` bytes sent at `now` and schedule the next
    pub fn report_sent(&mut self, size: usize, now: Instant) {
        #[allow(clippy::cast_precision_loss, reason = "packet sizes are small")]
        let size = (size + TRANSPORT_OVERHEAD) as f64;
        self.state.avg_rtcp_size = size / 16.0 + self.state.avg_rtcp_size * 15.0 / 16.0;
        self.state.time_of_last_rtcp_sent = now;
        self.state.tc = now;
        self.state.pmembers = self.sources.count();
        self.state.initial = false;

        // we_sent covers the last two report intervals
        let window = secs(self.state.randomized_interval * 2.0);
        let sent_recently = self
            .state
            .time_of_last_rtp_sent
            .is_some_and(|at| now.saturating_duration_since(at) <= window);
        if self.state.we_sent && !sent_recently {
            self.state.we_sent = false;
            if let Some(me) = self.sources.get_mut(self.state.ssrc) {
                me.is_active_sender = false;
            }
        }

        self.calculate_interval();
        self.state.tn = now + secs(self.state.randomized_interval);
    }

    /// Build a regular compound report: SR or RR, then SDES
    pub fn build_report(&mut self, now: Instant) -> CompoundPacket {
        let own = self.state.ssrc;
        let mut senders: Vec<&mut Source> = self
            .sources
            .iter_mut()
            .filter(|s| s.ssrc != own && s.is_active_sender)
            .collect();
        senders.sort_by_key(|s| s.ssrc);
        let reports = senders
            .into_iter()
            .take(MAX_REPORT_BLOCKS)
            .map(|s| s.stats.report_block(s.ssrc, now))
            .collect();

        let first = if self.state.we_sent {
            let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                reason = "RTP timestamps wrap modulo 2^32"
            )]
            let rtp_timestamp = (elapsed * f64::from(self.clock_rate)) as u64 as u32;
            RtcpPacket::SenderReport {
                ssrc: own,
                sender_info: SenderInfo {
                    ntp_timestamp: NtpTimestamp::now(),
                    rtp_timestamp,
                    packet_count: self.state.packet_count,
                    octet_count: self.state.octet_count,
                },
                reports,
            }
        } else {
            RtcpPacket::ReceiverReport { ssrc: own, reports }
        };

        CompoundPacket::new(vec![first, self.sdes()])
    }

    /// Build the leave report: empty RR, SDES, BYE
    pub fn build_bye(&mut self, now: Instant) -> CompoundPacket {
        self.state.tc = now;
        let mut compound = self.empty_report();
        compound.packets.push(RtcpPacket::Goodbye {
            sources: vec![self.state.ssrc],
            reason: None,
        });
        compound
    }

    fn empty_report(&self) -> CompoundPacket {
        CompoundPacket::new(vec![
            RtcpPacket::ReceiverReport {
                ssrc: self.state.ssrc,
                reports: Vec::new(),
            },
            self.sdes(),
        ])
    }

    fn sdes(&self) -> RtcpPacket {
        RtcpPacket::SourceDescription {
            chunks: vec![SdesChunk {
                ssrc: self.state.ssrc,
                cname: Some(self.cname.clone()),
            }],
        }
    }
}

/// Longest interval ever scheduled
const MAX_INTERVAL_SECS: f64 = 86_400.0;

fn secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.min(MAX_INTERVAL_SECS)).unwrap_or(Duration::ZERO)
}

/// Session shared between the loops and the lifecycle owner
///
/// Every read and write goes through one mutex. Callers must not hold the
/// guard across an `.await`.
#[derive(Debug)]
pub struct SharedSession {
    inner: Mutex<Session>,
}

impl SharedSession {
    /// Wrap a session for sharing
    #[must_use]
    pub fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(session),
        })
    }

    /// Acquire the session lock
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Our own SSRC
    #[must_use]
    pub fn local_ssrc(&self) -> u32 {
        self.lock().ssrc()
    }

    /// Total members, self included
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.lock().sources.count()
    }

    /// Members flagged as active senders
    #[must_use]
    pub fn active_sender_count(&self) -> usize {
        self.lock().sources.count_active_senders()
    }

    /// Point-in-time copy of the membership table
    #[must_use]
    pub fn snapshot(&self) -> Vec<Source> {
        self.lock().sources.snapshot_all()
    }

    /// Copy of the counters and timing fields
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Add a member explicitly
    pub fn add_source(&self, ssrc: u32) {
        self.lock().sources.get_or_create(ssrc);
    }

    /// Remove a member; our own entry is kept
    pub fn remove_source(&self, ssrc: u32) -> bool {
        let mut session = self.lock();
        ssrc != session.ssrc() && session.sources.remove(ssrc).is_some()
    }

    /// Drop every member except self
    pub fn reset_membership(&self) -> usize {
        self.lock().reset_membership()
    }

    /// Record a data packet we sent
    pub fn record_sent(&self, payload_len: usize) {
        self.lock().record_sent(payload_len, Instant::now());
    }

    /// Ask the report loop to leave at its next wake-up
    pub fn request_bye(&self) {
        self.lock().state.bye_requested = true;
    }
}
