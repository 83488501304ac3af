use std::time::Duration;

use tokio::time::Instant;

use super::{seeded, test_config};
use crate::protocol::rtcp::{CompoundPacket, RtcpPacket, SdesChunk, SenderInfo};
use crate::protocol::rtp::{NtpTimestamp, RtpHeader};
use crate::session::{Session, SharedSession, TRANSPORT_OVERHEAD, TimerAction};
use crate::types::{BandwidthMode, SessionConfig};

fn session() -> Session {
    Session::initialize(&test_config(), seeded(7), Instant::now())
}

fn data_header(ssrc: u32) -> RtpHeader {
    RtpHeader::new(97, 1, 0, ssrc)
}

#[test]
fn test_initialize_reserves_report_bandwidth() {
    for bandwidth in [1.0, 10_000.0, 64_000.0] {
        let config = SessionConfig::builder().bandwidth(bandwidth).build();
        let session = Session::initialize(&config, seeded(1), Instant::now());
        assert!((session.state.rtcp_bw - 0.05 * bandwidth).abs() < 1e-9);
        assert_eq!(session.sources.count(), 1);
        assert!(session.sources.contains(session.ssrc()));
    }
}

#[test]
fn test_initialize_schedules_first_report() {
    let now = Instant::now();
    let session = Session::initialize(&test_config(), seeded(2), now);

    assert!(session.state.initial);
    assert!(!session.state.we_sent);
    assert_eq!(session.state.pmembers, 1);
    assert!(session.ssrc() <= 0x7FFF_FFFF);
    assert!((session.state.deterministic_interval - 2.5).abs() < 1e-9);
    let first = session.state.tn - now;
    assert!(first >= Duration::from_secs_f64(1.25) && first <= Duration::from_secs_f64(3.75));
}

#[test]
fn test_initialize_is_deterministic_for_seed() {
    let a = Session::initialize(&test_config(), seeded(99), Instant::now());
    let b = Session::initialize(&test_config(), seeded(99), Instant::now());
    assert_eq!(a.ssrc(), b.ssrc());
    assert!((a.state.randomized_interval - b.state.randomized_interval).abs() < 1e-12);
}

#[test]
fn test_calculate_interval_scenario() {
    let mut session = session();
    assert!((session.state.rtcp_bw - 500.0).abs() < 1e-9);

    session.state.avg_rtcp_size = 80.0;
    for _ in 0..100 {
        session.calculate_interval();
        assert!((session.state.deterministic_interval - 2.5).abs() < 1e-9);
        assert!(session.state.randomized_interval >= 1.25);
        assert!(session.state.randomized_interval <= 3.75);
    }
}

#[test]
fn test_fresh_bandwidth_does_not_shrink() {
    let mut session = session();
    for ssrc in 1..=4 {
        session.sources.get_or_create(ssrc);
    }
    session.sources.get_or_create(1).is_active_sender = true;

    for _ in 0..5 {
        session.calculate_interval();
    }
    assert!((session.state.rtcp_bw - 500.0).abs() < 1e-9);
}

#[test]
fn test_cumulative_bandwidth_shrinks_each_call() {
    let config = SessionConfig::builder()
        .bandwidth(10_000.0)
        .bandwidth_mode(BandwidthMode::Cumulative)
        .build();
    let mut session = Session::initialize(&config, seeded(3), Instant::now());
    for ssrc in 1..=4 {
        session.sources.get_or_create(ssrc);
    }
    session.sources.get_or_create(1).is_active_sender = true;

    // 5 members, 1 remote sender: receivers take 0.75 per call
    session.calculate_interval();
    assert!((session.state.rtcp_bw - 375.0).abs() < 1e-9);
    session.calculate_interval();
    assert!((session.state.rtcp_bw - 281.25).abs() < 1e-9);
}

#[test]
fn test_first_packet_adds_active_sender() {
    let mut session = session();
    assert_eq!(session.sources.count(), 1);
    assert_eq!(session.sources.count_active_senders(), 0);

    assert!(session.record_received(&data_header(0xABCD), Instant::now()));
    assert_eq!(session.sources.count(), 2);
    assert_eq!(session.sources.count_active_senders(), 1);

    assert!(!session.record_received(&data_header(0xABCD), Instant::now()));
    assert_eq!(session.sources.count(), 2);
}

#[test]
fn test_reset_membership_keeps_self() {
    let mut session = session();
    for ssrc in 1..=50 {
        session.sources.get_or_create(ssrc);
    }
    let own = session.ssrc();

    assert_eq!(session.reset_membership(), 1);
    assert_eq!(session.sources.count(), 1);
    assert!(session.sources.contains(own));
    assert_eq!(session.state.pmembers, 1);
}

#[test]
fn test_record_sent_updates_counters() {
    let mut session = session();
    session.record_sent(100, Instant::now());
    session.record_sent(50, Instant::now());

    assert_eq!(session.state.packet_count, 2);
    assert_eq!(session.state.octet_count, 150);
    assert!(session.state.we_sent);
    assert!(session.sources.get(session.ssrc()).unwrap().is_active_sender);
}

#[test]
fn test_receiver_report_lists_remote_senders() {
    let mut session = session();
    let now = Instant::now();
    session.record_received(&data_header(0xABCD), now);
    session.sources.get_or_create(0x1111);

    let report = session.build_report(now);
    assert_eq!(report.packets.len(), 2);
    match &report.packets[0] {
        RtcpPacket::ReceiverReport { ssrc, reports } => {
            assert_eq!(*ssrc, session.ssrc());
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].ssrc, 0xABCD);
        }
        other => panic!("expected RR, got {other:?}"),
    }
    match &report.packets[1] {
        RtcpPacket::SourceDescription { chunks } => {
            assert_eq!(chunks[0].cname.as_deref(), Some("tester@localhost"));
        }
        other => panic!("expected SDES, got {other:?}"),
    }
}

#[test]
fn test_sender_report_after_sending() {
    let mut session = session();
    let now = Instant::now();
    session.record_sent(160, now);

    let report = session.build_report(now);
    match &report.packets[0] {
        RtcpPacket::SenderReport {
            sender_info,
            reports,
            ..
        } => {
            assert_eq!(sender_info.packet_count, 1);
            assert_eq!(sender_info.octet_count, 160);
            assert!(reports.is_empty());
        }
        other => panic!("expected SR, got {other:?}"),
    }
}

#[test]
fn test_report_blocks_capped() {
    let mut session = session();
    let now = Instant::now();
    for ssrc in 1..=40 {
        session.record_received(&data_header(ssrc), now);
    }

    let report = session.build_report(now);
    match &report.packets[0] {
        RtcpPacket::ReceiverReport { reports, .. } => assert_eq!(reports.len(), 31),
        other => panic!("expected RR, got {other:?}"),
    }
}

#[test]
fn test_timer_sends_when_due() {
    let mut session = session();
    let start = session.state.time_of_last_rtcp_sent;
    let later = start + Duration::from_secs(60);

    match session.on_timer(later) {
        TimerAction::Send(report) => {
            let size = report.encode().len();
            session.report_sent(size, later);
        }
        other => panic!("expected send, got {other:?}"),
    }

    assert!(!session.state.initial);
    assert_eq!(session.state.time_of_last_rtcp_sent, later);
    assert!((session.state.deterministic_interval - 5.0).abs() < 1e-9);
    assert!(session.state.tn > later);
}

#[test]
fn test_timer_reconsiders_when_early() {
    let mut session = session();
    let start = session.state.time_of_last_rtcp_sent;

    // Membership grew a lot since scheduling
    for ssrc in 1..=200 {
        session.sources.get_or_create(ssrc);
    }
    let early = start + Duration::from_secs(3);

    match session.on_timer(early) {
        TimerAction::Reschedule(at) => {
            assert!(at > early);
            assert_eq!(session.state.tn, at);
        }
        other => panic!("expected reschedule, got {other:?}"),
    }
}

#[test]
fn test_report_size_average() {
    let mut session = session();
    let before = session.state.avg_rtcp_size;
    let now = Instant::now();
    session.report_sent(100, now);

    #[allow(clippy::cast_precision_loss)]
    let expected = (100 + TRANSPORT_OVERHEAD) as f64 / 16.0 + before * 15.0 / 16.0;
    assert!((session.state.avg_rtcp_size - expected).abs() < 1e-9);
}

#[test]
fn test_we_sent_clears_without_recent_data() {
    let mut session = session();
    let start = Instant::now();
    session.record_sent(100, start);

    session.report_sent(100, start + Duration::from_secs(1));
    assert!(session.state.we_sent);

    session.report_sent(100, start + Duration::from_secs(600));
    assert!(!session.state.we_sent);
    assert!(!session.sources.get(session.ssrc()).unwrap().is_active_sender);
}

#[test]
fn test_silent_members_expire() {
    let mut session = session();
    let start = Instant::now();
    session.record_received(&data_header(0xABCD), start);
    session.sources.get_or_create(0x1111);

    let expired = session.expire_members(start + Duration::from_secs(600));
    assert_eq!(expired.len(), 2);
    assert_eq!(session.sources.count(), 1);
    assert!(session.sources.contains(session.ssrc()));
}

#[test]
fn test_silent_sender_becomes_receiver() {
    let mut session = session();
    let start = Instant::now();
    session.record_received(&data_header(0xABCD), start);
    let now = start + Duration::from_secs(10);
    session.sources.get_or_create(0xABCD).last_seen = now;

    let expired = session.expire_members(now);
    assert!(expired.is_empty());
    assert!(!session.sources.get(0xABCD).unwrap().is_active_sender);
    assert_eq!(session.sources.count(), 2);
}

#[test]
fn test_inbound_reports_update_members() {
    let mut session = session();
    let now = Instant::now();
    let compound = CompoundPacket::new(vec![
        RtcpPacket::SenderReport {
            ssrc: 0x2222,
            sender_info: SenderInfo {
                ntp_timestamp: NtpTimestamp {
                    seconds: 0x0001_2345,
                    fraction: 0x6789_0000,
                },
                ..SenderInfo::default()
            },
            reports: Vec::new(),
        },
        RtcpPacket::SourceDescription {
            chunks: vec![SdesChunk {
                ssrc: 0x2222,
                cname: Some("device@tv".to_string()),
            }],
        },
    ]);

    let removed = session.on_rtcp(&compound, 60, now);
    assert!(removed.is_empty());

    let source = session.sources.get(0x2222).unwrap();
    assert!(source.is_active_sender);
    assert_eq!(source.cname.as_deref(), Some("device@tv"));
    assert_eq!(
        source.stats.clone().report_block(0x2222, now).last_sr,
        0x2345_6789
    );
}

#[test]
fn test_inbound_reports_about_self_ignored() {
    let mut session = session();
    let own = session.ssrc();
    let compound = CompoundPacket::new(vec![
        RtcpPacket::ReceiverReport {
            ssrc: own,
            reports: Vec::new(),
        },
        RtcpPacket::Goodbye {
            sources: vec![own],
            reason: None,
        },
    ]);

    let removed = session.on_rtcp(&compound, 16, Instant::now());
    assert!(removed.is_empty());
    assert_eq!(session.sources.count(), 1);
    assert!(session.sources.contains(own));
}

#[test]
fn test_goodbye_pulls_next_report_closer() {
    let mut session = session();
    let now = Instant::now();
    for ssrc in 1..=3 {
        session.sources.get_or_create(ssrc);
    }
    session.state.pmembers = 4;
    session.state.time_of_last_rtcp_sent = now;
    session.state.tn = now + Duration::from_secs(10);

    let bye = CompoundPacket::new(vec![
        RtcpPacket::ReceiverReport {
            ssrc: 3,
            reports: Vec::new(),
        },
        RtcpPacket::Goodbye {
            sources: vec![3],
            reason: Some("leaving".to_string()),
        },
    ]);
    let removed = session.on_rtcp(&bye, 40, now);

    assert_eq!(removed, vec![3]);
    assert_eq!(session.sources.count(), 3);
    assert_eq!(session.state.pmembers, 3);
    assert_eq!(session.state.tn, now + Duration::from_millis(7500));
}

#[test]
fn test_bye_requested_leaves() {
    let mut session = session();
    session.state.bye_requested = true;

    match session.on_timer(Instant::now()) {
        TimerAction::Leave(bye) => {
            assert!(matches!(bye.packets[0], RtcpPacket::ReceiverReport { .. }));
            let own = session.ssrc();
            assert!(bye.packets.iter().any(|p| matches!(
                p,
                RtcpPacket::Goodbye { sources, .. } if sources == &vec![own]
            )));
        }
        other => panic!("expected leave, got {other:?}"),
    }
}

#[test]
fn test_shared_session_accessors() {
    let shared = SharedSession::new(session());
    let own = shared.local_ssrc();

    shared.add_source(5);
    assert_eq!(shared.member_count(), 2);
    assert!(!shared.remove_source(own));
    assert!(shared.remove_source(5));
    assert!(!shared.remove_source(5));
    assert_eq!(shared.member_count(), 1);

    shared.record_sent(10);
    assert_eq!(shared.active_sender_count(), 1);
    assert_eq!(shared.state().packet_count, 1);

    shared.request_bye();
    assert!(shared.state().bye_requested);
    assert_eq!(shared.snapshot().len(), 1);
}
