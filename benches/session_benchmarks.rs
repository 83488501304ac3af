use criterion::{Criterion, black_box, criterion_group, criterion_main};
use private_listening::SessionConfig;
use private_listening::protocol::rtcp::CompoundPacket;
use private_listening::protocol::rtp::RtpHeader;
use private_listening::session::{IntervalInput, Session, rtcp_interval};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;

fn interval_benchmark(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let input = IntervalInput {
        members: 200,
        senders: 3,
        we_sent: false,
        initial: false,
        avg_rtcp_size: 120.0,
        rtcp_bw: 500.0,
        min_time: 5.0,
    };

    c.bench_function("rtcp_interval_asymmetric", |b| {
        b.iter(|| rtcp_interval(black_box(&input), &mut rng));
    });
}

/// Session that has heard from `senders` remote sources
fn busy_session(senders: u32) -> Session {
    let config = SessionConfig::builder().cname("bench@localhost").build();
    let now = Instant::now();
    let mut session = Session::initialize(&config, Box::new(StdRng::seed_from_u64(1)), now);
    for ssrc in 1..=senders {
        for seq in 0..16u16 {
            session.record_received(&RtpHeader::new(97, seq, u32::from(seq) * 480, ssrc), now);
        }
    }
    session
}

fn report_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let _guard = rt.enter();

    let mut session = busy_session(40);
    let encoded = session.build_report(Instant::now()).encode();

    c.bench_function("build_report_31_blocks", |b| {
        b.iter(|| black_box(session.build_report(Instant::now())));
    });

    c.bench_function("compound_encode", |b| {
        let report = session.build_report(Instant::now());
        b.iter(|| black_box(&report).encode());
    });

    c.bench_function("compound_decode", |b| {
        b.iter(|| CompoundPacket::decode(black_box(&encoded)).unwrap());
    });
}

criterion_group!(benches, interval_benchmark, report_benchmark);
criterion_main!(benches);
