use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::connection::{
    ActiveSession, ConnectionListener, LifecycleState, SessionEvent, SessionManager,
};
use crate::error::ListenError;
use crate::testing::{
    ControlCall, MockControlChannel, MockOutcome, RecordingDecoder, rtp_datagram,
};
use crate::types::SessionConfig;

#[test]
fn test_lifecycle_transitions() {
    use LifecycleState::{Active, Closed, Handshaking, Idle};

    assert!(Idle.can_transition_to(Handshaking));
    assert!(Handshaking.can_transition_to(Active));
    assert!(Handshaking.can_transition_to(Closed));
    assert!(Active.can_transition_to(Closed));
    assert!(Closed.can_transition_to(Handshaking));

    assert!(!Idle.can_transition_to(Active));
    assert!(!Active.can_transition_to(Handshaking));
    assert!(!Closed.can_transition_to(Active));
    assert!(Handshaking.is_busy());
    assert!(!Closed.is_busy());
}

/// Ports picked by the OS so tests can run in parallel
fn config(decoder_port: u16, report_port: u16) -> SessionConfig {
    SessionConfig::builder()
        .control_port(18_060)
        .data_port(0)
        .local_report_port(0)
        .report_port(report_port)
        .decoder_port(decoder_port)
        .rtcp_min_time(Duration::from_millis(100))
        .handshake_timeout(Duration::from_millis(500))
        .stop_timeout(Duration::from_secs(1))
        .cname("tester@localhost")
        .build()
}

struct Harness {
    manager: SessionManager,
    control: Arc<MockControlChannel>,
    decoder: Arc<RecordingDecoder>,
    decoder_socket: UdpSocket,
    device_socket: UdpSocket,
}

async fn harness(control: MockControlChannel, decoder: RecordingDecoder) -> Harness {
    let decoder_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let device_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let control = Arc::new(control);
    let decoder = Arc::new(decoder);
    let manager = SessionManager::new(
        config(
            decoder_socket.local_addr().unwrap().port(),
            device_socket.local_addr().unwrap().port(),
        ),
        control.clone(),
        decoder.clone(),
    )
    .with_rng_seed(42);

    Harness {
        manager,
        control,
        decoder,
        decoder_socket,
        device_socket,
    }
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let h = harness(MockControlChannel::accepting(), RecordingDecoder::new()).await;
    let mut events = h.manager.subscribe();

    let session = h.manager.connect("127.0.0.1").await.unwrap();
    assert_eq!(h.manager.state().await, LifecycleState::Active);
    assert_eq!(session.session().member_count(), 1);
    assert_eq!(h.decoder.acquire_count(), 1);

    let calls = h.control.calls();
    assert!(matches!(calls[0], ControlCall::QueryCapability(_)));
    assert!(matches!(calls[1], ControlCall::Start(_)));
    assert!(matches!(calls[2], ControlCall::SetAudioOutput(addr) if addr.port() == 0));

    // Data flows to the decoder and registers the sender
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let data_addr = SocketAddr::new([127, 0, 0, 1].into(), session.data_addr().port());
    let packet = rtp_datagram(97, 1, 0, 0xABCD, &[0; 32]);
    sender.send_to(&packet, data_addr).await.unwrap();

    let mut buf = [0u8; 256];
    let (len, _) = timeout(Duration::from_secs(1), h.decoder_socket.recv_from(&mut buf))
        .await
        .expect("relay timeout")
        .unwrap();
    assert_eq!(&buf[..len], &packet[..]);
    assert_eq!(session.session().member_count(), 2);
    assert_eq!(session.session().active_sender_count(), 1);

    session.disconnect().await.unwrap();
    assert!(session.is_closed());
    assert_eq!(h.manager.state().await, LifecycleState::Closed);
    assert_eq!(h.control.disconnect_count(), 1);
    assert_eq!(h.decoder.release_count(), 1);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(e, SessionEvent::Connected { .. })));
    assert!(seen.iter().any(|e| matches!(e, SessionEvent::Disconnected { .. })));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let h = harness(MockControlChannel::accepting(), RecordingDecoder::new()).await;
    let session = h.manager.connect("127.0.0.1").await.unwrap();

    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();
    h.manager.disconnect(Some(&session)).await.unwrap();
    h.manager.disconnect(None).await.unwrap();

    assert_eq!(h.decoder.release_count(), 1);
    assert_eq!(h.control.disconnect_count(), 1);
}

#[tokio::test]
async fn test_disconnect_sends_bye_to_device() {
    let h = harness(MockControlChannel::accepting(), RecordingDecoder::new()).await;
    let session = h.manager.connect("127.0.0.1").await.unwrap();
    let own = session.local_ssrc();
    session.disconnect().await.unwrap();

    let mut buf = [0u8; 1500];
    loop {
        let (len, _) = timeout(Duration::from_secs(2), h.device_socket.recv_from(&mut buf))
            .await
            .expect("no BYE received")
            .unwrap();
        let compound = crate::protocol::rtcp::CompoundPacket::decode(&buf[..len]).unwrap();
        let bye = compound.packets.iter().any(|p| {
            matches!(
                p,
                crate::protocol::rtcp::RtcpPacket::Goodbye { sources, .. } if sources.contains(&own)
            )
        });
        if bye {
            break;
        }
    }
}

#[tokio::test]
async fn test_capability_unsupported() {
    let h = harness(
        MockControlChannel::new(MockOutcome::Unsupported),
        RecordingDecoder::new(),
    )
    .await;
    let mut events = h.manager.subscribe();

    let err = h.manager.connect("127.0.0.1").await.unwrap_err();
    assert!(matches!(err, ListenError::CapabilityUnsupported));
    assert_eq!(h.manager.state().await, LifecycleState::Closed);
    assert_eq!(h.control.calls().len(), 1);
    assert_eq!(h.decoder.acquire_count(), 0);

    // Worth retrying: the device may be reconfigured
    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Failed { recoverable, .. } = event {
            failed = Some(recoverable);
        }
    }
    assert_eq!(failed, Some(true));
}

#[tokio::test]
async fn test_authentication_rejected() {
    let h = harness(
        MockControlChannel::new(MockOutcome::RejectAuth("wrong pin".to_string())),
        RecordingDecoder::new(),
    )
    .await;

    let err = h.manager.connect("127.0.0.1").await.unwrap_err();
    match err {
        ListenError::AuthenticationFailed { reason } => assert_eq!(reason, "wrong pin"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.control.disconnect_count(), 1);
    assert_eq!(h.decoder.acquire_count(), 0);
}

#[tokio::test]
async fn test_handshake_timeout() {
    let h = harness(
        MockControlChannel::new(MockOutcome::Silent),
        RecordingDecoder::new(),
    )
    .await;

    let err = h.manager.connect("127.0.0.1").await.unwrap_err();
    assert!(matches!(err, ListenError::HandshakeTimeout { .. }));
    assert!(err.is_recoverable());
    assert_eq!(h.control.disconnect_count(), 1);
}

#[tokio::test]
async fn test_channel_closed_mid_handshake() {
    let h = harness(
        MockControlChannel::new(MockOutcome::CloseChannel),
        RecordingDecoder::new(),
    )
    .await;

    let err = h.manager.connect("127.0.0.1").await.unwrap_err();
    assert!(matches!(err, ListenError::HandshakeFailed { .. }));
}

#[tokio::test]
async fn test_decoder_failure_aborts_startup() {
    let h = harness(
        MockControlChannel::accepting(),
        RecordingDecoder::failing_acquire(),
    )
    .await;

    let err = h.manager.connect("127.0.0.1").await.unwrap_err();
    assert!(matches!(err, ListenError::Decoder(_)));
    assert_eq!(h.manager.state().await, LifecycleState::Closed);
    assert_eq!(h.control.disconnect_count(), 1);
    assert_eq!(h.decoder.release_count(), 0);
}

#[tokio::test]
async fn test_decoder_release_failure_still_tears_down() {
    let h = harness(
        MockControlChannel::accepting(),
        RecordingDecoder::failing_release(),
    )
    .await;
    let session = h.manager.connect("127.0.0.1").await.unwrap();

    let err = session.disconnect().await.unwrap_err();
    assert!(matches!(err, ListenError::Decoder(_)));
    assert!(session.is_closed());
    assert_eq!(h.manager.state().await, LifecycleState::Closed);
    assert_eq!(h.control.disconnect_count(), 1);

    // Not retried
    session.disconnect().await.unwrap();
    assert_eq!(h.decoder.release_count(), 1);
}

#[tokio::test]
async fn test_second_connect_rejected_while_active() {
    let h = harness(MockControlChannel::accepting(), RecordingDecoder::new()).await;
    let session = h.manager.connect("127.0.0.1").await.unwrap();

    let err = h.manager.connect("127.0.0.1").await.unwrap_err();
    assert!(matches!(err, ListenError::InvalidState { .. }));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_after_close() {
    let h = harness(MockControlChannel::accepting(), RecordingDecoder::new()).await;

    let first = h.manager.connect("127.0.0.1").await.unwrap();
    first.disconnect().await.unwrap();
    let second = h.manager.connect("127.0.0.1").await.unwrap();

    // Seeded generator advances per attempt
    assert_ne!(first.local_ssrc(), second.local_ssrc());
    second.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_rejected_before_handshake() {
    let control = Arc::new(MockControlChannel::accepting());
    let manager = SessionManager::new(
        SessionConfig::builder().bandwidth(0.0).build(),
        control.clone(),
        Arc::new(RecordingDecoder::new()),
    );

    let err = manager.connect("127.0.0.1").await.unwrap_err();
    assert!(matches!(err, ListenError::InvalidConfig { .. }));
    assert!(control.calls().is_empty());
    assert_eq!(manager.state().await, LifecycleState::Idle);
}

#[tokio::test]
async fn test_debug_mode_shared_with_loops() {
    let h = harness(MockControlChannel::accepting(), RecordingDecoder::new()).await;
    let diagnostics = h.manager.diagnostics();

    h.manager.set_debug_mode(true);
    assert!(diagnostics.is_verbose());
    h.manager.set_debug_mode(false);
    assert!(!diagnostics.is_verbose());
}

#[derive(Default)]
struct CountingListener {
    connected: Mutex<Vec<ActiveSession>>,
    failures: Mutex<Vec<String>>,
}

impl ConnectionListener for CountingListener {
    fn on_connected(&self, session: ActiveSession) {
        self.connected.lock().unwrap().push(session);
    }

    fn on_failure(&self, error: ListenError) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

#[tokio::test]
async fn test_listener_gets_exactly_one_success() {
    let h = harness(MockControlChannel::accepting(), RecordingDecoder::new()).await;
    let listener = Arc::new(CountingListener::default());

    h.manager
        .connect_with_listener("127.0.0.1", listener.clone())
        .await
        .unwrap();

    assert!(listener.failures.lock().unwrap().is_empty());
    let session = listener.connected.lock().unwrap().pop().unwrap();
    assert!(listener.connected.lock().unwrap().is_empty());
    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_listener_gets_exactly_one_failure() {
    let h = harness(
        MockControlChannel::new(MockOutcome::Unsupported),
        RecordingDecoder::new(),
    )
    .await;
    let listener = Arc::new(CountingListener::default());

    h.manager
        .connect_with_listener("127.0.0.1", listener.clone())
        .await
        .unwrap();

    assert!(listener.connected.lock().unwrap().is_empty());
    assert_eq!(listener.failures.lock().unwrap().len(), 1);
}
