//! Session lifecycle orchestration

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::handshake::{ControlChannel, HandshakeEvent};
use super::state::{LifecycleState, SessionEvent};
use crate::decoder::{DecoderHandle, DecoderSink};
use crate::error::{ListenError, Result};
use crate::net;
use crate::session::{LoopHandle, PacketReceiver, ReportLoop, Session, SharedSession};
use crate::types::{Diagnostics, SessionConfig};

/// Receives the outcome of [`SessionManager::connect_with_listener`]
///
/// Exactly one of the two methods is called per attempt.
pub trait ConnectionListener: Send + Sync {
    /// The session is running
    fn on_connected(&self, session: ActiveSession);

    /// The attempt failed; no session was created
    fn on_failure(&self, error: ListenError);
}

/// State shared between the manager and the sessions it creates
struct Shared {
    config: SessionConfig,
    control: Arc<dyn ControlChannel>,
    decoder: Arc<dyn DecoderSink>,
    diagnostics: Diagnostics,
    state: RwLock<LifecycleState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Shared {
    /// Enter `Handshaking` if no other attempt is in flight
    async fn begin_handshake(&self) -> Result<()> {
        let old = {
            let mut state = self.state.write().await;
            let old = *state;
            if !old.can_transition_to(LifecycleState::Handshaking) {
                return Err(ListenError::InvalidState {
                    message: "A session is already connecting or active".to_string(),
                    current_state: format!("{old:?}"),
                });
            }
            *state = LifecycleState::Handshaking;
            old
        };

        self.send_event(SessionEvent::StateChanged {
            old,
            new: LifecycleState::Handshaking,
        });
        Ok(())
    }

    async fn set_state(&self, new_state: LifecycleState) {
        let old_state = {
            let mut state = self.state.write().await;
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            tracing::debug!("Lifecycle {:?} -> {:?}", old_state, new_state);
            self.send_event(SessionEvent::StateChanged {
                old: old_state,
                new: new_state,
            });
        }
    }

    fn send_event(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn close_control(&self) {
        if let Err(e) = self.control.disconnect().await {
            tracing::warn!("Control channel disconnect failed: {}", e);
        }
    }
}

/// Sockets bound for one session
struct Sockets {
    data: UdpSocket,
    report: UdpSocket,
    relay: UdpSocket,
}

/// Creates listening sessions and drives their lifecycle
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
    rng_seed: Option<u64>,
    attempts: Arc<AtomicU64>,
}

impl SessionManager {
    /// Create a manager using the given collaborators
    #[must_use]
    pub fn new(
        config: SessionConfig,
        control: Arc<dyn ControlChannel>,
        decoder: Arc<dyn DecoderSink>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            shared: Arc::new(Shared {
                config,
                control,
                decoder,
                diagnostics: Diagnostics::default(),
                state: RwLock::new(LifecycleState::Idle),
                event_tx,
            }),
            rng_seed: None,
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Draw SSRCs and interval jitter from a seeded generator
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Current lifecycle state
    pub async fn state(&self) -> LifecycleState {
        *self.shared.state.read().await
    }

    /// Subscribe to lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Toggle per-packet and per-report diagnostics
    pub fn set_debug_mode(&self, enabled: bool) {
        tracing::info!("Debug mode {}", if enabled { "on" } else { "off" });
        self.shared.diagnostics.set_verbose(enabled);
    }

    /// Shared diagnostics flag
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.shared.diagnostics.clone()
    }

    /// Connect to the device at `host` and start a session
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, another session is
    /// active, the address cannot be resolved, negotiation fails or times
    /// out, a socket cannot be bound, or the decoder cannot be started.
    pub async fn connect(&self, host: &str) -> Result<ActiveSession> {
        self.shared.config.validate()?;
        self.shared.begin_handshake().await?;
        tracing::info!("Connecting to {}", host);

        match self.establish(host).await {
            Ok(session) => {
                self.shared.set_state(LifecycleState::Active).await;
                self.shared.send_event(SessionEvent::Connected {
                    device: session.device,
                    ssrc: session.ssrc,
                });
                tracing::info!(
                    "Session {:#010x} active, receiving on {}",
                    session.ssrc,
                    session.data_addr
                );
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", host, e);
                self.shared.set_state(LifecycleState::Closed).await;
                self.shared.send_event(SessionEvent::Failed {
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
                Err(e)
            }
        }
    }

    /// Run [`connect`](Self::connect) in the background and report to `listener`
    pub fn connect_with_listener(
        &self,
        host: impl Into<String>,
        listener: Arc<dyn ConnectionListener>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        let host = host.into();

        tokio::spawn(async move {
            match manager.connect(&host).await {
                Ok(session) => listener.on_connected(session),
                Err(e) => listener.on_failure(e),
            }
        })
    }

    /// Tear down `session`; absent or closed sessions are ignored
    ///
    /// # Errors
    ///
    /// Returns `Decoder` if the decoder could not be released. Teardown
    /// still completes.
    pub async fn disconnect(&self, session: Option<&ActiveSession>) -> Result<()> {
        match session {
            Some(session) => session.disconnect().await,
            None => Ok(()),
        }
    }

    async fn establish(&self, host: &str) -> Result<ActiveSession> {
        let config = &self.shared.config;
        let device = net::resolve(host, config.control_port).await?;
        let local_ip = net::local_ip_towards(device).await?;
        let requested = SocketAddr::new(local_ip, config.data_port);

        let timeout = config.handshake_timeout;
        let stream = match tokio::time::timeout(timeout, self.negotiate(device, requested)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(ListenError::CapabilityUnsupported)) => {
                return Err(ListenError::CapabilityUnsupported);
            }
            Ok(Err(e)) => {
                self.shared.close_control().await;
                return Err(e);
            }
            Err(_) => {
                self.shared.close_control().await;
                return Err(ListenError::HandshakeTimeout { duration: timeout });
            }
        };
        tracing::debug!("Device {} streams to {}", device, stream);

        let sockets = match self.bind_sockets(device, stream).await {
            Ok(sockets) => sockets,
            Err(e) => {
                self.shared.close_control().await;
                return Err(e.into());
            }
        };
        self.start_session(device, sockets).await
    }

    /// Capability query, then the setup exchange
    async fn negotiate(&self, device: SocketAddr, requested: SocketAddr) -> Result<SocketAddr> {
        let control = &self.shared.control;
        if !control.query_capability(device).await? {
            return Err(ListenError::CapabilityUnsupported);
        }

        let (event_tx, mut event_rx) = mpsc::channel(8);
        control.start(device, event_tx).await?;

        while let Some(event) = event_rx.recv().await {
            match event {
                HandshakeEvent::AuthSucceeded => {
                    tracing::debug!("Authenticated, requesting audio at {}", requested);
                    control.set_audio_output(requested).await?;
                }
                HandshakeEvent::SetupComplete(stream) => return Ok(stream),
                HandshakeEvent::AuthFailed(reason) => {
                    return Err(ListenError::AuthenticationFailed { reason });
                }
            }
        }

        Err(ListenError::HandshakeFailed {
            message: "control channel closed before setup completed".to_string(),
        })
    }

    async fn bind_sockets(&self, device: SocketAddr, stream: SocketAddr) -> std::io::Result<Sockets> {
        let config = &self.shared.config;
        Ok(Sockets {
            data: net::bind_data_socket(stream).await?,
            report: net::bind_udp(net::wildcard(device, config.local_report_port)).await?,
            relay: net::bind_udp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).await?,
        })
    }

    /// Start both loops, then the decoder
    async fn start_session(&self, device: SocketAddr, sockets: Sockets) -> Result<ActiveSession> {
        let config = &self.shared.config;
        let diagnostics = &self.shared.diagnostics;
        let decoder_input = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), config.decoder_port);
        let data_addr = sockets.data.local_addr()?;
        let report_addr = sockets.report.local_addr()?;

        let session = SharedSession::new(Session::initialize(config, self.rng(), Instant::now()));
        let ssrc = session.local_ssrc();

        let receiver = PacketReceiver::new(
            Arc::new(sockets.data),
            session.clone(),
            Arc::new(sockets.relay),
            decoder_input,
            config.payload_type,
            diagnostics.clone(),
        );
        let receiver = LoopHandle::spawn("receive", |shutdown| receiver.run(shutdown));

        let reporter = ReportLoop::new(
            Arc::new(sockets.report),
            SocketAddr::new(device.ip(), config.report_port),
            session.clone(),
            diagnostics.clone(),
        );
        let reporter = LoopHandle::spawn("report", |shutdown| reporter.run(shutdown));

        let decoder = match self.shared.decoder.acquire(decoder_input).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Decoder unavailable: {}", e);
                self.shared.close_control().await;
                reporter.stop(config.stop_timeout).await;
                receiver.stop(config.stop_timeout).await;
                return Err(e.into());
            }
        };

        Ok(ActiveSession {
            shared: self.shared.clone(),
            session,
            device,
            data_addr,
            report_addr,
            ssrc,
            teardown: Mutex::new(Some(Teardown {
                reporter,
                receiver,
                decoder,
            })),
        })
    }

    fn rng(&self) -> Box<dyn RngCore + Send> {
        match self.rng_seed {
            Some(seed) => {
                let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
                Box::new(StdRng::seed_from_u64(seed.wrapping_add(attempt)))
            }
            None => Box::new(StdRng::from_entropy()),
        }
    }
}

/// Resources released on disconnect, in order
struct Teardown {
    reporter: LoopHandle,
    receiver: LoopHandle,
    decoder: DecoderHandle,
}

/// A running session
///
/// Dropping it without calling [`disconnect`](Self::disconnect) runs the
/// same teardown in a background task, so the manager can connect again
/// once it finishes.
pub struct ActiveSession {
    shared: Arc<Shared>,
    session: Arc<SharedSession>,
    device: SocketAddr,
    data_addr: SocketAddr,
    report_addr: SocketAddr,
    ssrc: u32,
    teardown: Mutex<Option<Teardown>>,
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("ssrc", &self.ssrc)
            .field("device", &self.device)
            .field("data_addr", &self.data_addr)
            .field("report_addr", &self.report_addr)
            .finish_non_exhaustive()
    }
}

impl ActiveSession {
    /// Our own SSRC
    #[must_use]
    pub fn local_ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Shared session state and membership
    #[must_use]
    pub fn session(&self) -> &Arc<SharedSession> {
        &self.session
    }

    /// Control address of the streaming device
    #[must_use]
    pub fn device(&self) -> SocketAddr {
        self.device
    }

    /// Local address of the data socket
    #[must_use]
    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    /// Local address of the report socket
    #[must_use]
    pub fn report_addr(&self) -> SocketAddr {
        self.report_addr
    }

    /// Whether `disconnect` already ran
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Tear the session down; later calls are no-ops
    ///
    /// Order: control channel, report loop (sends BYE), receive loop,
    /// decoder.
    ///
    /// # Errors
    ///
    /// Returns `Decoder` if the decoder could not be released. Every other
    /// step still runs.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(teardown) = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            tracing::debug!("Session {:#010x} already closed", self.ssrc);
            return Ok(());
        };

        tracing::info!("Disconnecting session {:#010x}", self.ssrc);
        tear_down(&self.shared, self.ssrc, teardown).await
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        let Some(teardown) = self
            .teardown
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let ssrc = self.ssrc;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::info!("Session {:#010x} dropped, tearing down", ssrc);
                let shared = self.shared.clone();
                runtime.spawn(async move {
                    // Already logged inside
                    let _ = tear_down(&shared, ssrc, teardown).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    "Session {:#010x} dropped outside a runtime; decoder not released",
                    ssrc
                );
            }
        }
    }
}

/// Fixed-order teardown shared by `disconnect` and drop
async fn tear_down(shared: &Shared, ssrc: u32, teardown: Teardown) -> Result<()> {
    let stop_timeout = shared.config.stop_timeout;

    shared.close_control().await;
    teardown.reporter.stop(stop_timeout).await;
    teardown.receiver.stop(stop_timeout).await;
    let released = shared.decoder.release(teardown.decoder).await;
    if let Err(ref e) = released {
        tracing::warn!("Failed to release decoder: {}", e);
    }

    shared.set_state(LifecycleState::Closed).await;
    shared.send_event(SessionEvent::Disconnected { ssrc });
    released.map_err(Into::into)
}
