//! High-level client: `FeedClient`, a cloneable handle to one feed channel.
//!
//! The handle talks to a single background task that owns the [`FeedSession`],
//! the transport, and the one reconnect/close timer. Every input (caller
//! command, handshake result, transport event, timer) is processed to
//! completion before the next one, so listeners that call back into the
//! client see their calls applied after the current event.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;

use crate::domain::orderbook::state::SnapshotCache;
use crate::domain::orderbook::wire::OrderBookSnapshot;
use crate::error::WsError;
use crate::shared::Symbol;
use crate::ws::connection::{ConnectStep, DisconnectStep};
use crate::ws::listeners::{EventStream, ListenerId, ListenerRegistry};
use crate::ws::session::FeedSession;
use crate::ws::subscriptions::Subscription;
use crate::ws::transport::{Connection, Connector, TransportEvent};
use crate::ws::{
    ConnectionState, EventKind, FeedEvent, StateCell, WsConfig, CLOSE_ABNORMAL, CLOSE_NORMAL,
    MAX_DEPTH,
};

/// Point-in-time view of the session, read from the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub subscription: Option<Subscription>,
    pub queued: usize,
}

/// Handle to a feed channel. Cheap to clone; all clones share one connection.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct FeedClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: StateCell,
    cache: Arc<SnapshotCache>,
    listeners: Arc<ListenerRegistry>,
    default_depth: u32,
}

impl FeedClient {
    pub fn builder() -> FeedClientBuilder {
        FeedClientBuilder::default()
    }

    /// Client over the native WebSocket transport.
    #[cfg(feature = "ws-native")]
    pub fn new(config: WsConfig) -> Result<Self, WsError> {
        Self::builder().config(config).build()
    }

    /// Client over a caller-supplied transport.
    pub fn with_connector(config: WsConfig, connector: impl Connector) -> Result<Self, WsError> {
        Self::builder().config(config).connector(connector).build()
    }

    fn spawn(config: WsConfig, connector: Arc<dyn Connector>) -> Self {
        let state = StateCell::new();
        let cache = Arc::new(SnapshotCache::new());
        let listeners = Arc::new(ListenerRegistry::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let default_depth = config.default_depth;

        let session = FeedSession::new(
            config,
            state.clone(),
            Arc::clone(&cache),
            Arc::clone(&listeners),
        );
        let task = EventLoop {
            session,
            connector,
            cmd_rx,
            opening: None,
            events: None,
            timer: None,
            idle: None,
            pending_connect: None,
            disconnect_waiters: Vec::new(),
        };
        tokio::spawn(task.run());

        Self {
            cmd_tx,
            state,
            cache,
            listeners,
            default_depth,
        }
    }

    // ── Connection ───────────────────────────────────────────────────────

    /// Open the channel with `token`.
    ///
    /// Resolves once the transport is open (queued commands already flushed),
    /// or with the first handshake failure. A failed first attempt still
    /// schedules automatic reconnects. Returns immediately with
    /// [`WsError::AlreadyConnecting`] if an attempt is in flight, and `Ok` if
    /// already connected.
    pub async fn connect(&self, token: &str) -> Result<(), WsError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect {
            token: token.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| WsError::Shutdown)?
    }

    /// Close with code 1000 and stop reconnecting. Safe from any state.
    ///
    /// Resolves once the session is disconnected: when the transport confirms
    /// the close, or after the configured close timeout.
    pub async fn disconnect(&self) -> Result<(), WsError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Disconnect { reply })?;
        rx.await.map_err(|_| WsError::Shutdown)
    }

    /// Stop the background task. The transport, if open, is closed with code
    /// 1000 without waiting; every handle then returns [`WsError::Shutdown`].
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Subscribe to `symbol` at the configured default depth.
    pub fn subscribe(&self, symbol: impl Into<Symbol>) -> Result<(), WsError> {
        self.subscribe_depth(symbol, self.default_depth)
    }

    /// Subscribe to `symbol` with `depth` levels per side (1..=5).
    ///
    /// Fire-and-forget: sent now when connected, queued otherwise.
    pub fn subscribe_depth(&self, symbol: impl Into<Symbol>, depth: u32) -> Result<(), WsError> {
        if !(1..=MAX_DEPTH).contains(&depth) {
            return Err(WsError::InvalidDepth(depth));
        }
        self.send(Command::Subscribe {
            symbol: symbol.into(),
            depth,
        })
    }

    pub fn unsubscribe(&self, symbol: impl Into<Symbol>) -> Result<(), WsError> {
        self.send(Command::Unsubscribe {
            symbol: symbol.into(),
        })
    }

    pub async fn status(&self) -> Result<SessionStatus, WsError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await.map_err(|_| WsError::Shutdown)
    }

    pub async fn current_subscription(&self) -> Result<Option<Subscription>, WsError> {
        Ok(self.status().await?.subscription)
    }

    /// Commands waiting for the next open.
    pub async fn queued_commands(&self) -> Result<usize, WsError> {
        Ok(self.status().await?.queued)
    }

    // ── Snapshots ────────────────────────────────────────────────────────

    /// Copy of the latest snapshot for `symbol`, or `None`.
    pub fn get_snapshot(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.cache.get(symbol)
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Register `listener` for `kind`. Listeners run on the event loop, in
    /// registration order, and must not block.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        self.listeners.on(kind, Arc::new(listener))
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.listeners.off(kind, id)
    }

    /// Every event from now on, as a stream.
    pub fn events(&self) -> EventStream {
        EventStream::attach(Arc::clone(&self.listeners))
    }

    fn send(&self, cmd: Command) -> Result<(), WsError> {
        self.cmd_tx.send(cmd).map_err(|_| WsError::Shutdown)
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("state", &self.state.get())
            .field("cached", &self.cache.len())
            .finish()
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct FeedClientBuilder {
    config: WsConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl FeedClientBuilder {
    /// Replace every setting with `config`.
    pub fn config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.config.url = url.to_string();
        self
    }

    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect = enabled;
        self
    }

    pub fn base_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.base_reconnect_delay_ms = millis(delay);
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn default_depth(mut self, depth: u32) -> Self {
        self.config.default_depth = depth;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = millis(timeout);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout_ms = millis(timeout);
        self
    }

    /// Drop the connection when nothing arrives for `timeout`. Zero disables.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout_ms = millis(timeout);
        self
    }

    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn build(self) -> Result<FeedClient, WsError> {
        if !(1..=MAX_DEPTH).contains(&self.config.default_depth) {
            return Err(WsError::InvalidDepth(self.config.default_depth));
        }
        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(&self.config)?,
        };
        Ok(FeedClient::spawn(self.config, connector))
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(feature = "ws-native")]
fn default_connector(config: &WsConfig) -> Result<Arc<dyn Connector>, WsError> {
    Ok(Arc::new(crate::ws::native::TungsteniteConnector::new(
        config.connect_timeout(),
    )))
}

#[cfg(not(feature = "ws-native"))]
fn default_connector(_config: &WsConfig) -> Result<Arc<dyn Connector>, WsError> {
    Err(WsError::Config(
        "No transport: enable `ws-native` or supply a connector".to_string(),
    ))
}

// ═════════════════════════════════════════════════════════════════════════════
// Event loop
// ═════════════════════════════════════════════════════════════════════════════

enum Command {
    Connect {
        token: String,
        reply: oneshot::Sender<Result<(), WsError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        symbol: Symbol,
        depth: u32,
    },
    Unsubscribe {
        symbol: Symbol,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPurpose {
    Reconnect,
    CloseDeadline,
}

/// The single cancellable timer: reconnect backoff or the close deadline.
struct Timer {
    sleep: Pin<Box<Sleep>>,
    purpose: TimerPurpose,
}

impl Timer {
    fn after(delay: Duration, purpose: TimerPurpose) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(delay)),
            purpose,
        }
    }
}

struct EventLoop {
    session: FeedSession,
    connector: Arc<dyn Connector>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    /// In-flight handshake.
    opening: Option<BoxFuture<'static, Result<Connection, WsError>>>,
    /// Events of the open transport.
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    timer: Option<Timer>,
    /// Liveness deadline while connected; pushed back by every inbound frame.
    idle: Option<Pin<Box<Sleep>>>,
    pending_connect: Option<oneshot::Sender<Result<(), WsError>>>,
    disconnect_waiters: Vec<oneshot::Sender<()>>,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            // Commands first: calls made by a listener run before the next event.
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => break,
                        Some(cmd) => self.on_command(cmd),
                    }
                }
                result = poll_opening(&mut self.opening) => {
                    self.opening = None;
                    self.on_opened(result);
                }
                event = next_event(&mut self.events) => {
                    self.on_transport_event(event);
                }
                purpose = wait_timer(&mut self.timer) => {
                    self.timer = None;
                    self.on_timer(purpose);
                }
                () = wait_idle(&mut self.idle) => {
                    self.idle = None;
                    self.on_idle();
                }
            }
        }

        tracing::debug!("Feed event loop stopped");
        self.session.disconnect();
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(WsError::Shutdown));
        }
        for waiter in self.disconnect_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { token, reply } => match self.session.connect(&token) {
                Ok(ConnectStep::Open(url)) => {
                    self.pending_connect = Some(reply);
                    self.start_open(&url);
                }
                Ok(ConnectStep::AlreadyConnected) => {
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Disconnect { reply } => self.on_disconnect(reply),
            Command::Subscribe { symbol, depth } => {
                if let Err(e) = self.session.subscribe(symbol, depth) {
                    tracing::warn!("Subscribe rejected: {}", e);
                }
            }
            Command::Unsubscribe { symbol } => self.session.unsubscribe(symbol),
            Command::Status { reply } => {
                let _ = reply.send(SessionStatus {
                    state: self.session.state(),
                    subscription: self.session.current_subscription().cloned(),
                    queued: self.session.queued(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn start_open(&mut self, url: &str) {
        self.opening = Some(self.connector.open(url));
    }

    fn on_opened(&mut self, result: Result<Connection, WsError>) {
        match result {
            Ok(connection) => {
                self.events = Some(connection.events);
                self.arm_idle();
                self.session.handle_open(connection.transport);
                if let Some(reply) = self.pending_connect.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::error!("WebSocket connection failed: {}", e);
                if let Some(reply) = self.pending_connect.take() {
                    let _ = reply.send(Err(e.clone()));
                }
                self.session.handle_transport_error(e.to_string());
                self.on_closed(CLOSE_ABNORMAL, &e.to_string());
            }
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => {
                self.arm_idle();
                self.session.handle_message(&text);
            }
            Some(TransportEvent::Undelivered(frames)) => self.session.handle_undelivered(frames),
            Some(TransportEvent::Error(e)) => self.session.handle_transport_error(e),
            Some(TransportEvent::Closed { code, reason }) => self.on_closed(code, &reason),
            None => self.on_closed(CLOSE_ABNORMAL, "Transport ended"),
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        self.events = None;
        self.idle = None;
        match self.session.handle_close(code, reason) {
            Some(delay) => {
                self.timer = Some(Timer::after(delay, TimerPurpose::Reconnect));
            }
            None => {
                self.timer = None;
                self.resolve_disconnect_waiters();
            }
        }
    }

    fn on_timer(&mut self, purpose: TimerPurpose) {
        match purpose {
            TimerPurpose::Reconnect => {
                if let Some(url) = self.session.reconnect_url() {
                    self.start_open(&url);
                }
            }
            TimerPurpose::CloseDeadline => {
                tracing::warn!("Transport did not confirm close in time; dropping it");
                self.on_closed(CLOSE_NORMAL, "Client disconnect");
            }
        }
    }

    fn arm_idle(&mut self) {
        let timeout = self.session.config().heartbeat_timeout();
        if timeout.is_zero() {
            return;
        }
        match self.idle.as_mut() {
            Some(sleep) => sleep.as_mut().reset(tokio::time::Instant::now() + timeout),
            None => self.idle = Some(Box::pin(tokio::time::sleep(timeout))),
        }
    }

    /// Nothing arrived within the heartbeat timeout: treat the socket as dead.
    fn on_idle(&mut self) {
        let timeout = self.session.config().heartbeat_timeout();
        tracing::warn!("No frames for {}ms, dropping connection", timeout.as_millis());
        self.session
            .handle_transport_error(format!("No frames for {}ms", timeout.as_millis()));
        self.on_closed(CLOSE_ABNORMAL, "Heartbeat timeout");
    }

    fn on_disconnect(&mut self, reply: oneshot::Sender<()>) {
        if self
            .timer
            .as_ref()
            .is_some_and(|t| t.purpose == TimerPurpose::Reconnect)
        {
            self.timer = None;
        }
        self.opening = None;

        match self.session.disconnect() {
            DisconnectStep::AwaitClose => {
                self.disconnect_waiters.push(reply);
                if self.timer.is_none() {
                    let deadline = self.session.config().close_timeout();
                    self.timer = Some(Timer::after(deadline, TimerPurpose::CloseDeadline));
                }
            }
            DisconnectStep::Finished => {
                if let Some(connect) = self.pending_connect.take() {
                    let _ = connect.send(Err(WsError::Cancelled));
                }
                self.resolve_disconnect_waiters();
                let _ = reply.send(());
            }
            DisconnectStep::AlreadyDisconnected => {
                let _ = reply.send(());
            }
        }
    }

    fn resolve_disconnect_waiters(&mut self) {
        for waiter in self.disconnect_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

async fn poll_opening(
    opening: &mut Option<BoxFuture<'static, Result<Connection, WsError>>>,
) -> Result<Connection, WsError> {
    match opening.as_mut() {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Timer>) -> TimerPurpose {
    match timer.as_mut() {
        Some(t) => {
            t.sleep.as_mut().await;
            t.purpose
        }
        None => pending().await,
    }
}

async fn wait_idle(idle: &mut Option<Pin<Box<Sleep>>>) {
    match idle.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
