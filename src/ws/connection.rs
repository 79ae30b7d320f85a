//! Connection manager: transport lifecycle, reconnection state machine, backoff.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open──▶ Connected
//!      ▲                      ▲    │                │
//!      │                      │    └─fail/close─┐   │ close (≠1000, budget left)
//!      │                      └── backoff ◀─────┴───┘
//!      └──── close 1000 / budget exhausted / disconnect() ◀── Closed
//! ```
//!
//! The manager is synchronous: it decides, the caller waits. It is the single
//! writer of [`ConnectionState`].

use std::time::Duration;

use crate::error::WsError;
use crate::network::orderbook_endpoint;
use crate::ws::queue::OutboundQueue;
use crate::ws::transport::Transport;
use crate::ws::{ConnectionState, OutboundCommand, StateCell, WsConfig, CLOSE_NORMAL};

/// Outcome of a `connect` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectStep {
    /// Open a transport to this URL.
    Open(String),
    /// Already connected; nothing to do.
    AlreadyConnected,
}

/// What to do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Reconnect { attempt: u32, delay: Duration },
    Stop,
}

/// Outcome of a `disconnect` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectStep {
    /// Close sent; wait for the transport to report `Closed`.
    AwaitClose,
    /// No transport was open; now disconnected.
    Finished,
    /// Nothing to do.
    AlreadyDisconnected,
}

/// Delay before reconnect `attempt` (1-based): `base × 2^(attempt−1)`. No jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

pub struct ConnectionManager {
    config: WsConfig,
    state: StateCell,
    transport: Option<Box<dyn Transport>>,
    queue: OutboundQueue,
    token: Option<String>,
    reconnect_attempts: u32,
    /// Reconnects still permitted for this connect cycle; zeroed by `disconnect`.
    retry_budget: u32,
}

impl ConnectionManager {
    pub fn new(config: WsConfig, state: StateCell) -> Self {
        Self {
            config,
            state,
            transport: None,
            queue: OutboundQueue::new(),
            token: None,
            reconnect_attempts: 0,
            retry_budget: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.transport.is_some()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Commands waiting for the next open, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &OutboundCommand> {
        self.queue.iter()
    }

    /// Return commands the transport accepted but never delivered. They go
    /// ahead of anything queued since and are sent on the next open.
    pub fn requeue(&mut self, commands: Vec<OutboundCommand>) {
        if commands.is_empty() {
            return;
        }
        tracing::info!("{} undelivered command(s) queued for retry", commands.len());
        self.queue.requeue_front(commands);
    }

    fn set_state(&mut self, state: ConnectionState) {
        let prev = self.state.get();
        if prev != state {
            tracing::debug!("Connection state {:?} -> {:?}", prev, state);
            self.state.set(state);
        }
    }

    /// Begin a connect cycle with `token`.
    pub fn connect(&mut self, token: &str) -> Result<ConnectStep, WsError> {
        match self.state() {
            ConnectionState::Connecting => Err(WsError::AlreadyConnecting),
            ConnectionState::Closed => Err(WsError::Closing),
            ConnectionState::Connected => Ok(ConnectStep::AlreadyConnected),
            ConnectionState::Disconnected => {
                let url = orderbook_endpoint(&self.config.url, token)?;
                self.token = Some(token.to_string());
                self.reconnect_attempts = 0;
                self.retry_budget = if self.config.reconnect {
                    self.config.max_reconnect_attempts
                } else {
                    0
                };
                self.set_state(ConnectionState::Connecting);
                tracing::info!("Connecting to {}/{}", self.config.url, crate::network::ORDERBOOK_PATH);
                Ok(ConnectStep::Open(url))
            }
        }
    }

    /// URL for the next reconnect attempt, if one is still wanted.
    pub fn reconnect_url(&self) -> Option<String> {
        if self.state() != ConnectionState::Connecting {
            return None;
        }
        let token = self.token.as_deref()?;
        orderbook_endpoint(&self.config.url, token).ok()
    }

    /// The transport opened: reset the retry counter and flush the queue.
    pub fn on_open(&mut self, transport: Box<dyn Transport>) {
        self.reconnect_attempts = 0;
        self.transport = Some(transport);
        self.set_state(ConnectionState::Connected);

        if self.queue.is_empty() {
            return;
        }
        tracing::info!("Flushing {} pending command(s)", self.queue.len());
        self.flush();
    }

    /// The transport closed (or failed to open). Decide whether to retry.
    pub fn on_close(&mut self, code: u16) -> CloseDecision {
        self.transport = None;

        if code == CLOSE_NORMAL || self.reconnect_attempts >= self.retry_budget {
            if code != CLOSE_NORMAL && self.retry_budget > 0 {
                tracing::warn!(
                    "Reconnect attempts exhausted after {} attempt(s); staying disconnected",
                    self.reconnect_attempts
                );
            }
            self.set_state(ConnectionState::Disconnected);
            return CloseDecision::Stop;
        }

        self.reconnect_attempts += 1;
        let delay = backoff_delay(self.config.base_reconnect_delay(), self.reconnect_attempts);
        self.set_state(ConnectionState::Connecting);
        tracing::info!(
            "Reconnect attempt {}/{} in {}ms",
            self.reconnect_attempts,
            self.retry_budget,
            delay.as_millis()
        );
        CloseDecision::Reconnect {
            attempt: self.reconnect_attempts,
            delay,
        }
    }

    /// Suppress further reconnects and close the transport with code 1000.
    pub fn disconnect(&mut self) -> DisconnectStep {
        self.retry_budget = 0;

        match self.state() {
            ConnectionState::Disconnected => DisconnectStep::AlreadyDisconnected,
            ConnectionState::Closed => DisconnectStep::AwaitClose,
            ConnectionState::Connected | ConnectionState::Connecting => {
                match self.transport.as_mut() {
                    Some(transport) => {
                        transport.close(CLOSE_NORMAL, "Client disconnect");
                        self.set_state(ConnectionState::Closed);
                        DisconnectStep::AwaitClose
                    }
                    None => {
                        self.set_state(ConnectionState::Disconnected);
                        DisconnectStep::Finished
                    }
                }
            }
        }
    }

    /// Send now if connected, otherwise queue for the next open.
    ///
    /// Commands always go through the queue so anything still waiting from a
    /// halted flush keeps its place ahead of newer commands.
    pub fn send(&mut self, command: OutboundCommand) {
        self.queue.enqueue(command);
        if self.is_connected() {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = self.queue.flush(transport.as_mut()) {
                tracing::warn!("Send failed, {} command(s) kept for retry: {}", self.queue.len(), e);
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("has_transport", &self.transport.is_some())
            .field("queued", &self.queue.len())
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("retry_budget", &self.retry_budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::transport::testing::RecordingTransport;
    use crate::ws::CLOSE_ABNORMAL;

    fn manager() -> ConnectionManager {
        let config = WsConfig {
            url: "ws://feed.test/ws".into(),
            base_reconnect_delay_ms: 100,
            ..Default::default()
        };
        ConnectionManager::new(config, StateCell::new())
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let base = Duration::from_millis(100);
        for attempt in 1..=5u32 {
            assert_eq!(
                backoff_delay(base, attempt),
                Duration::from_millis(100 * 2u64.pow(attempt - 1))
            );
        }
    }

    #[test]
    fn test_connect_builds_endpoint() {
        let mut mgr = manager();
        assert_eq!(
            mgr.connect("tok en"),
            Ok(ConnectStep::Open("ws://feed.test/ws/orderbook?token=tok%20en".into()))
        );
        assert_eq!(mgr.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_second_connect_while_connecting_rejected() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        assert_eq!(mgr.connect("t"), Err(WsError::AlreadyConnecting));
    }

    #[test]
    fn test_connect_when_connected_is_noop() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_open(Box::new(RecordingTransport::new()));
        assert_eq!(mgr.connect("t"), Ok(ConnectStep::AlreadyConnected));
    }

    #[test]
    fn test_blank_token_rejected_without_state_change() {
        let mut mgr = manager();
        assert!(matches!(mgr.connect(""), Err(WsError::InvalidToken(_))));
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_commands_queue_until_open() {
        let mut mgr = manager();
        mgr.send(OutboundCommand::subscribe("EUR/USD", 5));
        assert_eq!(mgr.queued(), 1);

        mgr.connect("t").unwrap();
        let transport = RecordingTransport::new();
        mgr.on_open(Box::new(transport.clone()));

        assert_eq!(mgr.queued(), 0);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_normal_close_never_reconnects() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_open(Box::new(RecordingTransport::new()));
        assert_eq!(mgr.on_close(CLOSE_NORMAL), CloseDecision::Stop);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_abnormal_close_schedules_exponential_retries_then_stops() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_open(Box::new(RecordingTransport::new()));

        for attempt in 1..=5u32 {
            let decision = mgr.on_close(CLOSE_ABNORMAL);
            assert_eq!(
                decision,
                CloseDecision::Reconnect {
                    attempt,
                    delay: Duration::from_millis(100 << (attempt - 1)),
                }
            );
            assert_eq!(mgr.state(), ConnectionState::Connecting);
            assert!(mgr.reconnect_url().is_some());
        }

        assert_eq!(mgr.on_close(CLOSE_ABNORMAL), CloseDecision::Stop);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.reconnect_url().is_none());
    }

    #[test]
    fn test_successful_open_resets_attempts() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_close(CLOSE_ABNORMAL);
        mgr.on_close(CLOSE_ABNORMAL);
        assert_eq!(mgr.reconnect_attempts(), 2);

        mgr.on_open(Box::new(RecordingTransport::new()));
        assert_eq!(mgr.reconnect_attempts(), 0);
        assert_eq!(
            mgr.on_close(CLOSE_ABNORMAL),
            CloseDecision::Reconnect {
                attempt: 1,
                delay: Duration::from_millis(100),
            }
        );
    }

    #[test]
    fn test_reconnect_disabled_stops_immediately() {
        let config = WsConfig {
            reconnect: false,
            ..Default::default()
        };
        let mut mgr = ConnectionManager::new(config, StateCell::new());
        mgr.connect("t").unwrap();
        assert_eq!(mgr.on_close(CLOSE_ABNORMAL), CloseDecision::Stop);
    }

    #[test]
    fn test_disconnect_closes_with_normal_code_and_suppresses_retries() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        let transport = RecordingTransport::new();
        mgr.on_open(Box::new(transport.clone()));

        assert_eq!(mgr.disconnect(), DisconnectStep::AwaitClose);
        assert_eq!(mgr.state(), ConnectionState::Closed);
        assert_eq!(transport.closed(), Some((CLOSE_NORMAL, "Client disconnect".into())));

        // Idempotent while closing.
        assert_eq!(mgr.disconnect(), DisconnectStep::AwaitClose);

        // Even an abnormal code must not reconnect after disconnect().
        assert_eq!(mgr.on_close(CLOSE_ABNORMAL), CloseDecision::Stop);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(mgr.disconnect(), DisconnectStep::AlreadyDisconnected);
    }

    #[test]
    fn test_disconnect_during_backoff_finishes_immediately() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_close(CLOSE_ABNORMAL);
        assert_eq!(mgr.disconnect(), DisconnectStep::Finished);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.reconnect_url().is_none());
    }

    #[test]
    fn test_connect_while_closing_rejected() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_open(Box::new(RecordingTransport::new()));
        mgr.disconnect();
        assert_eq!(mgr.connect("t"), Err(WsError::Closing));
    }

    #[test]
    fn test_requeued_commands_go_out_first_on_next_open() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_open(Box::new(RecordingTransport::new()));
        mgr.send(OutboundCommand::subscribe("A", 5));

        mgr.on_close(CLOSE_ABNORMAL);
        mgr.send(OutboundCommand::subscribe("B", 5));
        mgr.requeue(vec![OutboundCommand::subscribe("A", 5)]);

        let transport = RecordingTransport::new();
        mgr.on_open(Box::new(transport.clone()));
        let symbols: Vec<_> = transport.sent().iter().map(|v| v["symbol"].clone()).collect();
        assert_eq!(symbols, vec!["A", "B"]);
    }

    #[test]
    fn test_failed_send_keeps_order_for_next_open() {
        let mut mgr = manager();
        mgr.connect("t").unwrap();
        mgr.on_open(Box::new(RecordingTransport::new().fail_after(0)));

        mgr.send(OutboundCommand::subscribe("A", 5));
        mgr.send(OutboundCommand::subscribe("B", 5));
        assert_eq!(mgr.queued(), 2);

        mgr.on_close(CLOSE_ABNORMAL);
        let transport = RecordingTransport::new();
        mgr.on_open(Box::new(transport.clone()));
        let symbols: Vec<_> = transport.sent().iter().map(|v| v["symbol"].clone()).collect();
        assert_eq!(symbols, vec!["A", "B"]);
    }
}
