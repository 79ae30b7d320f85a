//! Feed session: the synchronous channel core.
//!
//! Composes the connection manager, subscription controller, dispatcher,
//! snapshot cache and listener registry. Every method runs to completion and
//! performs no I/O beyond [`Transport::send`]/[`Transport::close`]; the caller
//! owns timers and the socket.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::orderbook::state::SnapshotCache;
use crate::domain::orderbook::wire::OrderBookSnapshot;
use crate::error::WsError;
use crate::shared::Symbol;
use crate::ws::connection::{CloseDecision, ConnectStep, ConnectionManager, DisconnectStep};
use crate::ws::dispatch::{Dispatched, MessageDispatcher};
use crate::ws::listeners::ListenerRegistry;
use crate::ws::subscriptions::{Subscription, SubscriptionController};
use crate::ws::transport::Transport;
use crate::ws::{
    ConnectionState, ErrorSource, FeedEvent, OutboundCommand, StateCell, WsConfig, CLOSE_NORMAL,
};

pub struct FeedSession {
    conn: ConnectionManager,
    subscriptions: SubscriptionController,
    dispatcher: MessageDispatcher,
}

impl FeedSession {
    pub fn new(
        config: WsConfig,
        state: StateCell,
        cache: Arc<SnapshotCache>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            conn: ConnectionManager::new(config, state),
            subscriptions: SubscriptionController::new(),
            dispatcher: MessageDispatcher::new(cache, listeners),
        }
    }

    pub fn config(&self) -> &WsConfig {
        self.conn.config()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn queued(&self) -> usize {
        self.conn.queued()
    }

    pub fn current_subscription(&self) -> Option<&Subscription> {
        self.subscriptions.current()
    }

    pub fn snapshot(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.dispatcher.cache().get(symbol)
    }

    pub fn connect(&mut self, token: &str) -> Result<ConnectStep, WsError> {
        self.conn.connect(token)
    }

    pub fn reconnect_url(&self) -> Option<String> {
        self.conn.reconnect_url()
    }

    /// Transport opened: flush queued commands, then emit `Connected`.
    pub fn handle_open(&mut self, transport: Box<dyn Transport>) {
        self.conn.on_open(transport);
        tracing::info!("Connected");
        self.emit(&FeedEvent::Connected);
    }

    /// Socket-level failure. Reported to listeners; the close that follows
    /// decides whether to reconnect.
    pub fn handle_transport_error(&mut self, error: String) {
        tracing::warn!("Transport error: {}", error);
        self.emit(&FeedEvent::Error {
            source: ErrorSource::Transport,
            error,
            symbol: None,
        });
    }

    /// Frames the transport accepted but could not write. They are queued
    /// again, ahead of newer commands.
    pub fn handle_undelivered(&mut self, frames: Vec<String>) {
        let commands = frames
            .iter()
            .filter_map(|frame| match serde_json::from_str::<OutboundCommand>(frame) {
                Ok(command) => Some(command),
                Err(e) => {
                    tracing::warn!("Dropping undelivered frame {}: {}", frame, e);
                    None
                }
            })
            .collect();
        self.conn.requeue(commands);
    }

    /// Transport closed. Returns the delay before the next attempt, if any.
    ///
    /// The snapshot cache and current subscription are cleared; queued
    /// commands survive for the next open, and a subscribe among them is
    /// current again.
    pub fn handle_close(&mut self, code: u16, reason: &str) -> Option<Duration> {
        let reconnect_in = match self.conn.on_close(code) {
            CloseDecision::Reconnect { delay, .. } => Some(delay),
            CloseDecision::Stop => None,
        };
        tracing::info!("Disconnected (code {}): {}", code, reason);
        self.emit(&FeedEvent::Disconnected {
            code,
            reason: reason.to_string(),
            reconnect_in,
        });
        self.reset_view();
        reconnect_in
    }

    pub fn handle_message(&mut self, text: &str) -> Dispatched {
        let current = self.subscriptions.current().map(|s| s.symbol.clone());
        self.dispatcher.dispatch(text, current.as_ref())
    }

    pub fn subscribe(&mut self, symbol: Symbol, depth: u32) -> Result<(), WsError> {
        self.subscriptions
            .subscribe(symbol, depth, &mut self.conn, self.dispatcher.cache())
    }

    pub fn unsubscribe(&mut self, symbol: Symbol) {
        self.subscriptions
            .unsubscribe(symbol, &mut self.conn, self.dispatcher.cache());
    }

    /// Stop reconnecting and close with code 1000.
    ///
    /// When no transport is open the session is disconnected immediately and a
    /// final `Disconnected` is emitted here; otherwise it follows the close.
    pub fn disconnect(&mut self) -> DisconnectStep {
        let step = self.conn.disconnect();
        if step == DisconnectStep::Finished {
            self.emit(&FeedEvent::Disconnected {
                code: CLOSE_NORMAL,
                reason: "Client disconnect".to_string(),
                reconnect_in: None,
            });
            self.reset_view();
        }
        step
    }

    fn reset_view(&mut self) {
        self.dispatcher.cache().clear();
        self.subscriptions.reset(self.conn.pending());
    }

    fn emit(&self, event: &FeedEvent) {
        self.dispatcher.listeners().emit(event);
    }
}

impl std::fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSession")
            .field("conn", &self.conn)
            .field("subscription", &self.subscriptions.current())
            .finish()
    }
}
