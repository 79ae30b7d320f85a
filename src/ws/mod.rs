//! WebSocket layer: messages, events, connection state, and the channel core.
//!
//! The channel is split into small synchronous components composed by
//! [`session::FeedSession`]; [`crate::client::FeedClient`] drives a session from a
//! single tokio task. The actual WS transport sits behind [`transport::Connector`]:
//! - `ws-native` feature → `tokio-tungstenite` (native.rs)
//!
//! This module defines the shared message/event types.

pub mod connection;
pub mod dispatch;
pub mod listeners;
pub mod queue;
pub mod session;
pub mod subscriptions;
pub mod transport;

#[cfg(feature = "ws-native")]
pub mod native;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::orderbook::wire::OrderBookSnapshot;
use crate::error::WsError;
use crate::shared::Symbol;

pub use connection::ConnectionManager;
pub use dispatch::MessageDispatcher;
pub use listeners::{EventStream, Listener, ListenerId, ListenerRegistry};
pub use queue::OutboundQueue;
pub use session::FeedSession;
pub use subscriptions::{Subscription, SubscriptionController};
pub use transport::{Connection, Connector, Transport, TransportEvent};

/// Close code for an intentional, normal closure. Never triggers a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Default number of levels per side requested on subscribe.
pub const DEFAULT_DEPTH: u32 = 5;

/// Largest depth the feed accepts.
pub const MAX_DEPTH: u32 = 5;

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Commands sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundCommand {
    Subscribe { symbol: Symbol, levels: u32 },
    Unsubscribe { symbol: Symbol },
}

impl OutboundCommand {
    pub fn subscribe(symbol: impl Into<Symbol>, levels: u32) -> Self {
        Self::Subscribe {
            symbol: symbol.into(),
            levels,
        }
    }

    pub fn unsubscribe(symbol: impl Into<Symbol>) -> Self {
        Self::Unsubscribe {
            symbol: symbol.into(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Subscribe { symbol, .. } | Self::Unsubscribe { symbol } => symbol,
        }
    }

    /// Serialize to the JSON text frame sent over the wire.
    pub fn to_frame(&self) -> Result<String, WsError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// A parsed inbound frame. Exists only for the duration of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    OrderBook(OrderBookMessage),
    Error(ServerErrorPayload),
    Success(AckPayload),
    Heartbeat(HeartbeatPayload),
    /// A well-formed frame with a `type` this client does not handle.
    Unknown { kind: String },
}

/// Envelope used to read the `type` discriminator before the payload.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(flatten)]
    body: serde_json::Map<String, serde_json::Value>,
}

impl InboundFrame {
    /// Parse and classify a text frame.
    ///
    /// Malformed JSON, a missing `type`, or a known type with the wrong shape is
    /// an error. Unrecognised types parse successfully as [`InboundFrame::Unknown`].
    pub fn parse(text: &str) -> Result<Self, WsError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let kind = raw
            .kind
            .ok_or_else(|| WsError::ProtocolError("Frame has no type".to_string()))?;
        let body = serde_json::Value::Object(raw.body);

        let frame = match kind.as_str() {
            "orderbook" => Self::OrderBook(serde_json::from_value(body)?),
            "error" => Self::Error(serde_json::from_value(body)?),
            "success" => Self::Success(serde_json::from_value(body)?),
            "heartbeat" => Self::Heartbeat(serde_json::from_value(body)?),
            _ => Self::Unknown { kind },
        };
        Ok(frame)
    }
}

/// `{"type":"orderbook", ...}`: a full snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookMessage {
    #[serde(default)]
    pub symbol: Option<Symbol>,
    #[serde(default)]
    pub request_id: Option<String>,
    /// Server send time, verbatim.
    #[serde(default)]
    pub timestamp: Option<String>,
    pub data: OrderBookSnapshot,
}

/// `{"type":"error","error":..}`: reported by the feed; the connection stays open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerErrorPayload {
    pub error: String,
    #[serde(default)]
    pub symbol: Option<Symbol>,
}

/// `{"type":"success",...}`: acknowledgement of a subscribe/unsubscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub message: String,
    #[serde(default)]
    pub symbol: Option<Symbol>,
    #[serde(default)]
    pub md_req_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ─── FeedEvent ───────────────────────────────────────────────────────────────

/// Where an [`FeedEvent::Error`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// Socket-level failure; a reconnect may follow.
    Transport,
    /// An `error` frame from the feed.
    Server,
}

/// High-level events emitted by the client to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Connection established and the outbound queue flushed.
    Connected,
    /// Connection lost. `reconnect_in` is `None` when no retry will follow.
    Disconnected {
        code: u16,
        reason: String,
        reconnect_in: Option<Duration>,
    },
    Error {
        source: ErrorSource,
        error: String,
        symbol: Option<Symbol>,
    },
    /// A validated snapshot, already stored in the cache.
    OrderBook(OrderBookMessage),
    Ack(AckPayload),
}

impl FeedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FeedEvent::Connected => EventKind::Connected,
            FeedEvent::Disconnected { .. } => EventKind::Disconnected,
            FeedEvent::Error { .. } => EventKind::Error,
            FeedEvent::OrderBook(_) => EventKind::OrderBook,
            FeedEvent::Ack(_) => EventKind::Ack,
        }
    }
}

/// Closed set of event kinds listeners register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    OrderBook,
    Ack,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Error,
        EventKind::OrderBook,
        EventKind::Ack,
    ];
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Connection state. Written only by the [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    /// Opening a transport, or waiting out the backoff before the next attempt.
    Connecting = 1,
    Connected = 2,
    /// `disconnect()` issued; waiting for the transport to finish closing.
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Shared, lock-free view of the current [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Config ──────────────────────────────────────────────────────────────────

/// Configuration for the feed client.
#[derive(Debug, Clone, PartialEq)]
pub struct WsConfig {
    /// Base URL; the channel endpoint is `{url}/orderbook?token=..`.
    pub url: String,
    pub reconnect: bool,
    /// Delay before reconnect attempt 1; doubles for each further attempt.
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub default_depth: u32,
    pub connect_timeout_ms: u64,
    /// How long `disconnect()` waits for the transport to confirm the close.
    pub close_timeout_ms: u64,
    /// Longest silence tolerated while connected; the feed sends a heartbeat
    /// every 30s. `0` disables the check.
    pub heartbeat_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: crate::network::DEFAULT_WS_URL.to_string(),
            reconnect: true,
            base_reconnect_delay_ms: 1000,
            max_reconnect_attempts: 5,
            default_depth: DEFAULT_DEPTH,
            connect_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
            heartbeat_timeout_ms: 90_000,
        }
    }
}

impl WsConfig {
    /// Defaults overlaid with `FEED_*` environment variables.
    pub fn from_env() -> Result<Self, WsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WsError> {
        let mut config = Self::default();

        if let Some(url) = lookup("FEED_WS_URL") {
            config.url = url;
        }
        if let Some(v) = lookup("FEED_RECONNECT") {
            config.reconnect = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Some(v) = parse_var(&lookup, "FEED_RECONNECT_BASE_MS")? {
            config.base_reconnect_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "FEED_MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "FEED_DEFAULT_DEPTH")? {
            config.default_depth = v;
        }
        if let Some(v) = parse_var(&lookup, "FEED_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "FEED_HEARTBEAT_TIMEOUT_MS")? {
            config.heartbeat_timeout_ms = v;
        }

        if !(1..=MAX_DEPTH).contains(&config.default_depth) {
            return Err(WsError::Config(format!(
                "FEED_DEFAULT_DEPTH must be between 1 and {MAX_DEPTH}"
            )));
        }
        Ok(config)
    }

    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, WsError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| WsError::Config(format!("{key}: cannot parse {raw:?}")))
        })
        .transpose()
}
