//! # Order Book Feed
//!
//! Client for a real-time order book channel: one WebSocket connection, one
//! current symbol, automatic reconnection, and a cache of the latest snapshot.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: Symbols, snapshot wire types and validation, the snapshot cache
//! 2. **Channel**: Synchronous session: connection state machine, subscription
//!    control, outbound queue, dispatcher, listener registry
//! 3. **Transport**: `Connector` seam; `tokio-tungstenite` behind `ws-native`
//! 4. **High-Level Client**: `FeedClient`, a cloneable handle driving the
//!    session from one tokio task
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use orderbook_feed::prelude::*;
//!
//! let client = FeedClient::builder()
//!     .url("wss://feed.example.com/ws")
//!     .build()?;
//!
//! client.on(EventKind::OrderBook, |event| {
//!     if let FeedEvent::OrderBook(msg) = event {
//!         println!("{} mid {:?}", msg.data.symbol, msg.data.mid());
//!     }
//! });
//!
//! client.subscribe("EUR/USD")?;
//! client.connect(&token).await?;
//!
//! let book = client.get_snapshot("EUR/USD");
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes.
pub mod shared;

/// Domain modules: wire types, validation, state.
pub mod domain;

/// Feed error types.
pub mod error;

/// Endpoint construction.
pub mod network;

// ── Layers 2-3: Channel + Transport ──────────────────────────────────────────

/// Channel core: messages, events, session components, transports.
pub mod ws;

// ── Layer 4: High-Level Client ───────────────────────────────────────────────

/// `FeedClient`: the primary entry point.
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::Symbol;

    // Domain types: orderbook
    pub use crate::domain::orderbook::{
        BookLevel, BookMeta, LatestTrade, LevelCounts, OrderBookSnapshot,
        OrderBookValidationError, SnapshotCache,
    };

    // Errors
    pub use crate::error::WsError;

    // Network
    pub use crate::network::{orderbook_endpoint, DEFAULT_WS_URL};

    // Client
    pub use crate::client::{FeedClient, FeedClientBuilder, SessionStatus};

    // Channel types
    pub use crate::ws::{
        ConnectionState, ErrorSource, EventKind, EventStream, FeedEvent, ListenerId,
        OrderBookMessage, OutboundCommand, Subscription, WsConfig,
    };
    pub use crate::ws::transport::{Connection, Connector, Transport, TransportEvent};

    #[cfg(feature = "ws-native")]
    pub use crate::ws::native::TungsteniteConnector;
}
