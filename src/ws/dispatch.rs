//! Message dispatcher: parse, classify, cache, notify.

use std::sync::Arc;

use crate::domain::orderbook::state::SnapshotCache;
use crate::shared::Symbol;
use crate::ws::listeners::ListenerRegistry;
use crate::ws::{ErrorSource, FeedEvent, InboundFrame, OrderBookMessage};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Snapshot cached and `OrderBook` emitted.
    Snapshot(Symbol),
    ServerError,
    Ack,
    Heartbeat,
    /// Unknown frame type; logged.
    Ignored,
    /// Malformed, invalid, or for a symbol not subscribed; logged.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    cache: Arc<SnapshotCache>,
    listeners: Arc<ListenerRegistry>,
}

impl MessageDispatcher {
    pub fn new(cache: Arc<SnapshotCache>, listeners: Arc<ListenerRegistry>) -> Self {
        Self { cache, listeners }
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Handle one text frame. Never fails: bad frames are logged and dropped
    /// without touching connection state.
    pub fn dispatch(&self, text: &str, subscribed: Option<&Symbol>) -> Dispatched {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                return Dispatched::Dropped;
            }
        };

        match frame {
            InboundFrame::OrderBook(msg) => self.on_orderbook(msg, subscribed),
            InboundFrame::Error(payload) => {
                tracing::warn!("Server error: {}", payload.error);
                self.listeners.emit(&FeedEvent::Error {
                    source: ErrorSource::Server,
                    error: payload.error,
                    symbol: payload.symbol,
                });
                Dispatched::ServerError
            }
            InboundFrame::Success(ack) => {
                tracing::debug!("Ack: {}", ack.message);
                self.listeners.emit(&FeedEvent::Ack(ack));
                Dispatched::Ack
            }
            InboundFrame::Heartbeat(hb) => {
                tracing::trace!("Heartbeat {:?}", hb.timestamp);
                Dispatched::Heartbeat
            }
            InboundFrame::Unknown { kind } => {
                tracing::warn!("Ignoring frame with unknown type {:?}", kind);
                Dispatched::Ignored
            }
        }
    }

    fn on_orderbook(&self, msg: OrderBookMessage, subscribed: Option<&Symbol>) -> Dispatched {
        let symbol = msg.data.symbol.clone();

        if let Some(outer) = &msg.symbol {
            if *outer != symbol {
                tracing::warn!(
                    "Dropping orderbook frame: envelope symbol {} != data symbol {}",
                    outer,
                    symbol
                );
                return Dispatched::Dropped;
            }
        }

        if let Err(e) = msg.data.validate() {
            tracing::warn!("Dropping invalid snapshot for {}: {}", symbol, e);
            return Dispatched::Dropped;
        }

        if subscribed != Some(&symbol) {
            tracing::debug!("Dropping snapshot for {}: not subscribed", symbol);
            return Dispatched::Dropped;
        }

        self.cache.insert(msg.data.clone());
        self.listeners.emit(&FeedEvent::OrderBook(msg));
        Dispatched::Snapshot(symbol)
    }
}
