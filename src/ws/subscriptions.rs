//! Subscription tracking: which symbol, at what depth, is current.

use crate::domain::orderbook::state::SnapshotCache;
use crate::error::WsError;
use crate::shared::Symbol;
use crate::ws::connection::ConnectionManager;
use crate::ws::{OutboundCommand, MAX_DEPTH};

/// The single active subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub symbol: Symbol,
    pub depth: u32,
}

/// Sole authority over the current [`Subscription`].
///
/// Commands are handed to the [`ConnectionManager`], which sends them now or
/// queues them for the next open. Symbols are passed through verbatim.
#[derive(Debug, Default)]
pub struct SubscriptionController {
    current: Option<Subscription>,
}

impl SubscriptionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Subscription> {
        self.current.as_ref()
    }

    pub fn is_current(&self, symbol: &str) -> bool {
        self.current.as_ref().is_some_and(|s| s.symbol == symbol)
    }

    /// Make `symbol` the current subscription.
    ///
    /// Switching away from another symbol first unsubscribes it and drops its
    /// cached snapshot. Subscribing again to the current symbol re-sends
    /// `subscribe` with the new depth.
    pub fn subscribe(
        &mut self,
        symbol: Symbol,
        depth: u32,
        conn: &mut ConnectionManager,
        cache: &SnapshotCache,
    ) -> Result<(), WsError> {
        if !(1..=MAX_DEPTH).contains(&depth) {
            return Err(WsError::InvalidDepth(depth));
        }

        if let Some(old) = self.current.take() {
            if old.symbol != symbol {
                tracing::debug!("Switching subscription {} -> {}", old.symbol, symbol);
                cache.remove(old.symbol.as_str());
                conn.send(OutboundCommand::unsubscribe(old.symbol));
            }
        }

        conn.send(OutboundCommand::subscribe(symbol.clone(), depth));
        self.current = Some(Subscription { symbol, depth });
        Ok(())
    }

    /// Unsubscribe `symbol` and drop its cached snapshot.
    pub fn unsubscribe(
        &mut self,
        symbol: Symbol,
        conn: &mut ConnectionManager,
        cache: &SnapshotCache,
    ) {
        cache.remove(symbol.as_str());
        if self.is_current(symbol.as_str()) {
            self.current = None;
        }
        conn.send(OutboundCommand::unsubscribe(symbol));
    }

    /// Forget the current subscription (connection lost or closed).
    ///
    /// Commands still waiting in `pending` go out on the next open, so the
    /// subscription they establish becomes current again.
    pub fn reset<'a>(&mut self, pending: impl IntoIterator<Item = &'a OutboundCommand>) {
        self.current = None;
        for command in pending {
            match command {
                OutboundCommand::Subscribe { symbol, levels } => {
                    self.current = Some(Subscription {
                        symbol: symbol.clone(),
                        depth: *levels,
                    });
                }
                OutboundCommand::Unsubscribe { symbol } => {
                    if self.is_current(symbol.as_str()) {
                        self.current = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orderbook::wire::OrderBookSnapshot;
    use crate::ws::transport::testing::RecordingTransport;
    use crate::ws::{StateCell, WsConfig};
    use serde_json::json;

    fn connected() -> (ConnectionManager, RecordingTransport) {
        let mut conn = ConnectionManager::new(WsConfig::default(), StateCell::new());
        conn.connect("token").unwrap();
        let transport = RecordingTransport::new();
        conn.on_open(Box::new(transport.clone()));
        (conn, transport)
    }

    fn cached(cache: &SnapshotCache, symbol: &str) {
        let snapshot: OrderBookSnapshot =
            serde_json::from_value(json!({"symbol": symbol, "bids": [], "asks": []})).unwrap();
        cache.insert(snapshot);
    }

    #[test]
    fn test_switch_while_connected_unsubscribes_first() {
        let (mut conn, transport) = connected();
        let cache = SnapshotCache::new();
        let mut subs = SubscriptionController::new();

        subs.subscribe("EUR/USD".into(), 5, &mut conn, &cache).unwrap();
        cached(&cache, "EUR/USD");
        subs.subscribe("GBP/USD".into(), 5, &mut conn, &cache).unwrap();

        assert_eq!(
            transport.sent(),
            vec![
                json!({"type": "subscribe", "symbol": "EUR/USD", "levels": 5}),
                json!({"type": "unsubscribe", "symbol": "EUR/USD"}),
                json!({"type": "subscribe", "symbol": "GBP/USD", "levels": 5}),
            ]
        );
        assert!(cache.get("EUR/USD").is_none());
        assert!(subs.is_current("GBP/USD"));
    }

    #[test]
    fn test_subscribe_while_disconnected_only_queues() {
        let mut conn = ConnectionManager::new(WsConfig::default(), StateCell::new());
        let cache = SnapshotCache::new();
        let mut subs = SubscriptionController::new();

        subs.subscribe("EUR/USD".into(), 5, &mut conn, &cache).unwrap();
        subs.subscribe("GBP/USD".into(), 3, &mut conn, &cache).unwrap();
        assert_eq!(conn.queued(), 3);

        conn.connect("token").unwrap();
        let transport = RecordingTransport::new();
        conn.on_open(Box::new(transport.clone()));
        assert_eq!(
            transport.sent(),
            vec![
                json!({"type": "subscribe", "symbol": "EUR/USD", "levels": 5}),
                json!({"type": "unsubscribe", "symbol": "EUR/USD"}),
                json!({"type": "subscribe", "symbol": "GBP/USD", "levels": 3}),
            ]
        );
    }

    #[test]
    fn test_resubscribe_same_symbol_changes_depth_without_unsubscribe() {
        let (mut conn, transport) = connected();
        let cache = SnapshotCache::new();
        let mut subs = SubscriptionController::new();

        subs.subscribe("EUR/USD".into(), 5, &mut conn, &cache).unwrap();
        cached(&cache, "EUR/USD");
        subs.subscribe("EUR/USD".into(), 2, &mut conn, &cache).unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], json!({"type": "subscribe", "symbol": "EUR/USD", "levels": 2}));
        assert!(cache.contains("EUR/USD"));
        assert_eq!(subs.current().map(|s| s.depth), Some(2));
    }

    #[test]
    fn test_symbols_are_case_sensitive() {
        let (mut conn, transport) = connected();
        let cache = SnapshotCache::new();
        let mut subs = SubscriptionController::new();

        subs.subscribe("eur/usd".into(), 5, &mut conn, &cache).unwrap();
        subs.subscribe("EUR/USD".into(), 5, &mut conn, &cache).unwrap();
        assert_eq!(transport.sent()[1], json!({"type": "unsubscribe", "symbol": "eur/usd"}));
    }

    #[test]
    fn test_unsubscribe_clears_only_matching_current() {
        let (mut conn, transport) = connected();
        let cache = SnapshotCache::new();
        let mut subs = SubscriptionController::new();

        subs.subscribe("EUR/USD".into(), 5, &mut conn, &cache).unwrap();
        cached(&cache, "EUR/USD");
        cached(&cache, "USD/JPY");

        subs.unsubscribe("USD/JPY".into(), &mut conn, &cache);
        assert!(subs.is_current("EUR/USD"));
        assert!(!cache.contains("USD/JPY"));

        subs.unsubscribe("EUR/USD".into(), &mut conn, &cache);
        assert!(subs.current().is_none());
        assert!(cache.is_empty());
        assert_eq!(transport.sent().len(), 3);
    }

    #[test]
    fn test_reset_keeps_subscription_still_queued() {
        let mut subs = SubscriptionController::new();
        subs.reset(&[] as &[OutboundCommand]);
        assert!(subs.current().is_none());

        subs.reset(&[
            OutboundCommand::unsubscribe("EUR/USD"),
            OutboundCommand::subscribe("GBP/USD", 3),
        ]);
        assert_eq!(
            subs.current(),
            Some(&Subscription {
                symbol: "GBP/USD".into(),
                depth: 3,
            })
        );

        subs.reset(&[
            OutboundCommand::subscribe("GBP/USD", 3),
            OutboundCommand::unsubscribe("GBP/USD"),
        ]);
        assert!(subs.current().is_none());
    }

    #[test]
    fn test_invalid_depth_rejected_without_side_effects() {
        let (mut conn, transport) = connected();
        let cache = SnapshotCache::new();
        let mut subs = SubscriptionController::new();

        assert_eq!(
            subs.subscribe("EUR/USD".into(), 0, &mut conn, &cache),
            Err(WsError::InvalidDepth(0))
        );
        assert_eq!(
            subs.subscribe("EUR/USD".into(), 6, &mut conn, &cache),
            Err(WsError::InvalidDepth(6))
        );
        assert!(transport.sent().is_empty());
        assert!(subs.current().is_none());
    }
}
