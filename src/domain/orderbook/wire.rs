//! Wire types for order book frames.

use crate::shared::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Full order book snapshot, the `data` field of an `orderbook` frame.
///
/// The feed only ever sends complete snapshots: each one replaces the previous
/// view of the instrument wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    /// Market data timestamp, verbatim as sent by the server.
    #[serde(default, rename = "timestamp")]
    pub server_timestamp: Option<String>,
    #[serde(default)]
    pub tick_id: Option<String>,
    #[serde(default)]
    pub is_indicative: bool,

    #[serde(default)]
    pub best_bid: Option<Decimal>,
    #[serde(default)]
    pub best_ask: Option<Decimal>,
    #[serde(default)]
    pub mid_price: Option<Decimal>,
    #[serde(default)]
    pub spread: Option<Decimal>,
    #[serde(default)]
    pub spread_bps: Option<Decimal>,

    /// Bid levels, best (highest) price first.
    #[serde(default, rename = "bids")]
    pub bid_levels: Vec<BookLevel>,
    /// Ask levels, best (lowest) price first.
    #[serde(default, rename = "asks")]
    pub ask_levels: Vec<BookLevel>,

    #[serde(default, rename = "latest_price")]
    pub latest_trade: Option<LatestTrade>,
    #[serde(default, rename = "levels")]
    pub counts: Option<LevelCounts>,
    #[serde(default, rename = "metadata")]
    pub meta: Option<BookMeta>,
}

/// A single price level. `level` is 1-based, 1 = best.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestTrade {
    pub price: Decimal,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelCounts {
    #[serde(default, alias = "bids")]
    pub bid_levels: u32,
    #[serde(default, alias = "asks")]
    pub ask_levels: u32,
    #[serde(default, alias = "trades")]
    pub trade_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookMeta {
    #[serde(default)]
    pub total_entries: u32,
    #[serde(default)]
    pub has_trades: bool,
    #[serde(default)]
    pub book_depth: u32,
}
