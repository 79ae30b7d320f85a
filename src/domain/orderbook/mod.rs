//! Order book domain: snapshot validation, derived prices, timestamps.

pub mod state;
pub mod wire;

pub use state::SnapshotCache;
pub use wire::{BookLevel, BookMeta, LatestTrade, LevelCounts, OrderBookSnapshot};

use crate::shared::Symbol;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Naive timestamp layouts the feed is known to emit, all interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y%m%d-%H:%M:%S%.f",
];

impl OrderBookSnapshot {
    /// Best bid: the explicit field, else the first bid level.
    pub fn top_bid(&self) -> Option<Decimal> {
        self.best_bid
            .or_else(|| self.bid_levels.first().map(|level| level.price))
    }

    /// Best ask: the explicit field, else the first ask level.
    pub fn top_ask(&self) -> Option<Decimal> {
        self.best_ask
            .or_else(|| self.ask_levels.first().map(|level| level.price))
    }

    /// Mid price as sent, or computed from the top of book.
    pub fn mid(&self) -> Option<Decimal> {
        self.mid_price.or_else(|| match (self.top_bid(), self.top_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        })
    }

    /// Spread between best ask and best bid, as sent or computed.
    pub fn effective_spread(&self) -> Option<Decimal> {
        self.spread.or_else(|| match (self.top_bid(), self.top_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        })
    }

    /// Server timestamp parsed as UTC, if present and in a known layout.
    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        self.server_timestamp
            .as_deref()
            .and_then(parse_server_timestamp)
    }

    /// Check the structural invariants of a snapshot:
    /// non-empty symbol, bids descending, asks ascending, bid below ask.
    pub fn validate(&self) -> Result<(), OrderBookValidationError> {
        let mut errors = Vec::new();

        if self.symbol.is_empty() {
            errors.push(OrderBookValidationError::EmptySymbol);
        }
        if !self
            .bid_levels
            .windows(2)
            .all(|pair| pair[0].price >= pair[1].price)
        {
            errors.push(OrderBookValidationError::BidsNotDescending);
        }
        if !self
            .ask_levels
            .windows(2)
            .all(|pair| pair[0].price <= pair[1].price)
        {
            errors.push(OrderBookValidationError::AsksNotAscending);
        }
        if let (Some(bid), Some(ask)) = (self.top_bid(), self.top_ask()) {
            if bid >= ask {
                errors.push(OrderBookValidationError::CrossedBook { bid, ask });
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(OrderBookValidationError::Multiple(
                self.symbol.clone(),
                errors,
            )),
        }
    }
}

/// Parse a feed timestamp: RFC 3339, or one of the naive UTC layouts.
pub fn parse_server_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

// ─── Validation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum OrderBookValidationError {
    Multiple(Symbol, Vec<OrderBookValidationError>),
    EmptySymbol,
    BidsNotDescending,
    AsksNotAscending,
    CrossedBook { bid: Decimal, ask: Decimal },
}

impl fmt::Display for OrderBookValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBookValidationError::Multiple(symbol, errors) => {
                writeln!(f, "OrderBook validation errors ({symbol}):")?;
                for err in errors {
                    writeln!(f, "  - {}", err)?;
                }
                Ok(())
            }
            OrderBookValidationError::EmptySymbol => write!(f, "Symbol is empty"),
            OrderBookValidationError::BidsNotDescending => {
                write!(f, "Bid levels are not sorted by descending price")
            }
            OrderBookValidationError::AsksNotAscending => {
                write!(f, "Ask levels are not sorted by ascending price")
            }
            OrderBookValidationError::CrossedBook { bid, ask } => {
                write!(f, "Crossed book: best bid {bid} >= best ask {ask}")
            }
        }
    }
}

impl std::error::Error for OrderBookValidationError {}
