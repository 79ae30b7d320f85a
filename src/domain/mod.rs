//! Domain modules organized as vertical slices.
//!
//! Each sub-module contains:
//! - `mod.rs`: Rich domain behaviour (validation, derived values)
//! - `wire.rs`: Raw serde structs matching the feed's frames
//! - `state.rs`: State containers updated by the WS layer

pub mod orderbook;
