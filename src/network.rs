//! Network URL constants and endpoint construction.

use crate::error::WsError;

/// Default WebSocket base URL.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";

/// Path of the order book channel, relative to the base URL.
pub const ORDERBOOK_PATH: &str = "orderbook";

/// Build the order book channel endpoint: `{base}/orderbook?token={token}`.
///
/// The token is URL-encoded as given. A trailing `/` on `base` is ignored.
pub fn orderbook_endpoint(base: &str, token: &str) -> Result<String, WsError> {
    if token.trim().is_empty() {
        return Err(WsError::InvalidToken("Auth token cannot be empty".to_string()));
    }

    Ok(format!(
        "{}/{}?token={}",
        base.trim_end_matches('/'),
        ORDERBOOK_PATH,
        urlencoding::encode(token)
    ))
}
