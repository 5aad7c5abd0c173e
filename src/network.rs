//! Network URL constants for the Mercado Bitcoin API.

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "https://api.mercadobitcoin.net/api/v4";

/// Default WebSocket URL.
pub const DEFAULT_WS_URL: &str = "wss://ws.mercadobitcoin.net/ws";
