//! Domain modules organized as vertical slices.
//!
//! - `orderbook` — the order book engine: state, shared handle, registry, wire
//!   payloads and their conversion into engine updates
//! - `ticker`, `trade` — typed stream payloads delivered to subscribers

pub mod orderbook;
pub mod ticker;
pub mod trade;
