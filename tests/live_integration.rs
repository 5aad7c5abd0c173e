//! Tests against the public Mercado Bitcoin endpoints.
//!
//! All tests are `#[ignore]` because they require network access.
//!
//! Run with:
//! ```bash
//! cargo test --test live_integration -- --ignored
//! ```
//!
//! `MERCADO_API_URL`, `MERCADO_WS_URL`, and `MERCADO_SYMBOL` may be set in
//! the environment or a `.env` file.

use std::time::Duration;

use tokio::time::timeout;

use mercado_sdk::prelude::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(20);

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn live_client() -> MercadoClient {
    let _ = dotenvy::dotenv();
    MercadoClient::builder()
        .api_url(&env_or("MERCADO_API_URL", DEFAULT_API_URL))
        .ws_url(&env_or("MERCADO_WS_URL", DEFAULT_WS_URL))
        .build()
        .expect("client should build")
}

fn symbol() -> String {
    env_or("MERCADO_SYMBOL", "BTC-BRL")
}

#[tokio::test]
#[ignore]
async fn test_rest_orderbook_snapshot() {
    let client = live_client();
    let cancel = CancellationToken::new();

    let book = timeout(
        TEST_TIMEOUT,
        client.seed_orderbook(&symbol(), Some(20), &cancel),
    )
    .await
    .expect("timed out")
    .expect("snapshot should load");

    let bid = book.best_bid().expect("book has bids");
    let ask = book.best_ask().expect("book has asks");
    assert!(bid.price < ask.price, "crossed book: {:?} / {:?}", bid, ask);
}

#[tokio::test]
#[ignore]
async fn test_stream_ticker_and_tracked_book() {
    let client = live_client();
    let cancel = CancellationToken::new();

    timeout(TEST_TIMEOUT, client.stream().connect(&cancel))
        .await
        .expect("timed out")
        .expect("connect should succeed");

    let mut ticker = client
        .stream()
        .subscribe(Channel::Ticker, &symbol())
        .await
        .unwrap();
    let book = client.track_orderbook(&symbol(), &cancel).await.unwrap();

    let msg = timeout(TEST_TIMEOUT, ticker.recv(&cancel))
        .await
        .expect("timed out waiting for ticker")
        .expect("stream ended");
    assert_eq!(msg.channel(), Channel::Ticker);
    assert!(book.mid_price().is_some());

    client.stream().shutdown().await;
    assert_eq!(client.stream().state(), ConnectionState::Closed);
}
