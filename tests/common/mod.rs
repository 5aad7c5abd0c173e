//! Scripted in-memory transport for driving `StreamingClient` in tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mercado_sdk::error::{WsError, WsResult};
use mercado_sdk::ws::{
    ConnectionState, FrameSink, FrameStream, StreamingClient, Transport, TransportFrame, WsConfig,
};

/// A frame the client sent, tagged with the connection it went out on.
#[derive(Debug, Clone)]
pub struct Sent {
    pub connection: u32,
    pub frame: Value,
}

#[derive(Default)]
struct MockState {
    connects: AtomicU32,
    fail_remaining: AtomicU32,
    mute_pongs: AtomicBool,
    sent: Mutex<Vec<Sent>>,
    closes: AtomicU32,
    connect_delay: Mutex<Duration>,
    server: Mutex<Option<mpsc::UnboundedSender<TransportFrame>>>,
}

/// Transport whose "server" is driven from the test body.
///
/// Pings are answered with a pong unless [`mute_pongs`](Self::mute_pongs)
/// is set.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connect calls.
    pub fn fail_next(&self, n: u32) {
        self.state.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Hold every later connect call for `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    pub fn mute_pongs(&self, mute: bool) {
        self.state.mute_pongs.store(mute, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Deliver a text frame on the current connection.
    pub fn push(&self, text: &str) {
        if let Some(tx) = self.state.server.lock().as_ref() {
            let _ = tx.send(TransportFrame::Text(text.to_string()));
        }
    }

    /// Close the current connection from the server side.
    pub fn server_close(&self) {
        if let Some(tx) = self.state.server.lock().take() {
            let _ = tx.send(TransportFrame::Close {
                code: Some(1001),
                reason: "going away".into(),
            });
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.sent.lock().clone()
    }

    /// Sent frames whose `type` is `kind`.
    pub fn sent_of(&self, kind: &str) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.frame["type"] == kind)
            .collect()
    }

    /// `(name, id)` of every subscribe sent on `connection`.
    pub fn subscribed_on(&self, connection: u32) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self
            .sent_of("subscribe")
            .into_iter()
            .filter(|s| s.connection == connection)
            .map(|s| {
                let sub = &s.frame["subscription"];
                (
                    sub["name"].as_str().unwrap_or_default().to_string(),
                    sub["id"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _url: &str,
        _cancel: &CancellationToken,
    ) -> WsResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let connection = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .state
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WsError::ConnectionFailed("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.server.lock() = Some(tx.clone());
        let sink = MockSink {
            state: Arc::clone(&self.state),
            connection,
            loopback: tx,
        };
        Ok((Box::new(sink), Box::new(MockStream { rx })))
    }
}

struct MockSink {
    state: Arc<MockState>,
    connection: u32,
    loopback: mpsc::UnboundedSender<TransportFrame>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, text: String) -> WsResult<()> {
        let frame: Value =
            serde_json::from_str(&text).map_err(|e| WsError::Protocol(e.to_string()))?;
        let is_ping = frame["type"] == "ping";
        self.state.sent.lock().push(Sent {
            connection: self.connection,
            frame,
        });
        if is_ping && !self.state.mute_pongs.load(Ordering::SeqCst) {
            let _ = self
                .loopback
                .send(TransportFrame::Text(r#"{"type":"pong"}"#.into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> WsResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<TransportFrame>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<WsResult<TransportFrame>> {
        self.rx.recv().await.map(Ok)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_secs(5);

/// Fast reconnects, no jitter, keep-alive effectively off.
pub fn test_config() -> WsConfig {
    WsConfig::new("ws://mock")
        .with_reconnect_delay(Duration::from_millis(10), Duration::from_millis(40))
        .with_reconnect_jitter(0.0)
        .with_ping_interval(Duration::from_secs(3600), Duration::from_secs(3600))
}

pub fn client_with(config: WsConfig) -> (StreamingClient, MockTransport) {
    let transport = MockTransport::new();
    let client = StreamingClient::new(config, Arc::new(transport.clone()));
    (client, transport)
}

/// Poll until `check` holds or [`WAIT`] elapses.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_state(client: &StreamingClient, state: ConnectionState) {
    eventually(&format!("state {}", state), || client.state() == state).await;
}

pub fn ticker_frame(market: &str, last: &str) -> String {
    format!(
        r#"{{"type":"ticker","id":"{}","ts":1700000000000,"data":{{"last":"{}","buy":"{}","sell":"{}"}}}}"#,
        market, last, last, last
    )
}

pub fn trade_frame(market: &str, tid: u64) -> String {
    format!(
        r#"{{"type":"trade","id":"{}","ts":1700000000000,"data":{{"tid":{},"type":"sell","price":"100000","amount":"0.5"}}}}"#,
        market, tid
    )
}
