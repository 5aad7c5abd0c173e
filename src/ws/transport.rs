//! Transport abstraction — the socket the streaming client drives.

use crate::error::WsResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A frame surfaced by a transport. Control frames other than close are
/// handled inside the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Close { code: Option<u16>, reason: String },
}

/// Opens connections. One call per handshake; the returned halves are owned
/// by a single connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> WsResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, text: String) -> WsResult<()>;

    /// Graceful close handshake.
    async fn close(&mut self) -> WsResult<()>;
}

/// Read half of a connection. `None` means the stream ended.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<WsResult<TransportFrame>>;
}
