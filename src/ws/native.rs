//! Native WebSocket transport — `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::{WsError, WsResult};
use crate::ws::transport::{FrameSink, FrameStream, Transport, TransportFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> WsResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let (ws_stream, _) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WsError::Cancelled),
            result = connect_async(url) => result?,
        };
        tracing::debug!(url, "WebSocket handshake complete");

        let (sink, stream) = ws_stream.split();
        Ok((Box::new(NativeSink { sink }), Box::new(NativeStream { stream })))
    }
}

struct NativeSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for NativeSink {
    async fn send(&mut self, text: String) -> WsResult<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> WsResult<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Client disconnect".into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        self.sink.close().await?;
        Ok(())
    }
}

struct NativeStream {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for NativeStream {
    async fn next_frame(&mut self) -> Option<WsResult<TransportFrame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(TransportFrame::Text(text.to_string()))),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = extract_close(frame.as_ref());
                    return Some(Ok(TransportFrame::Close { code, reason }));
                }
                // Protocol pings are answered by tungstenite; binary is unused.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

fn extract_close(frame: Option<&CloseFrame>) -> (Option<u16>, String) {
    match frame {
        Some(f) => (Some(f.code.into()), f.reason.to_string()),
        None => (None, "No close frame".into()),
    }
}
