//! Streaming status transport.
//!
//! The watcher talks to the stream through these traits so tests can script
//! connections; `WsConnector` is the WebSocket implementation.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::GuardError;

/// Keepalive sent while a stream is open.
pub const PING_MESSAGE: &str = r#"{"type":"ping"}"#;

pub type Connection = (Box<dyn StreamSender>, Box<dyn StreamReceiver>);

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Connection, GuardError>;
}

#[async_trait]
pub trait StreamSender: Send {
    async fn send_text(&mut self, text: String) -> Result<(), GuardError>;
    async fn close(&mut self);
}

#[async_trait]
pub trait StreamReceiver: Send {
    /// Next text message. `None` once the peer closed the stream.
    async fn recv(&mut self) -> Option<Result<String, GuardError>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, GuardError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GuardError::Transport(e.to_string()))?;
        log::debug!("Status stream connected to {}", url);

        let (sink, stream) = ws.split();
        Ok((Box::new(WsSender { sink }), Box::new(WsReceiver { stream })))
    }
}

struct WsSender {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl StreamSender for WsSender {
    async fn send_text(&mut self, text: String) -> Result<(), GuardError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| GuardError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            log::debug!("Closing status stream: {}", e);
        }
    }
}

struct WsReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl StreamReceiver for WsReceiver {
    async fn recv(&mut self) -> Option<Result<String, GuardError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => return None,
                // Protocol-level ping/pong and raw frames
                Ok(_) => continue,
                Err(e) => return Some(Err(GuardError::Transport(e.to_string()))),
            }
        }
    }
}
