//! WebSocket connection to a room server.

use futures_util::{SinkExt, StreamExt};
use log::debug;
use shared::{ClientMessage, JoinPayload, ProtocolError, ServerMessage};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed")]
    ConnectionClosed,
}

pub struct Connection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connection {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url).await?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.stream.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    pub async fn join(&mut self, space_id: Option<&str>, token: Option<&str>) -> Result<()> {
        self.send(&ClientMessage::Join(JoinPayload {
            space_id: space_id.map(str::to_string),
            token: token.map(str::to_string),
        }))
        .await
    }

    /// Next server message. Frames that are not server messages are skipped.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => match ServerMessage::parse(&text) {
                    Ok(message) => return Ok(message),
                    Err(e) => debug!("Ignoring unparseable frame: {}", e),
                },
                Message::Close(_) => return Err(ClientError::ConnectionClosed),
                _ => {}
            }
        }
        Err(ClientError::ConnectionClosed)
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}
