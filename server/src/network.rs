//! Server network layer: accepts WebSocket connections and runs one session
//! per connection.

use crate::config::ServerConfig;
use crate::error::Result;
use crate::room::{RoomRegistry, SessionId};
use crate::session::Session;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::ServerMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the listening socket and the room registry all sessions share.
pub struct Server {
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!(
            "Server listening on {} (grid {}x{}, auth: {})",
            listener.local_addr()?,
            config.grid_size,
            config.grid_size,
            config.authenticator.name()
        );

        Ok(Server {
            listener,
            registry: Arc::new(RoomRegistry::new()),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept loop. Each connection gets its own task and session.
    pub async fn run(self) -> Result<()> {
        let mut next_session_id: SessionId = 1;

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let session_id = next_session_id;
            next_session_id += 1;

            let registry = Arc::clone(&self.registry);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                info!("Session {} connected from {}", session_id, addr);
                match handle_connection(stream, session_id, registry, config).await {
                    Ok(()) => info!("Session {} closed", session_id),
                    Err(e) => warn!("Session {} closed with error: {}", session_id, e),
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    session_id: SessionId,
    registry: Arc<RoomRegistry>,
    config: Arc<ServerConfig>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (ws_write, ws_read) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut writer = spawn_writer(session_id, ws_write, rx);
    let mut session = Session::new(session_id, tx, registry, config);

    let result = read_frames(&mut session, ws_read).await;

    // Close and error both end up here, exactly once per connection.
    session.destroy().await;

    // Once the session is gone nothing else holds its sender, so the writer
    // flushes what is queued and then closes the socket.
    drop(session);
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!("Session {} writer did not drain in time", session_id);
        writer.abort();
    }

    result
}

async fn read_frames(session: &mut Session, mut ws_read: WsSource) -> Result<()> {
    while let Some(frame) = ws_read.next().await {
        match frame? {
            Message::Text(text) => session.handle_text(&text).await,
            Message::Binary(_) => debug!("Session {} sent a binary frame, dropped", session.id()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// Drains a session's outbound queue into its socket.
fn spawn_writer(
    session_id: SessionId,
    mut ws_write: WsSink,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode message for session {}: {}", session_id, e);
                    continue;
                }
            };

            if let Err(e) = ws_write.send(Message::Text(text)).await {
                debug!("Session {} write failed: {}", session_id, e);
                return;
            }
        }

        if let Err(e) = ws_write.close().await {
            debug!("Session {} close failed: {}", session_id, e);
        }
    })
}
