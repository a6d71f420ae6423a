//! WebSocket [`Connector`] and [`Link`] over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::connection::{Connector, Established, Link};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials the coordinator over WebSocket and waits for `connectionEstablished`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: Url,
}

impl WsConnector {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Established> {
        info!(endpoint = %self.endpoint, "connecting to coordinator");
        let (socket, _) = connect_async(self.endpoint.as_str()).await?;
        let mut link = WsLink { socket };

        // The coordinator announces the connection id before anything else
        match link.recv().await {
            Some(Ok(ServerMessage::ConnectionEstablished { id })) => {
                debug!(%id, "handshake complete");
                Ok(Established {
                    id,
                    link: Box::new(link),
                })
            }
            Some(Ok(other)) => Err(Error::ConnectionFailed(format!(
                "expected connectionEstablished, got {}",
                other.kind()
            ))),
            Some(Err(err)) => Err(err),
            None => Err(Error::ConnectionFailed("closed during handshake".to_string())),
        }
    }
}

/// JSON text frames over one WebSocket.
pub struct WsLink {
    socket: Socket,
}

#[async_trait]
impl Link for WsLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(Error::from));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "close frame received");
                    return None;
                }
                // Ping replies are queued by tungstenite itself
                Ok(Message::Binary(_))
                | Ok(Message::Ping(_))
                | Ok(Message::Pong(_))
                | Ok(Message::Frame(_)) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}
