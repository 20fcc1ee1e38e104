//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use super::{Connector, Inbound, Transport};
use crate::errors::ClientError;

/// Connects to the daemon's `/ws-rpc` WebSocket endpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Transport, ClientError> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(format!("connect {url}: {e}")))?;
        debug!(url, status = %response.status(), "websocket upgraded");

        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(|e| ClientError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, ClientError>(Message::Text(text.into()))));
        let stream = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| future::ready(inbound(msg)));

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Map one WebSocket message to a transport item; `None` skips it.
///
/// Only transport failures surface as errors. A frame that cannot carry JSON
/// text is logged and skipped so it never takes the link down.
fn inbound(msg: Result<Message, tungstenite::Error>) -> Option<Result<Inbound, ClientError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Ok(Inbound::Text(text))),
            Err(_) => {
                warn!(len = bytes.len(), "dropping binary frame that is not UTF-8");
                None
            }
        },
        // tungstenite answers pings itself; both directions prove liveness
        Ok(Message::Ping(_) | Message::Pong(_)) => Some(Ok(Inbound::Heartbeat)),
        Ok(Message::Close(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(ClientError::Transport(e.to_string()))),
    }
}
