//! Feed transport seam
//!
//! The connector only needs "open a URL, get a stream of frames". Production
//! uses tokio-tungstenite; tests plug in scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Feed I/O error: {0}")]
    Io(String),

    #[error("Feed operation timed out after {0:?}")]
    Timeout(Duration),
}

/// One inbound frame, reduced to what the connector acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    Text(String),
    /// Close frame, with the peer's reason if any
    Close(Option<String>),
    /// Binary, ping, pong
    Other,
}

pub type FeedStream = BoxStream<'static, Result<FeedFrame, TransportError>>;

#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FeedStream, TransportError>;
}

/// WebSocket transport. Pings are answered by tungstenite while reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<FeedStream, TransportError> {
        let (socket, _response) =
            connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(socket.map(frame_from_message).boxed())
    }
}

fn frame_from_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Result<FeedFrame, TransportError> {
    match message {
        Ok(Message::Text(text)) => Ok(FeedFrame::Text(text)),
        Ok(Message::Close(frame)) => Ok(FeedFrame::Close(
            frame.map(|f| f.reason.into_owned()).filter(|r| !r.is_empty()),
        )),
        Ok(_) => Ok(FeedFrame::Other),
        Err(e) => Err(TransportError::Io(e.to_string())),
    }
}
