//! WebSocket text-frame client.
//!
//! [`connect`] opens one socket and splits it into a [`WsSender`] and a
//! [`WsReceiver`]. There is no reconnection here: the caller owns the retry
//! policy and simply connects again.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace};

use abot_core::{TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Writing half of a socket.
pub struct WsSender {
    sink: WsSink,
}

impl WsSender {
    /// Sends one text frame.
    pub async fn send_text(&mut self, text: impl Into<String>) -> TransportResult<()> {
        let text = text.into();
        trace!(len = text.len(), "Sending text frame");
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Reading half of a socket.
pub struct WsReceiver {
    source: WsSource,
}

impl WsReceiver {
    /// Waits for the next text frame.
    ///
    /// Control and binary frames are skipped. Returns `None` once the server
    /// closed the socket.
    pub async fn next_text(&mut self) -> TransportResult<Option<String>> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    debug!(len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    trace!("Control frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Server closed connection");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    return Err(TransportError::ConnectionClosed {
                        reason: e.to_string(),
                    });
                }
                None => return Ok(None),
            }
        }
    }
}

/// Opens a WebSocket connection to `url`.
pub async fn connect(url: &str) -> TransportResult<(WsSender, WsReceiver)> {
    debug!(url = %redact(url), "Connecting to WebSocket server");
    let (stream, _response) =
        connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: redact(url),
                reason: format!("WebSocket connection failed: {e}"),
            })?;
    info!(url = %redact(url), "WebSocket connected");

    let (sink, source) = stream.split();
    Ok((WsSender { sink }, WsReceiver { source }))
}

/// Strips the query string, which may carry credentials.
fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?…"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_redacted() {
        assert_eq!(
            redact("wss://ws.example/ws/?access_token=secret"),
            "wss://ws.example/ws/?…"
        );
        assert_eq!(redact("ws://127.0.0.1:1/"), "ws://127.0.0.1:1/");
    }
}
