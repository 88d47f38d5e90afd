//! WebSocket transport speaking the JSON hub protocol.

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use serene_shared::protocol::{HandshakeRequest, HandshakeResponse};
use serene_shared::{FrameDecoder, HubMessage, ProtocolError};

use crate::config::HubConfig;
use crate::error::{NetError, Result};
use crate::negotiate::{negotiate, HubEndpoint};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open, handshaken hub connection.
pub struct HubConnection {
    ws: WsStream,
    decoder: FrameDecoder,
}

impl HubConnection {
    /// Negotiate (unless disabled), open the websocket and complete the
    /// protocol handshake, all within `config.handshake_timeout`.
    pub async fn connect(
        http: &reqwest::Client,
        endpoint: &HubEndpoint,
        config: &HubConfig,
    ) -> Result<Self> {
        timeout(config.handshake_timeout, Self::establish(http, endpoint, config))
            .await
            .map_err(|_| NetError::Timeout)?
    }

    async fn establish(
        http: &reqwest::Client,
        endpoint: &HubEndpoint,
        config: &HubConfig,
    ) -> Result<Self> {
        let ws_url = if config.skip_negotiation {
            endpoint.websocket_url(None, None)?
        } else {
            negotiate(http, endpoint).await?.websocket_url()?
        };
        Self::open(ws_url).await
    }

    async fn open(ws_url: Url) -> Result<Self> {
        debug!(url = %ws_url, "Opening hub websocket");
        let (mut ws, _response) = connect_async(ws_url.as_str()).await?;

        let handshake = HandshakeRequest::json().to_record()?;
        ws.send(Message::Text(handshake)).await?;

        let mut decoder = FrameDecoder::new();
        loop {
            if let Some(record) = decoder.next_record() {
                HandshakeResponse::parse(&record)?.into_result()?;
                break;
            }

            match ws.next().await {
                Some(Ok(Message::Text(text))) => decoder.push(&text),
                Some(Ok(Message::Close(frame))) => {
                    return Err(NetError::ConnectionLost(format!(
                        "hub closed the socket during handshake: {frame:?}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(NetError::ConnectionLost(
                        "hub closed the socket during handshake".into(),
                    ));
                }
            }
        }

        debug!("Hub handshake completed");
        Ok(Self { ws, decoder })
    }

    pub async fn send(&mut self, message: &HubMessage) -> Result<()> {
        let record = message.to_record()?;
        self.ws.send(Message::Text(record)).await?;
        Ok(())
    }

    /// Wait for the next batch of hub messages.
    ///
    /// Cancel-safe: buffered records stay in the decoder until returned.
    pub async fn recv(&mut self) -> Result<Vec<HubMessage>> {
        loop {
            let mut messages = Vec::new();
            while let Some(record) = self.decoder.next_record() {
                if record.trim().is_empty() {
                    continue;
                }
                match HubMessage::parse(&record) {
                    Ok(message) => messages.push(message),
                    Err(ProtocolError::UnsupportedType(kind)) => {
                        debug!(kind, "Ignoring unsupported hub message");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if !messages.is_empty() {
                return Ok(messages);
            }

            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => self.decoder.push(&text),
                Some(Ok(Message::Binary(data))) => {
                    debug!(len = data.len(), "Ignoring binary frame on json hub protocol");
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(NetError::ConnectionLost(format!(
                        "websocket closed: {frame:?}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(NetError::ConnectionLost("websocket stream ended".into())),
            }
        }
    }

    /// Close the websocket; errors are irrelevant at this point.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "Error while closing hub websocket");
        }
    }
}
