use super::{ConnectRequest, Connection, Connector, FrameSink, FrameSource};
use crate::api::ApiClientError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn map_ws_error(e: WsError) -> ApiClientError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ApiClientError::ConnectionClosed,
        other => ApiClientError::Connectivity(format!("Websocket error {}", other)),
    }
}

/// Connects over tokio-tungstenite, TLS through native-tls
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Connection, ApiClientError> {
        let mut upgrade = request
            .uri
            .as_str()
            .into_client_request()
            .map_err(|e| ApiClientError::Connection(e.to_string()))?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiClientError::Connection(format!("Invalid header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiClientError::Connection(format!("Invalid header value: {}", e)))?;
            upgrade.headers_mut().insert(name, value);
        }

        let (stream, response) = connect_async(upgrade)
            .await
            .map_err(|e| ApiClientError::Connection(format!("Failed to connect to websocket: {}", e)))?;
        log::debug!("Websocket upgrade response: {}", response.status());

        let (sink, source) = stream.split();
        Ok(Connection {
            sink: Box::new(TungsteniteSink { inner: sink }),
            source: Box::new(TungsteniteSource { inner: source }),
        })
    }
}

struct TungsteniteSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send_text(&mut self, text: String) -> Result<(), ApiClientError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), ApiClientError> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

struct TungsteniteSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for TungsteniteSource {
    async fn next_frame(&mut self) -> Option<Result<String, ApiClientError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes)
                            .map_err(|e| ApiClientError::MalformedEvent(e.to_string())),
                    )
                }
                Ok(Message::Close(frame)) => {
                    log::info!("Websocket closed by server: {:?}", frame);
                    return None;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(map_ws_error(e))),
            }
        }
    }
}
