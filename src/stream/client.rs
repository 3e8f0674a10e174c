//! Socket.IO websocket transport and the streaming session factory.
//!
//! [`SocketConnection`] performs the Engine.IO open handshake and the
//! namespace connect, answers server heartbeats, and tears the connection
//! down exactly once. [`StreamClient`] hands out one [`StreamingSession`] per
//! call.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::retry::{retry_async, with_timeout, RetryPolicy};
use crate::stream::packet::{EnginePacket, OpenInfo, PacketError, SocketPacket};
use crate::stream::proto::StreamingRequest;
use crate::stream::session::{SessionState, StreamSummary, StreamingSession};
use crate::stream::sink::TokenSink;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SOCKET_IO_PATH: &str = "socket.io/";
const ENGINE_IO_QUERY: &str = "EIO=4&transport=websocket";

/// Connection parameters for streaming sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Service origin; `http(s)` is mapped to `ws(s)`.
    pub base_url: String,
    pub namespace: String,
    /// Bound on each handshake attempt.
    pub connect_timeout: Duration,
    /// Attempt budget and backoff for the handshake.
    pub reconnect: RetryPolicy,
}

impl StreamConfig {
    /// Websocket URL of the Socket.IO endpoint.
    pub fn socket_url(&self) -> Result<String, StreamClientError> {
        socket_url(&self.base_url)
    }
}

/// Errors produced by the streaming transport and protocol.
#[derive(Debug, Error)]
pub enum StreamClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("namespace connect rejected: {0}")]
    Rejected(String),

    #[error("connection closed before the stream finished: {0}")]
    Disconnected(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("session is {0:?}; a session serves exactly one request")]
    InvalidState(SessionState),
}

impl StreamClientError {
    /// Whether another handshake attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WebSocket(_) | Self::Timeout(_) | Self::Disconnected(_) => true,
            Self::Json(_)
            | Self::Packet(_)
            | Self::InvalidEndpoint(_)
            | Self::Rejected(_)
            | Self::Server(_)
            | Self::InvalidState(_) => false,
        }
    }

    /// Transport-level failure, as opposed to a server-reported error or misuse.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_)
                | Self::Packet(_)
                | Self::Timeout(_)
                | Self::Rejected(_)
                | Self::Disconnected(_)
                | Self::InvalidEndpoint(_)
        )
    }
}

/// Builds the Engine.IO websocket URL for a service origin.
pub fn socket_url(base_url: &str) -> Result<String, StreamClientError> {
    let invalid = || StreamClientError::InvalidEndpoint(base_url.to_string());
    let mut url = Url::parse(base_url.trim()).map_err(|_| invalid())?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|_| invalid())?;

    let path = format!("{}/{SOCKET_IO_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(Some(ENGINE_IO_QUERY));
    Ok(url.to_string())
}

/// Inbound Socket.IO event on the session namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    pub name: String,
    pub args: Vec<Value>,
}

/// One open websocket carrying one Socket.IO namespace.
#[derive(Debug)]
pub struct SocketConnection {
    socket: WsStream,
    namespace: String,
    sid: Option<String>,
    heartbeat: Duration,
    closed: bool,
    // Set once the server has hung up; the namespace is already gone.
    peer_closed: bool,
}

impl SocketConnection {
    /// Connects and completes both handshakes.
    pub async fn open(url: &str, namespace: &str) -> Result<Self, StreamClientError> {
        let (mut socket, _) = connect_async(url).await?;
        let info = recv_open(&mut socket).await?;
        let heartbeat = Duration::from_millis(info.ping_interval.saturating_add(info.ping_timeout));

        let connect = SocketPacket::Connect {
            namespace: namespace.to_string(),
            data: None,
        };
        send_frame(&mut socket, connect.to_frame()?).await?;
        let sid = recv_connect_ack(&mut socket, namespace).await?;

        debug!(
            event = "socket_connected",
            namespace,
            engine_sid = %info.sid,
            heartbeat_ms = heartbeat.as_millis() as u64
        );

        Ok(Self {
            socket,
            namespace: namespace.to_string(),
            sid,
            heartbeat,
            closed: false,
            peer_closed: false,
        })
    }

    /// Socket.IO session id assigned by the server, if any.
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.peer_closed
    }

    /// Emits `name` with a single JSON argument on the session namespace.
    pub async fn emit(&mut self, name: &str, payload: Value) -> Result<(), StreamClientError> {
        if self.is_closed() {
            return Err(StreamClientError::Disconnected(
                "emit on a closed connection".to_string(),
            ));
        }
        let frame = SocketPacket::event(&self.namespace, name, payload).to_frame()?;
        send_frame(&mut self.socket, frame).await
    }

    /// Waits for the next event on the session namespace.
    ///
    /// Heartbeats are answered inline. Returns `Ok(None)` once the server
    /// closes the namespace or the socket.
    pub async fn next_event(&mut self) -> Result<Option<InboundFrame>, StreamClientError> {
        loop {
            if self.is_closed() {
                return Ok(None);
            }

            let next = match tokio::time::timeout(self.heartbeat, self.socket.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return Err(StreamClientError::Disconnected(format!(
                        "no server heartbeat within {:?}",
                        self.heartbeat
                    )));
                }
            };

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(payload))) => {
                    self.socket.send(Message::Pong(payload)).await?;
                    continue;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Binary(_))) => {
                    return Err(PacketError::BinaryUnsupported.into());
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.peer_closed = true;
                    return Ok(None);
                }
                Some(Err(err)) => return Err(err.into()),
            };

            match EnginePacket::decode(text.as_str())? {
                EnginePacket::Ping(body) => {
                    send_frame(&mut self.socket, EnginePacket::Pong(body).encode()?).await?;
                }
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Event {
                        namespace,
                        name,
                        args,
                        ..
                    } if namespace == self.namespace => {
                        return Ok(Some(InboundFrame { name, args }));
                    }
                    SocketPacket::Disconnect { namespace } if namespace == self.namespace => {
                        self.peer_closed = true;
                        return Ok(None);
                    }
                    _ => {}
                },
                EnginePacket::Close => {
                    self.peer_closed = true;
                    return Ok(None);
                }
                EnginePacket::Open(_)
                | EnginePacket::Pong(_)
                | EnginePacket::Upgrade
                | EnginePacket::Noop => {}
            }
        }
    }

    /// Leaves the namespace and closes the websocket. Safe to call repeatedly;
    /// only the first call touches the network.
    ///
    /// After the server has hung up only the websocket close handshake is
    /// finished, and a socket the peer already closed is not an error.
    pub async fn close(&mut self) -> Result<(), StreamClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let leave = if self.peer_closed {
            Ok(())
        } else {
            let disconnect = SocketPacket::Disconnect {
                namespace: self.namespace.clone(),
            };
            match send_frame(&mut self.socket, disconnect.to_frame()?).await {
                Err(StreamClientError::WebSocket(err)) if peer_already_closed(&err) => Ok(()),
                other => other,
            }
        };
        let close = match self.socket.close(None).await {
            Ok(()) => Ok(()),
            Err(err) if peer_already_closed(&err) => Ok(()),
            Err(err) => Err(StreamClientError::WebSocket(err)),
        };
        leave.and(close)
    }
}

fn peer_already_closed(err: &WsError) -> bool {
    matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::SendAfterClosing)
    )
}

/// Factory for streaming sessions sharing one read-only configuration.
#[derive(Clone, Debug)]
pub struct StreamClient {
    config: StreamConfig,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Creates an idle session for a single request.
    pub fn session(&self) -> StreamingSession {
        StreamingSession::new(self.config.clone())
    }

    /// Streams `request` into `sink` on a fresh session.
    pub async fn stream<K>(
        &self,
        request: &StreamingRequest,
        sink: &mut K,
    ) -> Result<StreamSummary, StreamClientError>
    where
        K: TokenSink + Send,
    {
        self.session().send(request, sink).await
    }

    /// Streams `request` to stdout on a fresh session.
    pub async fn stream_to_console(
        &self,
        request: &StreamingRequest,
    ) -> Result<StreamSummary, StreamClientError> {
        self.session().send_to_console(request).await
    }
}

/// Opens a connection within the configured timeout and attempt budget.
pub(crate) async fn connect_with_budget(
    config: &StreamConfig,
) -> Result<SocketConnection, StreamClientError> {
    let url = config.socket_url()?;
    let timeout = config.connect_timeout;

    retry_async(
        &config.reconnect,
        |attempt| {
            let url = url.clone();
            async move {
                debug!(event = "socket_connect_attempt", attempt, url = %url);
                match with_timeout(timeout, SocketConnection::open(&url, &config.namespace)).await {
                    Ok(result) => result,
                    Err(_) => Err(StreamClientError::Timeout(timeout)),
                }
            }
        },
        StreamClientError::is_retryable,
    )
    .await
}

async fn send_frame(socket: &mut WsStream, frame: String) -> Result<(), StreamClientError> {
    socket.send(Message::Text(frame.into())).await?;
    Ok(())
}

async fn recv_text(socket: &mut WsStream, stage: &str) -> Result<String, StreamClientError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_string()),
            Some(Ok(Message::Ping(payload))) => {
                socket.send(Message::Pong(payload)).await?;
            }
            Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Binary(_))) => {
                return Err(StreamClientError::Disconnected(format!(
                    "received binary frame before {stage}"
                )));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(StreamClientError::Disconnected(format!(
                    "socket closed before {stage}"
                )));
            }
            Some(Err(err)) => return Err(StreamClientError::WebSocket(err)),
        }
    }
}

async fn recv_open(socket: &mut WsStream) -> Result<OpenInfo, StreamClientError> {
    loop {
        match EnginePacket::decode(&recv_text(socket, "engine.io open").await?)? {
            EnginePacket::Open(info) => return Ok(info),
            EnginePacket::Ping(body) => {
                send_frame(socket, EnginePacket::Pong(body).encode()?).await?;
            }
            EnginePacket::Close => {
                return Err(StreamClientError::Disconnected(
                    "server closed before engine.io open".to_string(),
                ));
            }
            _ => {}
        }
    }
}

async fn recv_connect_ack(
    socket: &mut WsStream,
    namespace: &str,
) -> Result<Option<String>, StreamClientError> {
    loop {
        match EnginePacket::decode(&recv_text(socket, "namespace connect").await?)? {
            EnginePacket::Ping(body) => {
                send_frame(socket, EnginePacket::Pong(body).encode()?).await?;
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect {
                    namespace: acked,
                    data,
                } if acked == namespace => {
                    let sid = data
                        .as_ref()
                        .and_then(|data| data.get("sid"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Ok(sid);
                }
                SocketPacket::ConnectError {
                    namespace: rejected,
                    data,
                } if rejected == namespace => {
                    let reason = data
                        .as_ref()
                        .and_then(|data| data.get("message").and_then(Value::as_str))
                        .map(str::to_string)
                        .or_else(|| data.as_ref().map(Value::to_string))
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Err(StreamClientError::Rejected(reason));
                }
                _ => {}
            },
            EnginePacket::Close => {
                return Err(StreamClientError::Disconnected(
                    "server closed before namespace connect".to_string(),
                ));
            }
            _ => {}
        }
    }
}
