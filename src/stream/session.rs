//! Single-request streaming session.
//!
//! A session walks `Idle → Connecting → Open → Closing → Closed` exactly once.
//! It emits the request payload as soon as the namespace handshake completes,
//! forwards every decoded event to the callback adapter in arrival order, and
//! tears the connection down on every exit path. `Closed` is terminal.

use tracing::{debug, warn};

use crate::stream::client::{
    connect_with_budget, SocketConnection, StreamClientError, StreamConfig,
};
use crate::stream::proto::{
    build_payload, decode_event, InboundEvent, StreamingRequest, SEND_MESSAGE_EVENT,
};
use crate::stream::sink::{CallbackAdapter, TokenSink};

/// Where a [`StreamingSession`] is in its single pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet.
    Idle,
    /// Handshaking, possibly retrying within the reconnection budget.
    Connecting,
    /// Namespace joined and the payload emitted; tokens are flowing.
    Open,
    /// Tearing the connection down.
    Closing,
    /// Terminal. The session refuses further requests.
    Closed,
}

/// Outcome of a stream that reached its finished token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    /// Events handed to the sink, including the terminal one.
    pub events_delivered: usize,
    /// Deliveries where the sink returned an error or panicked.
    pub sink_failures: usize,
}

/// One request over one connection. Build it with
/// [`StreamClient::session`](crate::stream::client::StreamClient::session).
#[derive(Debug)]
pub struct StreamingSession {
    config: StreamConfig,
    state: SessionState,
    connection: Option<SocketConnection>,
    teardowns: usize,
}

impl StreamingSession {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            connection: None,
            teardowns: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Service base url the session connects to.
    pub fn endpoint(&self) -> &str {
        &self.config.base_url
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Whether a connection is held and neither side has closed it.
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.is_closed())
    }

    /// Number of times a live connection was actually torn down (0 or 1).
    pub fn teardowns(&self) -> usize {
        self.teardowns
    }

    /// Sends `request` and delivers the response stream to `sink`.
    ///
    /// Resolves after the terminal event and the connection teardown. A
    /// server `error` event reaches the sink as `("Error: …", true)` and is
    /// also returned as [`StreamClientError::Server`].
    pub async fn send<K>(
        &mut self,
        request: &StreamingRequest,
        sink: &mut K,
    ) -> Result<StreamSummary, StreamClientError>
    where
        K: TokenSink + Send,
    {
        self.run(request, CallbackAdapter::with_sink(sink)).await
    }

    /// Like [`send`](Self::send), echoing tokens to stdout.
    pub async fn send_to_console(
        &mut self,
        request: &StreamingRequest,
    ) -> Result<StreamSummary, StreamClientError> {
        self.run(request, CallbackAdapter::console()).await
    }

    /// Tears the connection down and enters `Closed`. Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closing);

        if let Some(mut connection) = self.connection.take() {
            if let Err(err) = connection.close().await {
                warn!(event = "session_teardown_failed", error = %err);
            }
            self.teardowns += 1;
        }

        self.transition(SessionState::Closed);
    }

    async fn run(
        &mut self,
        request: &StreamingRequest,
        mut adapter: CallbackAdapter<'_>,
    ) -> Result<StreamSummary, StreamClientError> {
        if self.state != SessionState::Idle {
            return Err(StreamClientError::InvalidState(self.state));
        }

        let payload = match build_payload(request).to_value() {
            Ok(payload) => payload,
            Err(err) => {
                self.close().await;
                return Err(err.into());
            }
        };

        self.transition(SessionState::Connecting);
        match connect_with_budget(&self.config).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.transition(SessionState::Open);
            }
            Err(err) => {
                self.close().await;
                return Err(err);
            }
        }

        let result = self.drive(payload, &mut adapter).await;
        self.close().await;

        debug!(
            event = "session_finished",
            delivered = adapter.delivered(),
            sink_failures = adapter.failures(),
            ok = result.is_ok()
        );
        result.map(|()| StreamSummary {
            events_delivered: adapter.delivered(),
            sink_failures: adapter.failures(),
        })
    }

    async fn drive(
        &mut self,
        payload: serde_json::Value,
        adapter: &mut CallbackAdapter<'_>,
    ) -> Result<(), StreamClientError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(StreamClientError::Disconnected(
                "session has no connection".to_string(),
            ));
        };

        connection.emit(SEND_MESSAGE_EVENT, payload).await?;
        debug!(event = "request_emitted", namespace = %self.config.namespace);

        loop {
            let Some(frame) = connection.next_event().await? else {
                return Err(StreamClientError::Disconnected(
                    "server closed the stream before a terminal event".to_string(),
                ));
            };
            let Some(event) = decode_event(&frame.name, &frame.args) else {
                debug!(event = "event_ignored", channel = %frame.name);
                continue;
            };

            adapter.deliver(&event);

            match event {
                InboundEvent::Token(token) if token.finished => return Ok(()),
                InboundEvent::Token(_) => {}
                InboundEvent::Error(error) => {
                    return Err(StreamClientError::Server(error.message));
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!(event = "session_state", from = ?self.state, to = ?next);
        self.state = next;
    }
}
