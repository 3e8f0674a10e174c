use std::path::Path;

use thiserror::Error;

use crate::chat_api::{
    ApiError, ApiResponse, AudioTranscriptionOutput, AvailableLlmsOutput, AvailableModelsOutput,
    AvailablePromptsOutput, ChatApiClient, MessageRequest, RequestOutput, StatusOutput,
};
use crate::config::{ClientConfig, ConfigError};
use crate::stream::client::{StreamClient, StreamClientError};
use crate::stream::proto::StreamingRequest;
use crate::stream::session::{StreamSummary, StreamingSession};
use crate::stream::sink::TokenSink;

#[derive(Debug, Error)]
pub enum ClientInitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Entry point for the LLM streaming service.
///
/// Holds one read-only configuration. REST calls share a pooled HTTP
/// client; every streaming call opens and closes its own session, so
/// concurrent calls never share connection state.
#[derive(Clone, Debug)]
pub struct LlmStreamingClient {
    config: ClientConfig,
    api: ChatApiClient,
    streams: StreamClient,
}

impl LlmStreamingClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let api = ChatApiClient::new(&config)?;
        let streams = StreamClient::new(config.stream_config());
        Ok(Self {
            config,
            api,
            streams,
        })
    }

    /// Builds a client from the `LLM_STREAMING_*` environment variables.
    pub fn from_env() -> Result<Self, ClientInitError> {
        let config = ClientConfig::from_env()?;
        Ok(Self::new(config)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ChatApiClient {
        &self.api
    }

    /// Idle session for callers that want to observe state and teardown.
    pub fn session(&self) -> StreamingSession {
        self.streams.session()
    }

    pub async fn get_status(&self) -> ApiResponse<StatusOutput> {
        self.api.status().await
    }

    pub async fn get_models(&self) -> ApiResponse<AvailableModelsOutput> {
        self.api.available_models().await
    }

    pub async fn get_llms(&self) -> ApiResponse<AvailableLlmsOutput> {
        self.api.available_llms().await
    }

    pub async fn get_prompts(&self) -> ApiResponse<AvailablePromptsOutput> {
        self.api.available_prompts().await
    }

    pub async fn transcribe_audio(
        &self,
        audio_service: &str,
        path: impl AsRef<Path>,
    ) -> Result<ApiResponse<AudioTranscriptionOutput>, ApiError> {
        self.api.transcribe_audio(audio_service, path).await
    }

    pub async fn handle_request(&self, request: &MessageRequest) -> ApiResponse<RequestOutput> {
        self.api.handle_request(request).await
    }

    /// Streams the response to `request` into `sink`, one call per token.
    ///
    /// Returns once the final token (or a server error) has been delivered
    /// and the connection is closed.
    pub async fn stream_message<K>(
        &self,
        request: &StreamingRequest,
        sink: &mut K,
    ) -> Result<StreamSummary, StreamClientError>
    where
        K: TokenSink + Send,
    {
        self.streams.stream(request, sink).await
    }

    /// Streams the response to stdout.
    pub async fn stream_to_console(
        &self,
        request: &StreamingRequest,
    ) -> Result<StreamSummary, StreamClientError> {
        self.streams.stream_to_console(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::LlmStreamingClient;
    use crate::config::ClientConfig;
    use crate::stream::session::SessionState;

    #[test]
    fn sessions_inherit_client_config() {
        let client = LlmStreamingClient::new(
            ClientConfig::new("https://llm.example.com/").with_timeout(Duration::from_secs(5)),
        )
        .expect("client");

        let session = client.session();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.endpoint(), "https://llm.example.com");
        assert_eq!(session.namespace(), "/api/v1/chat");
        assert_eq!(client.api().config().timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unreachable_service_reports_connection_error_in_envelope() {
        let client = LlmStreamingClient::new(
            ClientConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(200)),
        )
        .expect("client");

        let status = client.get_status().await;
        assert!(!status.success);
        let error = status.error.expect("error message");
        assert!(error.starts_with("Connection error: "), "{error}");
    }
}
