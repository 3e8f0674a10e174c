use std::collections::BTreeMap;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error_body::describe_http_error;
use crate::stream::proto::{
    ActionKey, Language, StreamingRequest, DEFAULT_LLM_NAME, DEFAULT_MODEL_NAME,
};

pub const STATUS_ROUTE: &str = "status";
pub const AVAILABLE_MODELS_ROUTE: &str = "available_models";
pub const AVAILABLE_LLMS_ROUTE: &str = "available_llms";
pub const AVAILABLE_PROMPTS_ROUTE: &str = "available_prompts";
pub const AUDIO_ROUTE: &str = "audio";
pub const REQUEST_ROUTE: &str = "request";

const AUDIO_MIME: &str = "audio/wav";

/// Envelope returned by every chat REST call.
///
/// Remote failures never surface as `Err`; they land in `error` with
/// `success == false`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub response: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(response: T) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn from_result(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(response) => Self::ok(response),
            Err(err) => Self::failure(err.to_string()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.response) {
            (true, Some(response)) => Ok(response),
            _ => Err(self.error.unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}

/// Failure of a chat REST call before it is folded into [`ApiResponse`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Connection error: {0}")]
    Transport(reqwest::Error),

    #[error("{message}")]
    HttpStatus { status: StatusCode, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Body of the `status` route.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusOutput {
    /// Service health as reported by the server, e.g. `"ok"`.
    pub status: String,
}

/// Body of the `available_models` route.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableModelsOutput {
    /// Model names keyed by LLM provider.
    pub models: BTreeMap<String, Vec<String>>,
}

/// Body of the `available_llms` route.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableLlmsOutput {
    /// Provider names accepted as `llm_name`.
    pub llms: Vec<String>,
}

/// One prompt template offered by the service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptInfo {
    /// Display title.
    pub title: String,
    /// Value to send as `actionKey` to use this prompt.
    #[serde(rename = "actionKey")]
    pub action_key: String,
}

/// Body of the `available_prompts` route.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailablePromptsOutput {
    pub prompts: Vec<PromptInfo>,
}

/// Body of the `audio` route.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioTranscriptionOutput {
    /// Transcribed speech.
    pub text: String,
}

/// Body of the `request` route.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestOutput {
    /// Full model answer; absent when the request failed server-side.
    #[serde(default)]
    pub response: Option<String>,
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Non-streaming request for the `request` route.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MessageRequest {
    pub llm_name: String,
    pub model_name: String,
    pub text: String,
    pub language: Language,
    #[serde(rename = "actionKey")]
    pub action_key: ActionKey,
    #[serde(rename = "image", skip_serializing_if = "is_blank")]
    pub image_object: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub context_info: Option<String>,
}

impl MessageRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            llm_name: DEFAULT_LLM_NAME.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            text: text.into(),
            language: Language::default(),
            action_key: ActionKey::default(),
            image_object: None,
            session_id: None,
            context_info: None,
        }
    }

    pub fn with_model(mut self, llm_name: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.llm_name = llm_name.into();
        self.model_name = model_name.into();
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_action_key(mut self, action_key: ActionKey) -> Self {
        self.action_key = action_key;
        self
    }

    pub fn with_image_object(mut self, image_object: impl Into<String>) -> Self {
        self.image_object = Some(image_object.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_context_info(mut self, context_info: impl Into<String>) -> Self {
        self.context_info = Some(context_info.into());
        self
    }
}

impl From<&StreamingRequest> for MessageRequest {
    fn from(request: &StreamingRequest) -> Self {
        Self {
            llm_name: request.llm_name.clone(),
            model_name: request.model_name.clone(),
            text: request.text.clone(),
            language: request.language,
            action_key: request.action_key,
            image_object: request.image_object.clone(),
            session_id: request.session_id.clone(),
            context_info: request.context_info.clone(),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

/// REST client for the chat service's configuration, audio and request routes.
#[derive(Clone, Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ClientConfig,
}

impl ChatApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .no_proxy()
            .timeout(config.timeout)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn status(&self) -> ApiResponse<StatusOutput> {
        self.get(STATUS_ROUTE).await
    }

    pub async fn available_models(&self) -> ApiResponse<AvailableModelsOutput> {
        self.get(AVAILABLE_MODELS_ROUTE).await
    }

    pub async fn available_llms(&self) -> ApiResponse<AvailableLlmsOutput> {
        self.get(AVAILABLE_LLMS_ROUTE).await
    }

    pub async fn available_prompts(&self) -> ApiResponse<AvailablePromptsOutput> {
        self.get(AVAILABLE_PROMPTS_ROUTE).await
    }

    /// Uploads the audio file at `path` for transcription by `audio_service`.
    ///
    /// Failing to read the file is a local error and returns `Err`; every
    /// remote failure is reported inside the envelope.
    pub async fn transcribe_audio(
        &self,
        audio_service: &str,
        path: impl AsRef<Path>,
    ) -> Result<ApiResponse<AudioTranscriptionOutput>, ApiError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        Ok(self
            .transcribe_audio_bytes(audio_service, file_name, bytes)
            .await)
    }

    pub async fn transcribe_audio_bytes(
        &self,
        audio_service: &str,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> ApiResponse<AudioTranscriptionOutput> {
        let part = match Part::bytes(bytes).file_name(file_name.into()).mime_str(AUDIO_MIME) {
            Ok(part) => part,
            Err(err) => return ApiResponse::failure(ApiError::Transport(err).to_string()),
        };
        let form = Form::new()
            .text("audio_service", audio_service.to_string())
            .part("audio", part);

        let endpoint = self.config.endpoint(AUDIO_ROUTE);
        debug!(event = "chat_api_request", method = "POST", endpoint = %endpoint, audio_service);
        ApiResponse::from_result(send_json(self.http.post(&endpoint).multipart(form)).await)
    }

    /// Runs a request without streaming and returns the whole response.
    pub async fn handle_request(&self, request: &MessageRequest) -> ApiResponse<RequestOutput> {
        let endpoint = self.config.endpoint(REQUEST_ROUTE);
        debug!(
            event = "chat_api_request",
            method = "POST",
            endpoint = %endpoint,
            action_key = %request.action_key
        );
        ApiResponse::from_result(send_json(self.http.post(&endpoint).json(request)).await)
    }

    async fn get<T: DeserializeOwned>(&self, route: &str) -> ApiResponse<T> {
        let endpoint = self.config.endpoint(route);
        debug!(event = "chat_api_request", method = "GET", endpoint = %endpoint);
        ApiResponse::from_result(send_json(self.http.get(&endpoint)).await)
    }
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
    let response = builder.send().await.map_err(ApiError::Transport)?;
    let status = response.status();
    let body = response.text().await.map_err(ApiError::Transport)?;

    if !status.is_success() {
        let message = describe_http_error(status.as_u16(), &body);
        debug!(event = "chat_api_failed", status = status.as_u16(), message = %message);
        return Err(ApiError::HttpStatus { status, message });
    }

    serde_json::from_str(&body).map_err(|err| ApiError::Parse(err.to_string()))
}
