//! Streaming request model, wire payload builder, and inbound event decoder.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Outbound channel carrying the request payload.
pub const SEND_MESSAGE_EVENT: &str = "send_message";
/// Inbound channel carrying partial responses.
pub const RESPONSE_MESSAGE_EVENT: &str = "response_message";
/// Inbound channel carrying server-side failures.
pub const ERROR_EVENT: &str = "error";

pub const DEFAULT_LLM_NAME: &str = "openai";
pub const DEFAULT_MODEL_NAME: &str = "gpt-4o-mini";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    #[default]
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    Chinese,
    Japanese,
    Korean,
    Russian,
    Dutch,
}

const LANGUAGE_ALIASES: &[(&str, Language)] = &[
    ("en", Language::English),
    ("eng", Language::English),
    ("english", Language::English),
    ("ingles", Language::English),
    ("inglés", Language::English),
    ("es", Language::Spanish),
    ("esp", Language::Spanish),
    ("spanish", Language::Spanish),
    ("español", Language::Spanish),
    ("espanol", Language::Spanish),
    ("fr", Language::French),
    ("fra", Language::French),
    ("french", Language::French),
    ("francés", Language::French),
    ("frances", Language::French),
    ("français", Language::French),
    ("francais", Language::French),
    ("de", Language::German),
    ("deu", Language::German),
    ("ger", Language::German),
    ("german", Language::German),
    ("alemán", Language::German),
    ("aleman", Language::German),
    ("deutsch", Language::German),
    ("it", Language::Italian),
    ("ita", Language::Italian),
    ("italian", Language::Italian),
    ("italiano", Language::Italian),
    ("pt", Language::Portuguese),
    ("por", Language::Portuguese),
    ("portuguese", Language::Portuguese),
    ("portugués", Language::Portuguese),
    ("portugues", Language::Portuguese),
    ("português", Language::Portuguese),
    ("zh", Language::Chinese),
    ("chi", Language::Chinese),
    ("zho", Language::Chinese),
    ("chinese", Language::Chinese),
    ("chino", Language::Chinese),
    ("mandarin", Language::Chinese),
    ("mandarín", Language::Chinese),
    ("ja", Language::Japanese),
    ("jpn", Language::Japanese),
    ("japanese", Language::Japanese),
    ("japonés", Language::Japanese),
    ("japones", Language::Japanese),
    ("ko", Language::Korean),
    ("kor", Language::Korean),
    ("korean", Language::Korean),
    ("coreano", Language::Korean),
    ("ru", Language::Russian),
    ("rus", Language::Russian),
    ("russian", Language::Russian),
    ("ruso", Language::Russian),
    ("nl", Language::Dutch),
    ("nld", Language::Dutch),
    ("dut", Language::Dutch),
    ("dutch", Language::Dutch),
    ("holandés", Language::Dutch),
    ("holandes", Language::Dutch),
];

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Spanish => "spanish",
            Self::French => "french",
            Self::German => "german",
            Self::Italian => "italian",
            Self::Portuguese => "portuguese",
            Self::Chinese => "chinese",
            Self::Japanese => "japanese",
            Self::Korean => "korean",
            Self::Russian => "russian",
            Self::Dutch => "dutch",
        }
    }

    /// Resolves ISO codes and common English/Spanish language names.
    pub fn from_alias(input: &str) -> Option<Self> {
        let normalized = input.trim().to_lowercase();
        LANGUAGE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, language)| *language)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported language {0:?}")]
pub struct LanguageParseError(pub String);

impl FromStr for Language {
    type Err = LanguageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_alias(s).ok_or_else(|| LanguageParseError(s.to_string()))
    }
}

/// Task the service should run on the input text.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActionKey {
    /// Chat-style answers grounded on the provided context.
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "summarize")]
    Summarize,
    /// Extract text and tables from an image as JSON.
    #[serde(rename = "extract")]
    ImageExtraction,
    #[serde(rename = "describe")]
    ImageDescription,
    #[serde(rename = "sparql_query")]
    SparqlQuery,
}

impl ActionKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Summarize => "summarize",
            Self::ImageExtraction => "extract",
            Self::ImageDescription => "describe",
            Self::SparqlQuery => "sparql_query",
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported action key {0:?}")]
pub struct ActionKeyParseError(pub String);

impl FromStr for ActionKey {
    type Err = ActionKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(Self::Default),
            "summarize" => Ok(Self::Summarize),
            "extract" => Ok(Self::ImageExtraction),
            "describe" => Ok(Self::ImageDescription),
            "sparql_query" => Ok(Self::SparqlQuery),
            other => Err(ActionKeyParseError(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub title: String,
    pub description: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.7
}

impl PromptTemplate {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            temperature: default_temperature(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// One streaming call's input.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamingRequest {
    pub llm_name: String,
    pub model_name: String,
    pub text: String,
    /// Kept alongside the request; not part of the wire payload.
    pub prompt: Option<PromptTemplate>,
    pub language: Language,
    pub action_key: ActionKey,
    pub session_id: Option<String>,
    pub context_info: Option<String>,
    /// Base64 text of an attached image.
    pub image_object: Option<String>,
}

impl StreamingRequest {
    /// Creates a request with the service defaults (`openai`/`gpt-4o-mini`,
    /// Spanish, default action).
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            llm_name: DEFAULT_LLM_NAME.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            text: text.into(),
            prompt: None,
            language: Language::default(),
            action_key: ActionKey::default(),
            session_id: None,
            context_info: None,
            image_object: None,
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

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = Some(prompt);
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

    /// Attaches an already base64-encoded image.
    pub fn with_image_object(mut self, image_object: impl Into<String>) -> Self {
        self.image_object = Some(image_object.into());
        self
    }

    /// Attaches raw image bytes, encoding them as standard base64.
    pub fn with_image_bytes(self, bytes: &[u8]) -> Self {
        let encoded = BASE64_STANDARD.encode(bytes);
        self.with_image_object(encoded)
    }
}

/// Serialized form of a [`StreamingRequest`] for the `send_message` event.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct WirePayload<'a> {
    pub text: &'a str,
    pub llm_name: &'a str,
    pub model_name: &'a str,
    pub action_key: ActionKey,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_object: Option<&'a str>,
}

impl WirePayload<'_> {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Maps a request onto its wire shape. Empty optional strings count as unset.
pub fn build_payload(request: &StreamingRequest) -> WirePayload<'_> {
    WirePayload {
        text: &request.text,
        llm_name: &request.llm_name,
        model_name: &request.model_name,
        action_key: request.action_key,
        language: request.language,
        session_id: present(&request.session_id),
        context_info: present(&request.context_info),
        image_object: present(&request.image_object),
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenEvent {
    pub content: String,
    pub finished: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}

impl ErrorEvent {
    /// Human-readable line handed to sinks.
    pub fn formatted(&self) -> String {
        format!("Error: {}", self.message)
    }
}

/// Decoded server event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Token(TokenEvent),
    Error(ErrorEvent),
}

impl InboundEvent {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Token(token) => token.finished,
            Self::Error(_) => true,
        }
    }
}

/// Classifies a server event. Unknown channels yield `None`.
pub fn decode_event(channel: &str, args: &[Value]) -> Option<InboundEvent> {
    match channel {
        RESPONSE_MESSAGE_EVENT => {
            let data = args.first();
            let content = data
                .and_then(|data| data.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let finished = data
                .and_then(|data| data.get("finished"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(InboundEvent::Token(TokenEvent { content, finished }))
        }
        ERROR_EVENT => Some(InboundEvent::Error(ErrorEvent {
            message: error_message(args.first()),
        })),
        _ => None,
    }
}

fn error_message(data: Option<&Value>) -> String {
    match data {
        None | Some(Value::Null) => "unknown error".to_string(),
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(fields)) => ["error_message", "message", "error"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(fields.clone()).to_string()),
        Some(other) => other.to_string(),
    }
}
