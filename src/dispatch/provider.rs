use std::env;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::dispatch::{gemini, openai_compat, relay, selfhosted};
use crate::store::history::{Role, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Relay,
    Gemini,
    Groq,
    HuggingFace,
    Local,
}

pub const SUPPORTED_PROVIDERS: &str = "relay, gemini, groq, huggingface, local";

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::HuggingFace => "huggingface",
            Self::Local => "local",
        }
    }

    /// Role token the remote contract expects for assistant turns.
    pub fn assistant_role(self) -> &'static str {
        match self {
            Self::Relay | Self::Gemini => "model",
            Self::Groq | Self::HuggingFace | Self::Local => "assistant",
        }
    }

    pub fn role_token(self, role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => self.assistant_role(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "relay" => Ok(Self::Relay),
            "gemini" => Ok(Self::Gemini),
            "groq" => Ok(Self::Groq),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "local" => Ok(Self::Local),
            other => Err(format!(
                "Invalid provider '{other}'. Supported values: {SUPPORTED_PROVIDERS}."
            )),
        }
    }
}

pub fn default_endpoint(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::Relay => Some("https://praterich.vercel.app/api/praterich"),
        Provider::Gemini => Some("https://generativelanguage.googleapis.com"),
        Provider::Groq => Some("https://api.groq.com/openai/v1/chat/completions"),
        Provider::HuggingFace => Some("https://router.huggingface.co/v1/chat/completions"),
        Provider::Local => None,
    }
}

pub fn default_model(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::Gemini => Some("gemini-2.5-flash"),
        Provider::Groq => Some("llama-3.3-70b-versatile"),
        Provider::HuggingFace => Some("Qwen/Qwen2.5-VL-7B-Instruct"),
        Provider::Relay | Provider::Local => None,
    }
}

pub fn api_key_env(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::Gemini => Some("GEMINI_API_KEY"),
        Provider::Groq => Some("GROQ_API_KEY"),
        Provider::HuggingFace => Some("HF_TOKEN"),
        Provider::Relay | Provider::Local => None,
    }
}

pub fn is_api_key_present(provider: Provider) -> bool {
    match api_key_env(provider) {
        Some(key_env) => env::var(key_env)
            .ok()
            .is_some_and(|value| !value.trim().is_empty()),
        None => true,
    }
}

/// Per-request tuning. Unset values fall back to each backend's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DispatchOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub history_token_budget: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{key_env} is not set in the environment")]
    MissingApiKey {
        provider: Provider,
        key_env: &'static str,
    },
    #[error("No endpoint configured for provider '{provider}'. Use --endpoint or set PARLOR_ENDPOINT.")]
    MissingEndpoint { provider: Provider },
    #[error("{provider} request failed: {source}")]
    Request {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: Provider,
        status: StatusCode,
        body: String,
    },
    #[error("{}", remote_message(.error, .details.as_deref()))]
    Remote {
        provider: Provider,
        error: String,
        details: Option<String>,
    },
    #[error("{provider} response could not be decoded: {reason}")]
    Malformed { provider: Provider, reason: String },
    #[error("{provider} response did not contain message content")]
    EmptyResponse { provider: Provider },
}

fn remote_message(error: &str, details: Option<&str>) -> String {
    match details {
        Some(details) if !details.is_empty() => format!("{error}: {details}"),
        _ => error.to_string(),
    }
}

impl DispatchError {
    /// Builds the error for a non-success reply, keeping a remote
    /// `{error, details}` or `{error: {message}}` payload verbatim.
    pub fn from_status(provider: Provider, status: StatusCode, body: String) -> Self {
        let parsed = serde_json::from_str::<Value>(&body).ok();
        let error = parsed.as_ref().and_then(|value| match &value["error"] {
            Value::String(error) => Some(error.clone()),
            Value::Object(object) => object
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        });

        match error {
            Some(error) => Self::Remote {
                provider,
                error,
                details: parsed
                    .as_ref()
                    .and_then(|value| value["details"].as_str())
                    .map(str::to_string),
            },
            None => Self::Api {
                provider,
                status,
                body,
            },
        }
    }
}

/// Sends one conversation turn to a text-generation backend.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(
        &self,
        system: &str,
        history: &[Turn],
        new_turn: &Turn,
    ) -> Result<String, DispatchError>;
}

/// Client for one configured backend.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    pub(crate) provider: Provider,
    pub(crate) model: Option<String>,
    pub(crate) endpoint: Option<String>,
    pub(crate) options: DispatchOptions,
    pub(crate) client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(
        provider: Provider,
        model: Option<String>,
        endpoint: Option<String>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            provider,
            model: model.or_else(|| default_model(provider).map(str::to_string)),
            endpoint: endpoint.or_else(|| default_endpoint(provider).map(str::to_string)),
            options,
            client: reqwest::Client::new(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    pub(crate) fn require_endpoint(&self) -> Result<&str, DispatchError> {
        self.endpoint
            .as_deref()
            .ok_or(DispatchError::MissingEndpoint {
                provider: self.provider,
            })
    }

    pub(crate) fn require_api_key(&self) -> Result<Option<String>, DispatchError> {
        let Some(key_env) = api_key_env(self.provider) else {
            return Ok(None);
        };
        env::var(key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(Some)
            .ok_or(DispatchError::MissingApiKey {
                provider: self.provider,
                key_env,
            })
    }

    /// The request body `send` would post, without sending it.
    pub fn payload(&self, system: &str, history: &[Turn], new_turn: &Turn) -> Value {
        match self.provider {
            Provider::Relay => relay::payload(self, system, history, new_turn),
            Provider::Gemini => gemini::payload(self, system, history, new_turn),
            Provider::Groq | Provider::HuggingFace => {
                openai_compat::payload(self, system, history, new_turn)
            }
            Provider::Local => selfhosted::payload(self, system, history, new_turn),
        }
    }
}

#[async_trait]
impl Dispatcher for ProviderClient {
    async fn send(
        &self,
        system: &str,
        history: &[Turn],
        new_turn: &Turn,
    ) -> Result<String, DispatchError> {
        match self.provider {
            Provider::Relay => relay::send(self, system, history, new_turn).await,
            Provider::Gemini => gemini::send(self, system, history, new_turn).await,
            Provider::Groq | Provider::HuggingFace => {
                openai_compat::send(self, system, history, new_turn).await
            }
            Provider::Local => selfhosted::send(self, system, history, new_turn).await,
        }
    }
}
