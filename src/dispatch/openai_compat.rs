use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatch::budget::{DEFAULT_TOKEN_BUDGET, trim_to_budget};
use crate::dispatch::provider::{DispatchError, Provider, ProviderClient};
use crate::dispatch::transport::{Auth, post_json};
use crate::store::history::Turn;

const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

impl ChatMessage {
    fn text(&self) -> &str {
        match &self.content {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .iter()
                .find_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

fn default_max_tokens(provider: Provider) -> u32 {
    match provider {
        Provider::HuggingFace => 1024,
        _ => 500,
    }
}

fn to_message(provider: Provider, turn: &Turn) -> ChatMessage {
    let role = provider.role_token(turn.role);
    let content = match (&turn.attachment, provider) {
        (Some(attachment), Provider::HuggingFace) => MessageContent::Parts(vec![
            ContentPart::Text {
                text: turn.text.clone(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: attachment.data_url(),
                },
            },
        ]),
        _ => MessageContent::Text(turn.text.clone()),
    };
    ChatMessage { role, content }
}

fn request(
    client: &ProviderClient,
    system: &str,
    history: &[Turn],
    new_turn: &Turn,
) -> ChatCompletionRequest {
    let provider = client.provider;
    let options = client.options;

    let mut conversation: Vec<ChatMessage> = history
        .iter()
        .filter(|turn| !turn.text.is_empty())
        .map(|turn| to_message(provider, turn))
        .collect();
    conversation.push(to_message(provider, new_turn));

    let conversation = if provider == Provider::Groq {
        let budget = options.history_token_budget.unwrap_or(DEFAULT_TOKEN_BUDGET);
        let kept = trim_to_budget(system, &conversation, ChatMessage::text, budget);
        if kept.len() < conversation.len() {
            debug!(
                dropped = conversation.len() - kept.len(),
                budget, "trimmed history to token budget"
            );
        }
        kept.to_vec()
    } else {
        conversation
    };

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage {
        role: "system",
        content: MessageContent::Text(system.to_string()),
    });
    messages.extend(conversation);

    ChatCompletionRequest {
        model: client.model.clone().unwrap_or_default(),
        messages,
        max_tokens: options
            .max_tokens
            .unwrap_or_else(|| default_max_tokens(provider)),
        temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    }
}

pub(crate) fn payload(
    client: &ProviderClient,
    system: &str,
    history: &[Turn],
    new_turn: &Turn,
) -> Value {
    serde_json::to_value(request(client, system, history, new_turn)).unwrap_or(Value::Null)
}

pub(crate) async fn send(
    client: &ProviderClient,
    system: &str,
    history: &[Turn],
    new_turn: &Turn,
) -> Result<String, DispatchError> {
    let provider = client.provider;
    let api_key = client.require_api_key()?.unwrap_or_default();
    let url = client.require_endpoint()?;
    let payload = request(client, system, history, new_turn);
    debug!(%provider, model = %payload.model, messages = payload.messages.len(), "sending chat completion");

    let response = post_json(
        &client.client,
        url,
        Auth::Bearer(&api_key),
        &payload,
        client.options.timeout_secs,
    )
    .await
    .map_err(|failure| failure.into_dispatch_error(provider))?;

    let parsed: ChatCompletionResponse =
        response
            .json()
            .await
            .map_err(|err| DispatchError::Malformed {
                provider,
                reason: err.to_string(),
            })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.is_empty())
        .ok_or(DispatchError::EmptyResponse { provider })
}
