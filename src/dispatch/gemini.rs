//! Google Generative Language `generateContent`, and the Gemini-shaped
//! `contents` list the relay backend shares.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatch::provider::{DispatchError, Provider, ProviderClient};
use crate::dispatch::transport::{Auth, post_json};
use crate::store::history::Turn;

#[derive(Debug, Serialize)]
pub(crate) struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
pub(crate) struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SystemInstruction {
    pub parts: Vec<Part>,
}

impl SystemInstruction {
    pub(crate) fn new(system: &str) -> Self {
        Self {
            parts: vec![Part::Text {
                text: system.to_string(),
            }],
        }
    }
}

/// History plus the new turn as Gemini `contents`. Only the new turn carries
/// its attachment.
pub(crate) fn contents(provider: Provider, history: &[Turn], new_turn: &Turn) -> Vec<Content> {
    let mut contents: Vec<Content> = history
        .iter()
        .map(|turn| Content {
            role: provider.role_token(turn.role),
            parts: vec![Part::Text {
                text: turn.text.clone(),
            }],
        })
        .collect();

    let mut parts = vec![Part::Text {
        text: new_turn.text.clone(),
    }];
    if let Some(attachment) = &new_turn.attachment {
        parts.push(Part::InlineData {
            inline_data: InlineData {
                mime_type: attachment.mime_type.clone(),
                data: attachment.base64_data(),
            },
        });
    }
    contents.push(Content {
        role: provider.role_token(new_turn.role),
        parts,
    });
    contents
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn request(client: &ProviderClient, system: &str, history: &[Turn], new_turn: &Turn) -> GenerateContentRequest {
    let options = client.options;
    let generation_config = (options.max_tokens.is_some() || options.temperature.is_some())
        .then_some(GenerationConfig {
            max_output_tokens: options.max_tokens,
            temperature: options.temperature,
        });

    GenerateContentRequest {
        contents: contents(client.provider, history, new_turn),
        system_instruction: SystemInstruction::new(system),
        generation_config,
    }
}

pub(crate) fn payload(client: &ProviderClient, system: &str, history: &[Turn], new_turn: &Turn) -> Value {
    serde_json::to_value(request(client, system, history, new_turn)).unwrap_or(Value::Null)
}

fn generate_url(base: &str, model: &str) -> String {
    if base.contains(":generateContent") {
        return base.to_string();
    }
    format!(
        "{}/v1beta/models/{}:generateContent",
        base.trim_end_matches('/'),
        model
    )
}

pub(crate) async fn send(
    client: &ProviderClient,
    system: &str,
    history: &[Turn],
    new_turn: &Turn,
) -> Result<String, DispatchError> {
    let provider = client.provider;
    let api_key = client.require_api_key()?.unwrap_or_default();
    let model = client.model.as_deref().unwrap_or("gemini-2.5-flash");
    let url = generate_url(client.require_endpoint()?, model);
    debug!(%provider, model, turns = history.len() + 1, "sending generateContent request");

    let response = post_json(
        &client.client,
        &url,
        Auth::Header("x-goog-api-key", &api_key),
        &request(client, system, history, new_turn),
        client.options.timeout_secs,
    )
    .await
    .map_err(|failure| failure.into_dispatch_error(provider))?;

    let parsed: GenerateContentResponse =
        response
            .json()
            .await
            .map_err(|err| DispatchError::Malformed {
                provider,
                reason: err.to_string(),
            })?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(DispatchError::EmptyResponse { provider });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::provider::DispatchOptions;
    use crate::store::history::Attachment;

    #[test]
    fn contents_map_assistant_to_model_and_attach_inline_data() {
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        let new_turn =
            Turn::user("what is this").with_attachment(Some(Attachment::new("image/png", b"png".to_vec())));
        let value = serde_json::to_value(contents(Provider::Gemini, &history, &new_turn)).unwrap();

        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[1]["role"], "model");
        assert_eq!(value[1]["parts"][0]["text"], "hello");
        assert_eq!(value[2]["parts"][0]["text"], "what is this");
        assert_eq!(value[2]["parts"][1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(value[2]["parts"][1]["inline_data"]["data"], "cG5n");
    }

    #[test]
    fn payload_carries_system_instruction_and_generation_config() {
        let client = ProviderClient::new(
            Provider::Gemini,
            None,
            None,
            DispatchOptions {
                max_tokens: Some(64),
                ..DispatchOptions::default()
            },
        );
        let value = payload(&client, "Be brief.", &[], &Turn::user("hi"));
        assert_eq!(value["system_instruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 64);
        assert!(value["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn generate_url_appends_model_path() {
        assert_eq!(
            generate_url("https://generativelanguage.googleapis.com/", "gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            generate_url("http://127.0.0.1:9/m:generateContent", "x"),
            "http://127.0.0.1:9/m:generateContent"
        );
    }
}
