//! Relay endpoint that accepts a Gemini-shaped body and answers
//! `{text}` or `{error, details?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatch::gemini::{self, Content, SystemInstruction};
use crate::dispatch::provider::{DispatchError, Provider, ProviderClient};
use crate::dispatch::transport::{Auth, post_json};
use crate::store::history::Turn;

#[derive(Debug, Serialize)]
struct RelayRequest {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Default, Deserialize)]
struct RelayReply {
    text: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

fn request(client: &ProviderClient, system: &str, history: &[Turn], new_turn: &Turn) -> RelayRequest {
    RelayRequest {
        contents: gemini::contents(client.provider, history, new_turn),
        system_instruction: SystemInstruction::new(system),
    }
}

pub(crate) fn payload(client: &ProviderClient, system: &str, history: &[Turn], new_turn: &Turn) -> Value {
    serde_json::to_value(request(client, system, history, new_turn)).unwrap_or(Value::Null)
}

/// Posts any relay body and returns the decoded JSON reply.
pub(crate) async fn exchange<B: Serialize + ?Sized>(
    client: &ProviderClient,
    body: &B,
) -> Result<Value, DispatchError> {
    let provider = client.provider;
    let url = client.require_endpoint()?;
    debug!(%provider, url, "sending relay request");

    let response = post_json(
        &client.client,
        url,
        Auth::None,
        body,
        client.options.timeout_secs,
    )
    .await
    .map_err(|failure| failure.into_dispatch_error(provider))?;

    response.json().await.map_err(|err| DispatchError::Malformed {
        provider,
        reason: err.to_string(),
    })
}

/// Pulls the reply text out of a relay answer. An `error` field is surfaced
/// verbatim even when it arrives with a success status.
pub(crate) fn reply_text(provider: Provider, reply: &Value) -> Result<String, DispatchError> {
    let reply: RelayReply =
        serde_json::from_value(reply.clone()).map_err(|err| DispatchError::Malformed {
            provider,
            reason: err.to_string(),
        })?;

    if let Some(error) = reply.error {
        return Err(DispatchError::Remote {
            provider,
            error,
            details: reply.details,
        });
    }

    match reply.text {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(DispatchError::EmptyResponse { provider }),
    }
}

pub(crate) async fn send(
    client: &ProviderClient,
    system: &str,
    history: &[Turn],
    new_turn: &Turn,
) -> Result<String, DispatchError> {
    let reply = exchange(client, &request(client, system, history, new_turn)).await?;
    reply_text(client.provider, &reply)
}
