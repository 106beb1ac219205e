//! Self-hosted inference server that streams its answer as server-sent events.
//!
//! The stream is buffered here into one string; callers never see partial
//! output.

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dispatch::provider::{DispatchError, ProviderClient};
use crate::dispatch::transport::{Auth, post_json};
use crate::store::history::Turn;

#[derive(Debug, Serialize)]
struct PromptRequest {
    prompt: String,
}

/// Flattens the system instruction and transcript into one prompt.
pub fn flatten_prompt(client: &ProviderClient, system: &str, history: &[Turn], new_turn: &Turn) -> String {
    let provider = client.provider;
    let transcript: Vec<String> = history
        .iter()
        .chain(std::iter::once(new_turn))
        .map(|turn| format!("{}: {}", provider.role_token(turn.role), turn.text))
        .collect();

    format!(
        "System Instruction: {system}\nConversation History:\n{}\nassistant:",
        transcript.join("\n")
    )
}

pub(crate) fn payload(client: &ProviderClient, system: &str, history: &[Turn], new_turn: &Turn) -> Value {
    serde_json::to_value(PromptRequest {
        prompt: flatten_prompt(client, system, history, new_turn),
    })
    .unwrap_or(Value::Null)
}

/// Accumulates `data:` lines from an SSE body that may arrive split at
/// arbitrary byte boundaries.
#[derive(Debug, Default)]
pub struct SseCollector {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl SseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk. Returns `true` once `[DONE]` was seen.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.done {
            return true;
        }
        self.pending.extend_from_slice(chunk);
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            self.take_line(&line[..line.len() - 1]);
            if self.done {
                self.pending.clear();
                break;
            }
        }
        self.done
    }

    fn take_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == "[DONE]" {
            self.done = true;
        } else if data.trim_start().starts_with("[ERROR]") {
            warn!(chunk = data, "skipping error chunk in event stream");
        } else {
            self.text.push_str(data);
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Concatenated text, trimmed. A trailing line without a newline is
    /// still taken.
    pub fn finish(mut self) -> String {
        if !self.done && !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.take_line(&rest);
        }
        self.text.trim().to_string()
    }
}

pub(crate) async fn send(
    client: &ProviderClient,
    system: &str,
    history: &[Turn],
    new_turn: &Turn,
) -> Result<String, DispatchError> {
    let provider = client.provider;
    let url = client.require_endpoint()?;
    let request = PromptRequest {
        prompt: flatten_prompt(client, system, history, new_turn),
    };
    debug!(%provider, url, prompt_chars = request.prompt.len(), "sending streaming prompt");

    let response = post_json(
        &client.client,
        url,
        Auth::None,
        &request,
        client.options.timeout_secs,
    )
    .await
    .map_err(|failure| failure.into_dispatch_error(provider))?;

    let mut collector = SseCollector::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DispatchError::Request { provider, source })?;
        if collector.push(&chunk) {
            break;
        }
    }

    let text = collector.finish();
    if text.is_empty() {
        return Err(DispatchError::EmptyResponse { provider });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::provider::{DispatchOptions, Provider};

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut collector = SseCollector::new();
        assert!(!collector.push(b"data: Hel"));
        assert!(!collector.push(b"lo\n\ndata: , wor"));
        assert!(!collector.push(b"ld\r\n\n"));
        assert!(collector.push(b"data: [DONE]\n\ndata: ignored\n"));
        assert_eq!(collector.finish(), "Hello, world");
    }

    #[test]
    fn error_chunks_and_other_fields_are_skipped() {
        let mut collector = SseCollector::new();
        collector.push(b"event: token\ndata: [ERROR] overloaded\ndata: one \n: comment\ndata: two");
        assert!(!collector.is_done());
        assert_eq!(collector.finish(), "one two");
    }

    #[test]
    fn prompt_flattens_transcript() {
        let client = ProviderClient::new(
            Provider::Local,
            None,
            Some("http://127.0.0.1:1/".to_string()),
            DispatchOptions::default(),
        );
        let prompt = flatten_prompt(
            &client,
            "Be kind.",
            &[Turn::user("hi"), Turn::assistant("hello")],
            &Turn::user("bye"),
        );
        assert_eq!(
            prompt,
            "System Instruction: Be kind.\nConversation History:\nuser: hi\nassistant: hello\nuser: bye\nassistant:"
        );
    }
}
