//! Each backend pointed at a one-shot loopback HTTP server: the request it
//! sends and how it reads the answer. No network access or real keys needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parlor::adventure::{Adventure, RelayGameMaster};
use parlor::dispatch::{DispatchError, DispatchOptions, Dispatcher, Provider, ProviderClient};
use parlor::render::target::{BufferTarget, shared};
use parlor::session::{ChatContext, Session};
use parlor::store::world::Difficulty;
use parlor::store::{MemoryStore, Turn};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Value,
}

/// Accepts exactly one request, captures it and answers with `status` and `body`.
async fn mock_server_once(
    status: u16,
    content_type: &'static str,
    resp_body: impl Into<String> + Send + 'static,
) -> (String, oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel::<CapturedRequest>();

    tokio::spawn(async move {
        let resp_body: String = resp_body.into();
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();
        let mut parts = request_line.trim().splitn(3, ' ');
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((key, value)) = trimmed.split_once(": ") {
                let key = key.to_lowercase();
                if key == "content-length" {
                    content_length = value.parse().unwrap_or(0);
                }
                headers.insert(key, value.to_string());
            }
        }

        let mut body_bytes = vec![0u8; content_length];
        reader.read_exact(&mut body_bytes).await.unwrap();
        let body = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        let _ = tx.send(CapturedRequest {
            method,
            path,
            headers,
            body,
        });

        let reason = if status < 400 { "OK" } else { "Error" };
        let http_resp = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            resp_body.len(),
            resp_body,
        );
        let _ = write_half.write_all(http_resp.as_bytes()).await;
    });

    (format!("http://127.0.0.1:{port}"), rx)
}

fn client(provider: Provider, endpoint: String) -> ProviderClient {
    ProviderClient::new(
        provider,
        None,
        Some(endpoint),
        DispatchOptions {
            timeout_secs: Some(5),
            ..DispatchOptions::default()
        },
    )
}

#[tokio::test]
async fn relay_posts_contents_and_reads_text() {
    let (base, req_rx) = mock_server_once(200, "application/json", r#"{"text":"Hello there"}"#).await;
    let relay = client(Provider::Relay, format!("{base}/api/praterich"));

    let reply = relay
        .send("Be kind.", &[Turn::user("hi"), Turn::assistant("hey")], &Turn::user("again"))
        .await
        .unwrap();
    assert_eq!(reply, "Hello there");

    let req = req_rx.await.unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/api/praterich");
    assert!(!req.headers.contains_key("authorization"));
    assert_eq!(req.body["contents"][1]["role"], "model");
    assert_eq!(req.body["contents"][2]["parts"][0]["text"], "again");
    assert_eq!(req.body["system_instruction"]["parts"][0]["text"], "Be kind.");
}

#[tokio::test]
async fn relay_error_body_is_surfaced() {
    let (base, _req_rx) = mock_server_once(
        500,
        "application/json",
        r#"{"error":"Generation failed","details":"quota exhausted"}"#,
    )
    .await;
    let relay = client(Provider::Relay, base);

    let err = relay.send("", &[], &Turn::user("hi")).await.unwrap_err();
    assert_eq!(err.to_string(), "Generation failed: quota exhausted");
}

#[tokio::test]
async fn relay_plain_error_status_keeps_body() {
    let (base, _req_rx) = mock_server_once(502, "text/plain", "bad gateway").await;
    let relay = client(Provider::Relay, base);

    let err = relay.send("", &[], &Turn::user("hi")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Api { .. }));
    assert!(err.to_string().contains("bad gateway"));
}

#[tokio::test]
async fn groq_sends_bearer_token_and_chat_body() {
    // SAFETY: only this test reads GROQ_API_KEY.
    unsafe { std::env::set_var("GROQ_API_KEY", "gsk-test") };
    let (base, req_rx) = mock_server_once(
        200,
        "application/json",
        r#"{"choices":[{"message":{"role":"assistant","content":"Four."}}]}"#,
    )
    .await;
    let groq = client(Provider::Groq, format!("{base}/openai/v1/chat/completions"));

    let reply = groq.send("Be brief.", &[], &Turn::user("2+2?")).await.unwrap();
    assert_eq!(reply, "Four.");

    let req = req_rx.await.unwrap();
    assert_eq!(req.path, "/openai/v1/chat/completions");
    assert_eq!(req.headers.get("authorization").map(String::as_str), Some("Bearer gsk-test"));
    assert_eq!(req.body["model"], "llama-3.3-70b-versatile");
    assert_eq!(
        req.body["messages"],
        json!([
            {"role": "system", "content": "Be brief."},
            {"role": "user", "content": "2+2?"},
        ])
    );
}

#[tokio::test]
async fn gemini_sends_key_header_to_generate_content() {
    // SAFETY: only this test reads GEMINI_API_KEY.
    unsafe { std::env::set_var("GEMINI_API_KEY", "gem-test") };
    let (base, req_rx) = mock_server_once(
        200,
        "application/json",
        r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Bonjour"}]}}]}"#,
    )
    .await;
    let gemini = client(Provider::Gemini, base);

    let reply = gemini.send("Speak French.", &[], &Turn::user("hello")).await.unwrap();
    assert_eq!(reply, "Bonjour");

    let req = req_rx.await.unwrap();
    assert_eq!(req.path, "/v1beta/models/gemini-2.5-flash:generateContent");
    assert_eq!(req.headers.get("x-goog-api-key").map(String::as_str), Some("gem-test"));
    assert!(!req.headers.contains_key("authorization"));
    assert_eq!(req.body["contents"][0]["parts"][0]["text"], "hello");
}

#[tokio::test]
async fn local_server_stream_is_buffered_into_one_reply() {
    let sse = "data: Hello\n\ndata:  world\n\ndata: [ERROR] overloaded\n\ndata: [DONE]\n\ndata: ignored\n\n";
    let (base, req_rx) = mock_server_once(200, "text/event-stream", sse).await;
    let local = client(Provider::Local, format!("{base}/generate"));

    let reply = local
        .send("Be brief.", &[Turn::user("hi"), Turn::assistant("hey")], &Turn::user("more"))
        .await
        .unwrap();
    assert_eq!(reply, "Hello world");

    let req = req_rx.await.unwrap();
    assert_eq!(req.path, "/generate");
    assert_eq!(
        req.body["prompt"],
        "System Instruction: Be brief.\nConversation History:\nuser: hi\nassistant: hey\nuser: more\nassistant:"
    );
}

#[tokio::test]
async fn session_round_trip_through_relay() {
    let (base, _req_rx) = mock_server_once(200, "application/json", r#"{"text":"**Hi**"}"#).await;
    let target = shared(BufferTarget::new());
    let storage = MemoryStore::new();
    let context = ChatContext::new(
        Arc::new(client(Provider::Relay, base)),
        storage,
        target.clone(),
    )
    .with_reveal_delay(Duration::from_millis(1));
    let session = Session::new(context);

    let reply = session
        .submit("hello", None, &CancellationToken::new())
        .await
        .unwrap()
        .expect("a reply");
    assert_eq!(reply.html, "<p><strong>Hi</strong></p>");
    assert_eq!(session.turns().len(), 2);
    assert_eq!(
        target.lock().unwrap().content(),
        "<p><strong>Hi</strong></p>"
    );
}

#[tokio::test]
async fn adventure_sends_world_state_and_adopts_reply() {
    let (base, req_rx) = mock_server_once(
        200,
        "application/json",
        r#"{"text":"You find a lantern.","world_state":{"location":"A sunny beach","inventory":["lantern"],"objects":[],"score":5,"game_over":false,"quests":[]}}"#,
    )
    .await;
    let master = RelayGameMaster::new(client(Provider::Relay, base));
    let mut game = Adventure::open(MemoryStore::new(), master);
    game.new_game("A sunny beach".to_string(), Difficulty::Hard)
        .unwrap();

    let text = game.play("look around").await.unwrap();
    assert_eq!(text, "You find a lantern.");
    assert_eq!(game.world().inventory, vec!["lantern".to_string()]);
    assert_eq!(game.world().score, 5);
    assert_eq!(game.history().len(), 2);

    let req = req_rx.await.unwrap();
    assert_eq!(req.body["difficulty"], "hard");
    assert_eq!(req.body["world_state"]["location"], "A sunny beach");
    assert_eq!(req.body["contents"][0]["parts"][0]["text"], "look around");
}
