use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::commands::settings::{self, ModelArgs, RenderArgs, Settings};
use crate::commands::{cancel_on_ctrl_c, save_output, version_line};
use crate::config::OutputMode;
use crate::dispatch::is_api_key_present;
use crate::render::palette::Palette;
use crate::render::speech::{Pronunciations, plain_text};
use crate::render::target::{TerminalTarget, lock, shared};
use crate::session::{ChatContext, Reply, Session, SessionError};
use crate::store::history::HistoryStore;
use crate::store::prefs::load_theme;
use crate::store::{Attachment, KeyValueStore, MemoryStore, Turn};

#[derive(Debug, Args, Clone)]
pub struct AskArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub render: RenderArgs,
    /// Attach an image to the question
    #[arg(long)]
    pub image: Option<PathBuf>,
    /// Continue the stored conversation and record this exchange
    #[arg(long)]
    pub history: bool,
    /// Print the request payload instead of sending it
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Also write the reply to FILE
    #[arg(long)]
    pub save: Option<PathBuf>,
    #[arg(long, short)]
    pub verbose: bool,
    /// Only report fatal errors on stderr
    #[arg(long, short)]
    pub quiet: bool,
    /// Print version and build metadata
    #[arg(long)]
    pub version: bool,
    /// Question to ask; read from stdin when omitted
    pub prompt: Option<String>,
}

fn read_prompt(prompt: Option<String>) -> Result<String, String> {
    if let Some(prompt) = prompt {
        return Ok(prompt);
    }

    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Err("No prompt provided. Pass it as an argument or pipe it on stdin.".to_string());
    }
    let mut prompt = String::new();
    stdin
        .read_to_string(&mut prompt)
        .map_err(|err| format!("Failed to read prompt from stdin: {err}"))?;
    Ok(prompt.trim_end_matches(['\r', '\n']).to_string())
}

pub(crate) fn read_image(path: &PathBuf) -> Result<Attachment, String> {
    let bytes = fs::read(path)
        .map_err(|err| format!("Failed to read image '{}': {err}", path.display()))?;
    Attachment::png_from_image_bytes(&bytes)
        .map_err(|err| format!("Failed to decode image '{}': {err}", path.display()))
}

fn dry_run_body(settings: &Settings, history: &[Turn], new_turn: &Turn) -> serde_json::Value {
    let client = settings.client();
    json!({
        "dry_run": true,
        "provider": settings.provider.as_str(),
        "model": client.model(),
        "endpoint": client.endpoint(),
        "output": settings.output.as_str(),
        "request": {
            "temperature": settings.options.temperature,
            "max_tokens": settings.options.max_tokens,
            "timeout_secs": settings.options.timeout_secs,
        },
        "turns": history.len() + 1,
        "payload": client.payload(&settings.system, history, new_turn),
    })
}

fn reply_output(output: OutputMode, reply: &Reply) -> String {
    match output {
        OutputMode::Html => reply.html.clone(),
        OutputMode::Text => plain_text(&reply.html, &Pronunciations::empty()),
        OutputMode::Json => json!({ "text": reply.text, "html": reply.html }).to_string(),
    }
}

pub async fn run(args: AskArgs) -> Result<(), String> {
    if args.version {
        println!("{}", version_line("parlask"));
        return Ok(());
    }

    let prompt = read_prompt(args.prompt.clone())?;
    let settings = settings::resolve(&args.model, &args.render)?;
    let attachment = args.image.as_ref().map(read_image).transpose()?;

    if args.verbose && !args.quiet {
        eprintln!(
            "provider={} model={} endpoint={} output={} api_key_present={}",
            settings.provider,
            settings.model.as_deref().unwrap_or("-"),
            settings.endpoint.as_deref().unwrap_or("-"),
            settings.output,
            is_api_key_present(settings.provider)
        );
    }

    if args.history {
        ask_with(settings.storage(), &args, &settings, prompt, attachment).await
    } else {
        ask_with(MemoryStore::new(), &args, &settings, prompt, attachment).await
    }
}

async fn ask_with<S>(
    storage: S,
    args: &AskArgs,
    settings: &Settings,
    prompt: String,
    attachment: Option<Attachment>,
) -> Result<(), String>
where
    S: KeyValueStore + Send + 'static,
{
    if args.dry_run {
        let history = HistoryStore::open(storage);
        let new_turn = Turn::user(prompt).with_attachment(attachment);
        let body = dry_run_body(settings, history.turns(), &new_turn);
        let rendered = serde_json::to_string_pretty(&body)
            .map_err(|err| format!("Failed to encode dry-run payload: {err}"))?;
        println!("{rendered}");
        if let Some(path) = &args.save {
            save_output(path, &rendered)?;
        }
        return Ok(());
    }

    let palette = Palette::for_theme(load_theme(&settings.storage()));
    let target = shared(TerminalTarget::stdout(palette).without_error_notices());
    let context = ChatContext::new(Arc::new(settings.client()), storage, target.clone())
        .with_system(settings.system.clone())
        .with_speech(settings.speech())
        .with_output(settings.output)
        .with_reveal_delay(settings.reveal_delay);
    let session = Session::new(context);

    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let result = session.submit(&prompt, attachment, &cancel).await;
    watcher.abort();

    match result {
        Ok(Some(reply)) => {
            if settings.output == OutputMode::Json {
                println!("{}", reply_output(OutputMode::Json, &reply));
            } else {
                lock(&target).finish_line();
            }
            if let Some(path) = &args.save {
                save_output(path, &reply_output(settings.output, &reply))?;
            }
            Ok(())
        }
        Ok(None) => Err("Prompt is empty.".to_string()),
        Err(SessionError::Cancelled) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::reveal::RevealOutcome;

    #[test]
    fn saved_output_follows_output_mode() {
        let reply = Reply {
            text: "**hi** &".to_string(),
            html: "<p><strong>hi</strong> &amp;</p>".to_string(),
            reveal: Some(RevealOutcome::Completed),
        };
        assert_eq!(reply_output(OutputMode::Html, &reply), reply.html);
        assert_eq!(reply_output(OutputMode::Text, &reply), "hi &");
        let json: serde_json::Value =
            serde_json::from_str(&reply_output(OutputMode::Json, &reply)).unwrap();
        assert_eq!(json["text"], "**hi** &");
    }
}
