use std::future::{self, Future};
use std::io::{self, Write};
use std::sync::Arc;

use clap::Args;
use owo_colors::OwoColorize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::commands::ask::read_image;
use crate::commands::cancel_on_ctrl_c;
use crate::commands::settings::{self, ModelArgs, RenderArgs};
use crate::config::OutputMode;
use crate::render::palette::Palette;
use crate::render::speech::{Pronunciations, plain_text};
use crate::render::target::{TerminalTarget, lock, shared};
use crate::session::{ChatContext, Session, SessionError};
use crate::store::prefs::{load_theme, save_theme};
use crate::store::{Attachment, FileStore, Role};

const CHAT_HELP: &str = "Commands: /reset clears the conversation, /theme toggles light and dark, \
/image PATH attaches an image to the next message, /exit leaves. Ctrl-C stops a reply, \
or leaves when no reply is running.";

#[derive(Debug, Args, Clone)]
pub struct ChatArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub render: RenderArgs,
}

enum Input {
    Exit,
    Reset,
    Theme,
    Help,
    Image(String),
    Message(String),
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    match trimmed {
        "/exit" | "/quit" => Input::Exit,
        "/reset" => Input::Reset,
        "/theme" => Input::Theme,
        "/help" => Input::Help,
        _ => match trimmed.strip_prefix("/image ") {
            Some(path) => Input::Image(path.trim().to_string()),
            None => Input::Message(trimmed.to_string()),
        },
    }
}

/// Next input line, or `None` at end of input or when `interrupt` fires first.
async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        future::pending::<()>().await;
    }
}

type ChatSession = Session<FileStore, TerminalTarget<io::Stdout>>;

fn label(role: Role, palette: Palette) -> String {
    match role {
        Role::User => format!("{}", "you>".color(palette.user)),
        Role::Assistant => format!("{}", "parlor>".color(palette.assistant)),
    }
}

fn show_history(session: &ChatSession, output: OutputMode) {
    let mut target = lock(session.target());
    let palette = target.palette();
    for (role, html) in session.rendered() {
        let body = match (role, output) {
            (Role::Assistant, OutputMode::Text) => plain_text(&html, &Pronunciations::empty()),
            _ => html,
        };
        target.line(&format!("{} {body}", label(role, palette)));
    }
}

pub async fn run(args: ChatArgs) -> Result<(), String> {
    let settings = settings::resolve(&args.model, &args.render)?;
    let storage = settings.storage();
    let mut theme = load_theme(&storage);

    let target = shared(TerminalTarget::stdout(Palette::for_theme(theme)));
    let context = ChatContext::new(Arc::new(settings.client()), storage.clone(), target.clone())
        .with_system(settings.system.clone())
        .with_speech(settings.speech())
        .with_output(settings.output)
        .with_reveal_delay(settings.reveal_delay);
    let session = Session::new(context);

    show_history(&session, settings.output);
    lock(&target).line(&format!("{}", CHAT_HELP.color(Palette::for_theme(theme).muted)));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_image: Option<Attachment> = None;

    loop {
        {
            let mut target = lock(&target);
            let prompt = label(Role::User, target.palette());
            let out = target.out();
            let _ = write!(out, "{prompt} ");
            let _ = out.flush();
        }

        // Ctrl-C at the prompt leaves; during a reply it only stops the reply.
        let Some(line) = next_input(&mut lines, ctrl_c())
            .await
            .map_err(|err| format!("Failed to read input: {err}"))?
        else {
            break;
        };

        match parse_input(&line) {
            Input::Exit => break,
            Input::Help => lock(&target).line(CHAT_HELP),
            Input::Reset => match session.reset() {
                Ok(()) => lock(&target).line("Conversation cleared."),
                Err(err) => lock(&target).line(&format!("Error: {err}")),
            },
            Input::Theme => {
                theme = theme.toggled();
                if let Err(err) = save_theme(&storage, theme) {
                    warn!(error = %err, "failed to save theme");
                }
                let mut target = lock(&target);
                target.set_palette(Palette::for_theme(theme));
                target.line(&format!("Theme: {theme}"));
            }
            Input::Image(path) => match read_image(&path.into()) {
                Ok(attachment) => {
                    pending_image = Some(attachment);
                    lock(&target).line("Image attached to the next message.");
                }
                Err(err) => lock(&target).line(&format!("Error: {err}")),
            },
            Input::Message(text) => {
                if text.is_empty() && pending_image.is_none() {
                    continue;
                }
                {
                    let mut target = lock(&target);
                    let prompt = label(Role::Assistant, target.palette());
                    let _ = write!(target.out(), "{prompt} ");
                }

                let cancel = CancellationToken::new();
                let watcher = cancel_on_ctrl_c(&cancel);
                let result = session.submit(&text, pending_image.take(), &cancel).await;
                watcher.abort();

                match result {
                    Ok(Some(reply)) if settings.output == OutputMode::Json => {
                        lock(&target).line(
                            &json!({ "text": reply.text, "html": reply.html }).to_string(),
                        );
                    }
                    Ok(_) => lock(&target).finish_line(),
                    Err(SessionError::Store(err)) => {
                        lock(&target).line(&format!("Error: {err}"));
                    }
                    // Stop and dispatch failures were already shown as notices.
                    Err(_) => {}
                }
            }
        }
    }

    lock(&target).finish_line();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_at_the_prompt_ends_input() {
        let (reader, _writer) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        let line = next_input(&mut lines, future::ready(())).await.unwrap();
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn typed_line_is_returned_while_no_interrupt_arrives() {
        let input: &[u8] = b"hello\n";
        let mut lines = BufReader::new(input).lines();
        let line = next_input(&mut lines, future::pending()).await.unwrap();
        assert_eq!(line.as_deref(), Some("hello"));
    }

    #[test]
    fn slash_commands_are_recognised() {
        assert!(matches!(parse_input(" /exit "), Input::Exit));
        assert!(matches!(parse_input("/quit"), Input::Exit));
        assert!(matches!(parse_input("/reset"), Input::Reset));
        assert!(matches!(parse_input("/image cat.png"), Input::Image(path) if path == "cat.png"));
        assert!(matches!(parse_input("hello /reset"), Input::Message(text) if text == "hello /reset"));
    }
}
