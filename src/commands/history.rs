use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_json::json;

use crate::commands::save_output;
use crate::config::{self, OutputMode};
use crate::render::palette::Palette;
use crate::render::speech::{Pronunciations, plain_text};
use crate::render::target::TerminalTarget;
use crate::store::history::HistoryStore;
use crate::store::prefs::{Theme, load_theme};
use crate::store::{FileStore, KeyValueStore, Role};

#[derive(Debug, Args, Clone)]
pub struct HistoryArgs {
    /// Profile whose data directory holds the history
    #[arg(long, global = true)]
    profile: Option<String>,
    #[command(subcommand)]
    command: HistorySubcommand,
}

#[derive(Debug, Subcommand, Clone)]
enum HistorySubcommand {
    /// Print the stored conversation
    Show {
        #[arg(long, value_enum, default_value_t = OutputMode::Text)]
        output: OutputMode,
    },
    /// Delete the stored conversation
    Clear,
    /// Write the conversation as a standalone HTML page
    Export {
        #[arg(long = "html", value_name = "FILE")]
        html: PathBuf,
    },
}

fn storage(profile: Option<&str>) -> Result<FileStore, String> {
    let profile = config::resolve_profile(profile)?;
    Ok(FileStore::new(config::data_dir(&profile)?))
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn show(history: &HistoryStore<FileStore>, output: OutputMode, theme: Theme) -> Result<(), String> {
    if output == OutputMode::Json {
        let turns: Vec<_> = history
            .turns()
            .iter()
            .zip(history.rendered())
            .map(|(turn, (role, html))| {
                json!({ "role": role_name(role), "text": turn.text, "html": html })
            })
            .collect();
        let rendered = serde_json::to_string_pretty(&turns)
            .map_err(|err| format!("Failed to encode history: {err}"))?;
        println!("{rendered}");
        return Ok(());
    }

    if history.is_empty() {
        println!("No conversation stored.");
        return Ok(());
    }

    let mut target = TerminalTarget::stdout(Palette::for_theme(theme));
    for (turn, (role, html)) in history.turns().iter().zip(history.rendered()) {
        let body = match (role, output) {
            (Role::User, _) => turn.text.clone(),
            (Role::Assistant, OutputMode::Text) => plain_text(&html, &Pronunciations::empty()),
            (Role::Assistant, _) => html,
        };
        target.line(&format!("{}: {body}", role_name(role)));
    }
    Ok(())
}

/// Standalone transcript page. User text is escaped; assistant text is formatted.
pub fn export_html<S: KeyValueStore>(history: &HistoryStore<S>, theme: Theme) -> String {
    let mut page = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Parlor transcript</title>\n\
<style>\nbody { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }\n\
body.dark_mode { background: #1e1e1e; color: #e6e6e6; }\n\
.message { margin: 1rem 0; padding: 0.75rem 1rem; border-radius: 0.5rem; }\n\
.user-message { background: rgba(90, 140, 255, 0.15); }\n\
.bot-message { background: rgba(160, 160, 160, 0.15); }\n\
pre { overflow-x: auto; }\n</style>\n</head>\n",
    );
    page.push_str(&format!("<body class=\"{}\">\n", theme.css_class()));
    for (role, html) in history.rendered() {
        let class = match role {
            Role::User => "user-message",
            Role::Assistant => "bot-message",
        };
        page.push_str(&format!(
            "<div class=\"message {class}\"><div class=\"message-text\">{html}</div></div>\n"
        ));
    }
    page.push_str("</body>\n</html>\n");
    page
}

pub fn run(args: HistoryArgs) -> Result<(), String> {
    let storage = storage(args.profile.as_deref())?;
    let theme = load_theme(&storage);
    let mut history = HistoryStore::open(storage);

    match args.command {
        HistorySubcommand::Show { output } => show(&history, output, theme),
        HistorySubcommand::Clear => {
            history.clear().map_err(|err| err.to_string())?;
            println!("History cleared.");
            Ok(())
        }
        HistorySubcommand::Export { html } => {
            save_output(&html, &export_html(&history, theme))?;
            println!("Exported {} turns to {}", history.len(), html.display());
            Ok(())
        }
    }
}
