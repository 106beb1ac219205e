use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde_json::json;

use crate::config::OutputMode;
use crate::render::markdown::format_response;
use crate::render::palette::Palette;
use crate::render::reveal::{DEFAULT_REVEAL_DELAY, reveal};
use crate::render::speech::{Pronunciations, plain_text};
use crate::render::target::{TerminalTarget, lock, shared};
use crate::store::prefs::Theme;

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Markdown file; stdin when omitted
    pub file: Option<PathBuf>,
    /// Print unit by unit like a live reply
    #[arg(long)]
    pub reveal: bool,
    #[arg(long, value_enum, default_value_t = OutputMode::Html)]
    pub output: OutputMode,
    #[arg(long = "reveal-delay-ms")]
    pub reveal_delay_ms: Option<u64>,
}

fn read_source(file: Option<&PathBuf>) -> Result<String, String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|err| format!("Failed to read '{}': {err}", path.display())),
        None => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .map_err(|err| format!("Failed to read stdin: {err}"))?;
            Ok(source)
        }
    }
}

pub async fn run(args: RenderArgs) -> Result<(), String> {
    let source = read_source(args.file.as_ref())?;
    let html = format_response(&source);

    let body = match args.output {
        OutputMode::Html => html,
        OutputMode::Text => plain_text(&html, &Pronunciations::empty()),
        OutputMode::Json => {
            println!("{}", json!({ "text": source, "html": html }));
            return Ok(());
        }
    };

    if !args.reveal {
        println!("{body}");
        return Ok(());
    }

    let delay = args
        .reveal_delay_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REVEAL_DELAY);
    let target = shared(TerminalTarget::stdout(Palette::for_theme(Theme::default())));
    reveal(body, target.clone(), delay, || {}).finished().await;
    lock(&target).finish_line();
    Ok(())
}
