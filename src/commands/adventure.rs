use clap::{Args, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::adventure::{
    Adventure, AdventureError, CONTINUE_COMMAND, RelayGameMaster, choose_location, start_command,
};
use crate::commands::cancel_on_ctrl_c;
use crate::commands::settings::{self, ModelArgs, RenderArgs, Settings};
use crate::config::OutputMode;
use crate::dispatch::Provider;
use crate::render::markdown::format_response;
use crate::render::palette::Palette;
use crate::render::reveal::{RenderSlot, RevealOutcome};
use crate::render::speech::{Pronunciations, plain_text};
use crate::render::target::{Notice, RenderTarget, TerminalTarget, lock, shared};
use crate::store::FileStore;
use crate::store::prefs::load_theme;
use crate::store::world::Difficulty;

#[derive(Debug, Args, Clone)]
pub struct AdventureArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub render: RenderArgs,
    #[command(subcommand)]
    command: AdventureSubcommand,
}

#[derive(Debug, Subcommand, Clone)]
enum AdventureSubcommand {
    /// Start a new game
    New {
        /// Starting location; random when omitted
        #[arg(long)]
        location: Option<String>,
        #[arg(long, default_value_t = Difficulty::Easy)]
        difficulty: Difficulty,
    },
    /// Resume the saved game
    Continue,
    /// Send one command to the game
    Play {
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// Print the saved world state
    Status,
}

fn game_master(settings: &Settings) -> Result<RelayGameMaster, String> {
    if settings.provider != Provider::Relay {
        return Err(format!(
            "The adventure runs against the relay provider only (got '{}').",
            settings.provider
        ));
    }
    Ok(RelayGameMaster::new(settings.client()))
}

async fn play(
    game: &mut Adventure<FileStore, RelayGameMaster>,
    settings: &Settings,
    target: &mut RenderSlot<TerminalTarget<std::io::Stdout>>,
    command: &str,
) -> Result<(), String> {
    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = game.play(command) => Some(result),
    };

    let text = match result {
        None => {
            watcher.abort();
            lock(target.target()).notice(&Notice::Stopped);
            return Ok(());
        }
        Some(Err(AdventureError::Dispatch(err))) => {
            watcher.abort();
            return Err(format!("Error: {err}"));
        }
        Some(Err(err)) => {
            watcher.abort();
            return Err(err.to_string());
        }
        Some(Ok(text)) => text,
    };

    let html = format_response(&text);
    let body = match settings.output {
        OutputMode::Json => {
            watcher.abort();
            println!(
                "{}",
                json!({ "text": text, "html": html, "world_state": game.world() })
            );
            return Ok(());
        }
        OutputMode::Text => plain_text(&html, &Pronunciations::empty()),
        OutputMode::Html => html,
    };

    target.start(body, || {});
    let outcome = target.wait(&cancel).await;
    watcher.abort();
    let mut terminal = lock(target.target());
    if outcome == Some(RevealOutcome::Stopped) {
        terminal.notice(&Notice::Stopped);
    } else {
        terminal.finish_line();
    }
    if game.world().game_over {
        terminal.line("The game is over.");
    }
    Ok(())
}

pub async fn run(args: AdventureArgs) -> Result<(), String> {
    let settings = settings::resolve(&args.model, &args.render)?;
    let storage = settings.storage();
    let palette = Palette::for_theme(load_theme(&storage));
    let mut slot = RenderSlot::new(
        shared(TerminalTarget::stdout(palette)),
        settings.reveal_delay,
    );

    match args.command {
        AdventureSubcommand::Status => {
            let game = Adventure::open(storage, game_master(&settings)?);
            let status = json!({
                "difficulty": game.difficulty(),
                "world_state": game.world(),
                "turns": game.history().len(),
            });
            let rendered = serde_json::to_string_pretty(&status)
                .map_err(|err| format!("Failed to encode world state: {err}"))?;
            println!("{rendered}");
            Ok(())
        }
        AdventureSubcommand::New {
            location,
            difficulty,
        } => {
            let mut game = Adventure::open(storage, game_master(&settings)?);
            let (location, announcement) =
                choose_location(location.as_deref(), &mut rand::thread_rng());
            game.new_game(location, difficulty)
                .map_err(|err| err.to_string())?;
            lock(slot.target()).line(&announcement);
            let command = start_command(game.world());
            play(&mut game, &settings, &mut slot, &command).await
        }
        AdventureSubcommand::Continue => {
            let mut game = Adventure::open(storage, game_master(&settings)?);
            play(&mut game, &settings, &mut slot, CONTINUE_COMMAND).await
        }
        AdventureSubcommand::Play { command } => {
            let mut game = Adventure::open(storage, game_master(&settings)?);
            play(&mut game, &settings, &mut slot, &command.join(" ")).await
        }
    }
}
