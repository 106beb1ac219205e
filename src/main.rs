use std::io;
use std::process;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use parlor::commands::adventure::{self, AdventureArgs};
use parlor::commands::ask::{self, AskArgs};
use parlor::commands::chat::{self, ChatArgs};
use parlor::commands::config::{self, ConfigArgs};
use parlor::commands::history::{self, HistoryArgs};
use parlor::commands::render::{self, RenderArgs};
use parlor::commands::theme::{self, ThemeArgs};
use parlor::commands::version_line;
use parlor::logging;

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  parlor ask \"What is a tide pool?\"\n  echo \"Summarise this\" | parlor ask --provider groq --output text\n  parlor chat --provider gemini\n  parlor history export --html transcript.html\n  parlor adventure new --location \"A peaceful meadow\"\n  parlor completion bash > ~/.local/share/bash-completion/completions/parlor";

const ASK_HELP_EXAMPLES: &str = "Examples:\n  parlor ask \"What is a tide pool?\"\n  parlor ask --provider huggingface --image photo.png \"What is in this picture?\"\n  parlor ask --provider groq --dry-run \"Explain recursion\"\n  parlor ask --history --output text \"And what about loops?\"";

#[derive(Debug, Parser)]
#[command(
    name = "parlor",
    about = "Chat with hosted and self-hosted LLM backends from the terminal",
    after_help = ROOT_HELP_EXAMPLES
)]
struct Cli {
    /// Print version and build metadata
    #[arg(long, short = 'V')]
    version: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Ask one question and print the reply", after_help = ASK_HELP_EXAMPLES)]
    Ask(AskArgs),
    #[command(about = "Interactive conversation with a stored history")]
    Chat(ChatArgs),
    #[command(about = "Show, clear or export the stored conversation")]
    History(HistoryArgs),
    #[command(about = "Format Markdown the way replies are formatted")]
    Render(RenderArgs),
    #[command(about = "Play the text adventure")]
    Adventure(AdventureArgs),
    #[command(about = "Show or change the colour theme")]
    Theme(ThemeArgs),
    #[command(about = "Manage local config")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "parlor", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "parlor", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "parlor", &mut io::stdout()),
    }
}

fn verbosity(command: &Commands) -> Option<u8> {
    match command {
        Commands::Ask(args) if args.quiet => None,
        Commands::Ask(args) => Some(u8::from(args.verbose)),
        Commands::Completion { .. } => None,
        _ => Some(0),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", version_line("parlor"));
        return;
    }
    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        process::exit(2);
    };

    if let Some(level) = verbosity(&command) {
        logging::init(level);
    }

    let result = match command {
        Commands::Ask(args) => ask::run(args).await,
        Commands::Chat(args) => chat::run(args).await,
        Commands::History(args) => history::run(args),
        Commands::Render(args) => render::run(args).await,
        Commands::Adventure(args) => adventure::run(args).await,
        Commands::Theme(args) => theme::run(args),
        Commands::Config(args) => config::run(args),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
