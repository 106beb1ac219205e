use std::process;

use clap::Parser;
use parlor::commands::ask::{self, AskArgs};
use parlor::logging;

#[derive(Debug, Parser)]
#[command(
    name = "parlask",
    about = "Ask one question and print the reply",
    disable_version_flag = true
)]
struct Cli {
    #[command(flatten)]
    ask: AskArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if !cli.ask.quiet {
        logging::init(u8::from(cli.ask.verbose));
    }
    if let Err(err) = ask::run(cli.ask).await {
        eprintln!("{err}");
        process::exit(1);
    }
}
