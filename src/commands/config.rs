use clap::{Args, Subcommand};
use serde_json::json;

use crate::commands::settings::{self, ModelArgs, RenderArgs};
use crate::config;

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand, Clone)]
enum ConfigSubcommand {
    /// Validate the config file
    Check {
        #[arg(long)]
        profile: Option<String>,
    },
    /// Print where the config file and data directory are
    Path {
        #[arg(long)]
        profile: Option<String>,
    },
    /// Print the settings a command would run with
    Show {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        render: RenderArgs,
    },
}

pub fn run(args: ConfigArgs) -> Result<(), String> {
    match args.command {
        ConfigSubcommand::Check { profile } => {
            let path = config::validate_config(profile.as_deref())?;
            println!("config OK: {}", path.display());
            Ok(())
        }
        ConfigSubcommand::Path { profile } => {
            let selected = config::resolve_profile(profile.as_deref())?;
            println!("config: {}", config::config_path()?.display());
            println!("data: {}", config::data_dir(&selected)?.display());
            Ok(())
        }
        ConfigSubcommand::Show { model, render } => {
            let resolved = settings::resolve(&model, &render)?;
            let client = resolved.client();
            let body = json!({
                "provider": resolved.provider.as_str(),
                "model": client.model(),
                "endpoint": client.endpoint(),
                "output": resolved.output.as_str(),
                "temperature": resolved.options.temperature,
                "max_tokens": resolved.options.max_tokens,
                "timeout_secs": resolved.options.timeout_secs,
                "history_token_budget": resolved.options.history_token_budget,
                "reveal_delay_ms": resolved.reveal_delay.as_millis() as u64,
                "speech_command": resolved.speech_command,
                "data_dir": resolved.data_dir.display().to_string(),
            });
            let rendered = serde_json::to_string_pretty(&body)
                .map_err(|err| format!("Failed to encode settings: {err}"))?;
            println!("{rendered}");
            Ok(())
        }
    }
}
