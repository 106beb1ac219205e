//! Flag, environment and profile resolution shared by the subcommands.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::config::{self, OutputMode, ProfileConfig, env_parse, env_value, validate_temperature};
use crate::dispatch::{DispatchOptions, Provider, ProviderClient, SUPPORTED_PROVIDERS};
use crate::render::reveal::DEFAULT_REVEAL_DELAY;
use crate::render::speech::{CommandSpeech, Silent, SpeechEngine};
use crate::store::FileStore;

pub const DEFAULT_SYSTEM: &str = "You are Praterich, an AI developed by Stenoip Company. \
You speak naturally and conversationally, prefer metric units and never use raw HTML tags. \
Always use standard Markdown for formatting: **bold**, *italic*, `code` or fenced code blocks, \
`* ` bulleted lists, `#` headings and `---` horizontal rules.";

#[derive(Debug, Args, Clone, Default)]
pub struct ModelArgs {
    /// Profile from the config file
    #[arg(long)]
    pub profile: Option<String>,
    /// Backend: relay, gemini, groq, huggingface or local
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    /// System instruction sent with every request
    #[arg(long)]
    pub system: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long = "max-tokens")]
    pub max_tokens: Option<u32>,
    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Override the backend URL
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct RenderArgs {
    /// html, text or json
    #[arg(long, value_enum)]
    pub output: Option<OutputMode>,
    /// Shorthand for --output json
    #[arg(long)]
    pub json: bool,
    /// Milliseconds between reveal units
    #[arg(long = "reveal-delay-ms")]
    pub reveal_delay_ms: Option<u64>,
    /// Speak replies with this command, e.g. "espeak -s 160"
    #[arg(long)]
    pub speak: Option<String>,
}

/// Everything a command needs after flags, environment and profile are merged.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: Provider,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub system: String,
    pub options: DispatchOptions,
    pub output: OutputMode,
    pub reveal_delay: Duration,
    pub speech_command: Option<String>,
    pub data_dir: PathBuf,
}

impl Settings {
    pub fn client(&self) -> ProviderClient {
        ProviderClient::new(
            self.provider,
            self.model.clone(),
            self.endpoint.clone(),
            self.options,
        )
    }

    pub fn storage(&self) -> FileStore {
        FileStore::new(&self.data_dir)
    }

    pub fn speech(&self) -> Box<dyn SpeechEngine> {
        match self.speech_command.as_deref().and_then(CommandSpeech::from_command_line) {
            Some(speech) => Box::new(speech),
            None => Box::new(Silent),
        }
    }
}

fn parse_profile_value<T: std::str::FromStr<Err = String>>(
    label: &str,
    value: Option<&str>,
) -> Result<Option<T>, String> {
    value
        .map(|value| {
            value.parse::<T>().map_err(|err| {
                let reason = err.split_once(". ").map(|(_, rest)| rest).unwrap_or("");
                format!("Invalid profile {label} '{value}'. {reason}")
                    .trim_end()
                    .to_string()
            })
        })
        .transpose()
}

fn parse_env_provider() -> Result<Option<Provider>, String> {
    env_value("PARLOR_PROVIDER")
        .map(|value| {
            value.parse::<Provider>().map_err(|_| {
                format!("Invalid PARLOR_PROVIDER '{value}'. Supported values: {SUPPORTED_PROVIDERS}.")
            })
        })
        .transpose()
}

/// Merges flag > environment > profile > default.
pub fn resolve(model: &ModelArgs, render: &RenderArgs) -> Result<Settings, String> {
    let profile = config::resolve_profile(model.profile.as_deref())?;
    resolve_with_profile(model, render, &profile)
}

pub fn resolve_with_profile(
    model: &ModelArgs,
    render: &RenderArgs,
    profile: &ProfileConfig,
) -> Result<Settings, String> {
    let profile_provider = parse_profile_value::<Provider>("provider", profile.provider.as_deref())?;
    let profile_output = parse_profile_value::<OutputMode>("output", profile.output.as_deref())?;

    let provider = match &model.provider {
        Some(value) => value.parse::<Provider>()?,
        None => parse_env_provider()?
            .or(profile_provider)
            .unwrap_or(Provider::Relay),
    };

    let temperature = match model.temperature {
        Some(value) => Some(value),
        None => env_parse::<f32>("PARLOR_TEMPERATURE")?.or(profile.temperature),
    };
    let temperature = temperature.map(validate_temperature).transpose()?;

    let max_tokens = match model.max_tokens {
        Some(value) => Some(value),
        None => env_parse::<u32>("PARLOR_MAX_TOKENS")?.or(profile.max_tokens),
    };
    let timeout_secs = match model.timeout {
        Some(value) => Some(value),
        None => env_parse::<u64>("PARLOR_TIMEOUT")?.or(profile.timeout),
    };

    let output = if render.json {
        OutputMode::Json
    } else {
        render.output.or(profile_output).unwrap_or_default()
    };

    let reveal_delay = render
        .reveal_delay_ms
        .or(profile.reveal_delay_ms)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REVEAL_DELAY);
    if reveal_delay.is_zero() {
        return Err("Reveal delay must be greater than 0.".to_string());
    }

    Ok(Settings {
        provider,
        model: model
            .model
            .clone()
            .or_else(|| env_value("PARLOR_MODEL"))
            .or_else(|| profile.model.clone()),
        endpoint: model
            .endpoint
            .clone()
            .or_else(|| env_value("PARLOR_ENDPOINT"))
            .or_else(|| profile.endpoint.clone()),
        system: model
            .system
            .clone()
            .or_else(|| profile.system.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM.to_string()),
        options: DispatchOptions {
            temperature,
            max_tokens,
            timeout_secs,
            history_token_budget: profile.history_token_budget,
        },
        output,
        reveal_delay,
        speech_command: render.speak.clone().or_else(|| profile.speech_command.clone()),
        data_dir: config::data_dir(profile)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_profile_values_name_the_field() {
        let err = parse_profile_value::<Provider>("provider", Some("unknown")).unwrap_err();
        assert_eq!(
            err,
            "Invalid profile provider 'unknown'. Supported values: relay, gemini, groq, huggingface, local."
        );
        let err = parse_profile_value::<OutputMode>("output", Some("yaml")).unwrap_err();
        assert_eq!(err, "Invalid profile output 'yaml'. Supported values: html, text, json.");
    }

    #[test]
    fn flags_override_profile() {
        let profile = ProfileConfig {
            provider: Some("groq".to_string()),
            model: Some("profile-model".to_string()),
            output: Some("text".to_string()),
            reveal_delay_ms: Some(3),
            data_dir: Some(PathBuf::from("/tmp/parlor-test")),
            ..ProfileConfig::default()
        };
        let model = ModelArgs {
            provider: Some("gemini".to_string()),
            model: Some("cli-model".to_string()),
            ..ModelArgs::default()
        };
        let render = RenderArgs {
            json: true,
            ..RenderArgs::default()
        };

        let settings = resolve_with_profile(&model, &render, &profile).unwrap();
        assert_eq!(settings.provider, Provider::Gemini);
        assert_eq!(settings.model.as_deref(), Some("cli-model"));
        assert_eq!(settings.output, OutputMode::Json);
        assert_eq!(settings.reveal_delay, Duration::from_millis(3));
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let model = ModelArgs {
            temperature: Some(2.5),
            ..ModelArgs::default()
        };
        let profile = ProfileConfig {
            data_dir: Some(PathBuf::from("/tmp/parlor-test")),
            ..ProfileConfig::default()
        };
        let err = resolve_with_profile(&model, &RenderArgs::default(), &profile).unwrap_err();
        assert!(err.contains("between 0 and 2"));
    }
}
