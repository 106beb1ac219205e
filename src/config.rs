use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::Deserialize;

use crate::dispatch::Provider;

pub const CONFIG_ENV: &str = "PARLOR_CONFIG";
pub const DATA_DIR_ENV: &str = "PARLOR_DATA_DIR";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<u64>,
    pub endpoint: Option<String>,
    pub output: Option<String>,
    pub reveal_delay_ms: Option<u64>,
    pub speech_command: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub history_token_budget: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    profiles: Option<BTreeMap<String, ProfileConfig>>,
}

/// How a reply is written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputMode {
    /// Formatted HTML, revealed unit by unit.
    #[default]
    Html,
    /// Plain-text projection of the formatted reply.
    Text,
    /// One JSON object `{text, html}`, no reveal.
    Json,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Html => "html",
            OutputMode::Text => "text",
            OutputMode::Json => "json",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(OutputMode::Html),
            "text" => Ok(OutputMode::Text),
            "json" => Ok(OutputMode::Json),
            other => Err(format!(
                "Invalid output '{other}'. Supported values: html, text, json."
            )),
        }
    }
}

fn read_config(path: &Path) -> Result<ConfigFile, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config file '{}': {err}", path.display()))?;

    toml::from_str(&raw)
        .map_err(|err| format!("Failed to parse config file '{}': {err}", path.display()))
}

pub fn load_profile(name: &str) -> Result<ProfileConfig, String> {
    let path = config_path()?;
    let config = read_config(&path)?;

    let profiles = config.profiles.ok_or_else(|| {
        format!(
            "Config file '{}' does not contain a [profiles] section.",
            path.display()
        )
    })?;

    profiles.get(name).cloned().ok_or_else(|| {
        format!(
            "Profile '{}' not found in config file '{}'.",
            name,
            path.display()
        )
    })
}

/// Loads the named profile, or an empty one when no profile was asked for.
pub fn resolve_profile(name: Option<&str>) -> Result<ProfileConfig, String> {
    match name {
        Some(name) => load_profile(name),
        None => Ok(ProfileConfig::default()),
    }
}

/// Parses the config file and checks every profile (or only `profile`).
/// Returns the path that was checked.
pub fn validate_config(profile: Option<&str>) -> Result<PathBuf, String> {
    let path = config_path()?;
    let config = read_config(&path)?;
    let profiles = config.profiles.unwrap_or_default();

    match profile {
        Some(name) => {
            let selected = profiles.get(name).ok_or_else(|| {
                format!(
                    "Profile '{}' not found in config file '{}'.",
                    name,
                    path.display()
                )
            })?;
            validate_profile(name, selected)?;
        }
        None => {
            for (name, selected) in &profiles {
                validate_profile(name, selected)?;
            }
        }
    }

    Ok(path)
}

fn validate_profile(name: &str, profile: &ProfileConfig) -> Result<(), String> {
    let invalid = |reason: String| format!("Profile '{name}': {reason}");

    if let Some(provider) = &profile.provider {
        provider.parse::<Provider>().map_err(invalid)?;
    }
    if let Some(output) = &profile.output {
        output.parse::<OutputMode>().map_err(invalid)?;
    }
    if let Some(temperature) = profile.temperature {
        validate_temperature(temperature).map_err(invalid)?;
    }
    if profile.reveal_delay_ms == Some(0) {
        return Err(invalid("reveal_delay_ms must be greater than 0.".to_string()));
    }
    if profile.max_tokens == Some(0) {
        return Err(invalid("max_tokens must be greater than 0.".to_string()));
    }
    Ok(())
}

pub fn validate_temperature(temperature: f32) -> Result<f32, String> {
    if (0.0..=2.0).contains(&temperature) {
        Ok(temperature)
    } else {
        Err(format!(
            "Invalid temperature {temperature}. Expected a value between 0 and 2."
        ))
    }
}

pub fn config_path() -> Result<PathBuf, String> {
    if let Some(path) = env_value(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    if let Some(xdg) = env_value("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("parlor").join("config.toml"));
    }

    let home = env_value("HOME").ok_or_else(|| {
        format!("Cannot resolve config path: set {CONFIG_ENV} or HOME/XDG_CONFIG_HOME.")
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("parlor")
        .join("config.toml"))
}

/// Directory holding the durable key/value entries.
pub fn data_dir(profile: &ProfileConfig) -> Result<PathBuf, String> {
    if let Some(path) = env_value(DATA_DIR_ENV) {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = &profile.data_dir {
        return Ok(path.clone());
    }

    if let Some(xdg) = env_value("XDG_DATA_HOME") {
        return Ok(PathBuf::from(xdg).join("parlor"));
    }

    let home = env_value("HOME").ok_or_else(|| {
        format!("Cannot resolve data directory: set {DATA_DIR_ENV} or HOME/XDG_DATA_HOME.")
    })?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("parlor"))
}

/// Non-empty, trimmed value of an environment variable.
pub fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parses an environment variable, naming it in the error.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env_value(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|err| format!("Invalid {name} '{value}': {err}"))
        })
        .transpose()
}
