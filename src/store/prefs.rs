use std::fmt;
use std::str::FromStr;

use crate::store::StoreError;
use crate::store::kv::KeyValueStore;

pub const THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Durable value, also the page class of an exported transcript.
    pub fn css_class(self) -> &'static str {
        match self {
            Theme::Light => "light_mode",
            Theme::Dark => "dark_mode",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" | "light_mode" => Ok(Theme::Light),
            "dark" | "dark_mode" => Ok(Theme::Dark),
            other => Err(format!(
                "Invalid theme '{other}'. Supported values: light, dark."
            )),
        }
    }
}

/// Stored theme, falling back to dark when missing or unrecognised.
pub fn load_theme(storage: &impl KeyValueStore) -> Theme {
    storage
        .get(THEME_KEY)
        .ok()
        .flatten()
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

pub fn save_theme(storage: &impl KeyValueStore, theme: Theme) -> Result<(), StoreError> {
    storage.set(THEME_KEY, theme.css_class())
}
