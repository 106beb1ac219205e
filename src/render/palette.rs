use owo_colors::AnsiColors;

use crate::store::prefs::Theme;

/// Terminal colours for role labels and notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub user: AnsiColors,
    pub assistant: AnsiColors,
    pub muted: AnsiColors,
    pub error: AnsiColors,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                user: AnsiColors::BrightCyan,
                assistant: AnsiColors::BrightMagenta,
                muted: AnsiColors::BrightBlack,
                error: AnsiColors::BrightRed,
            },
            Theme::Light => Self {
                user: AnsiColors::Blue,
                assistant: AnsiColors::Magenta,
                muted: AnsiColors::Black,
                error: AnsiColors::Red,
            },
        }
    }
}
