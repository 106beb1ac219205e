use clap::{Args, Subcommand};

use crate::config;
use crate::store::FileStore;
use crate::store::prefs::{Theme, load_theme, save_theme};

#[derive(Debug, Args, Clone)]
pub struct ThemeArgs {
    #[arg(long, global = true)]
    profile: Option<String>,
    #[command(subcommand)]
    command: Option<ThemeSubcommand>,
}

#[derive(Debug, Subcommand, Clone)]
enum ThemeSubcommand {
    /// Print the current theme
    Show,
    /// Switch between light and dark
    Toggle,
    /// Set the theme explicitly
    Set { theme: Theme },
}

pub fn run(args: ThemeArgs) -> Result<(), String> {
    let profile = config::resolve_profile(args.profile.as_deref())?;
    let storage = FileStore::new(config::data_dir(&profile)?);
    let current = load_theme(&storage);

    let theme = match args.command.unwrap_or(ThemeSubcommand::Show) {
        ThemeSubcommand::Show => {
            println!("{current}");
            return Ok(());
        }
        ThemeSubcommand::Toggle => current.toggled(),
        ThemeSubcommand::Set { theme } => theme,
    };

    save_theme(&storage, theme).map_err(|err| err.to_string())?;
    println!("{theme}");
    Ok(())
}
