use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub const LOG_ENV: &str = "PARLOR_LOG";

/// Installs the stderr subscriber. `verbosity` raises the fallback level
/// when `PARLOR_LOG` is unset or invalid.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
