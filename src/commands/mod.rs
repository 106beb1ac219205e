pub mod adventure;
pub mod ask;
pub mod chat;
pub mod config;
pub mod history;
pub mod render;
pub mod settings;
pub mod theme;

use std::fs;
use std::path::Path;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn version_line(name: &str) -> String {
    format!(
        "{name} {} (commit: {}, built: {})",
        env!("CARGO_PKG_VERSION"),
        env!("PARLOR_GIT_SHA"),
        env!("PARLOR_BUILD_TS")
    )
}

/// Writes `contents` to `path`, creating missing parent directories.
pub(crate) fn save_output(path: &Path, contents: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create output directory '{}': {err}",
                parent.display()
            )
        })?;
    }
    fs::write(path, contents)
        .map_err(|err| format!("Failed to write output file '{}': {err}", path.display()))
}

/// Cancels `token` on Ctrl-C until the returned task is aborted.
pub(crate) fn cancel_on_ctrl_c(token: &CancellationToken) -> JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    token.cancel();
                }
            }
            _ = token.cancelled() => {}
        }
    })
}
