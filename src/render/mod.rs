//! Reply rendering: Markdown formatting, incremental reveal and speech.

/// Markdown-to-HTML formatter.
pub mod markdown;
/// Terminal colours per theme.
pub mod palette;
/// Timer-driven incremental reveal.
pub mod reveal;
/// Plain-text projection and speech engines.
pub mod speech;
/// Render targets the revealer writes into.
pub mod target;

pub use markdown::format_response;
pub use reveal::{RenderSlot, RevealOutcome, reveal};
pub use target::{BufferTarget, Notice, RenderTarget, SharedTarget, TerminalTarget, shared};
