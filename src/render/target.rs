use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use owo_colors::OwoColorize;

use crate::render::palette::Palette;

/// Something the revealer can write reveal units into.
pub trait RenderTarget: Send + 'static {
    /// Drops any previously rendered content.
    fn clear(&mut self);
    /// Appends one reveal unit: a single character or a complete tag.
    fn append(&mut self, unit: &str);
    fn scroll_to_end(&mut self) {}
    /// Shows a status line outside the revealed message body.
    fn notice(&mut self, notice: &Notice) {
        self.append(notice.message());
    }
}

/// Render target shared between its owner and the reveal task.
pub type SharedTarget<T> = Arc<Mutex<T>>;

pub fn shared<T: RenderTarget>(target: T) -> SharedTarget<T> {
    Arc::new(Mutex::new(target))
}

pub(crate) fn lock<T>(target: &Mutex<T>) -> MutexGuard<'_, T> {
    target.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Status lines shown in place of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The user stopped the response; neutral, not an error.
    Stopped,
    /// Transport or remote failure, shown verbatim.
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Stopped => "Response generation stopped.",
            Notice::Error(message) => message,
        }
    }
}

/// In-memory target that keeps the rendered content and every appended unit.
#[derive(Debug, Default, Clone)]
pub struct BufferTarget {
    content: String,
    units: Vec<String>,
    notices: Vec<Notice>,
    scrolls: usize,
}

impl BufferTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn scrolls(&self) -> usize {
        self.scrolls
    }
}

impl RenderTarget for BufferTarget {
    fn clear(&mut self) {
        self.content.clear();
        self.units.clear();
    }

    fn append(&mut self, unit: &str) {
        self.content.push_str(unit);
        self.units.push(unit.to_string());
    }

    fn scroll_to_end(&mut self) {
        self.scrolls += 1;
    }

    fn notice(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

/// Writes reveal units straight to a terminal stream.
pub struct TerminalTarget<W> {
    out: W,
    palette: Palette,
    mid_line: bool,
    error_notices: bool,
}

impl TerminalTarget<io::Stdout> {
    pub fn stdout(palette: Palette) -> Self {
        Self::new(io::stdout(), palette)
    }
}

impl<W: Write + Send + 'static> TerminalTarget<W> {
    pub fn new(out: W, palette: Palette) -> Self {
        Self {
            out,
            palette,
            mid_line: false,
            error_notices: true,
        }
    }

    /// Leaves error notices to the caller, e.g. for reporting on stderr.
    pub fn without_error_notices(mut self) -> Self {
        self.error_notices = false;
        self
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
    }

    /// Writes a whole line outside any reveal.
    pub fn line(&mut self, text: &str) {
        self.finish_line();
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }

    pub fn out(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Ends the current message with a line break.
    pub fn finish_line(&mut self) {
        if self.mid_line {
            let _ = writeln!(self.out);
            self.mid_line = false;
        }
        let _ = self.out.flush();
    }
}

impl<W: Write + Send + 'static> RenderTarget for TerminalTarget<W> {
    // The terminal keeps its scrollback; a new message starts on a fresh line instead.
    fn clear(&mut self) {}

    fn append(&mut self, unit: &str) {
        let _ = self.out.write_all(unit.as_bytes());
        if !unit.is_empty() {
            self.mid_line = !unit.ends_with('\n');
        }
    }

    fn scroll_to_end(&mut self) {
        let _ = self.out.flush();
    }

    fn notice(&mut self, notice: &Notice) {
        let line = match notice {
            Notice::Stopped => format!("{}", notice.message().color(self.palette.muted)),
            Notice::Error(_) if !self.error_notices => return,
            Notice::Error(message) => {
                format!("{}", format!("Error: {message}").color(self.palette.error))
            }
        };
        self.line(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::prefs::Theme;

    #[test]
    fn buffer_target_tracks_units_and_notices() {
        let mut target = BufferTarget::new();
        target.append("<p>");
        target.append("a");
        target.scroll_to_end();
        target.notice(&Notice::Stopped);

        assert_eq!(target.content(), "<p>a");
        assert_eq!(target.units(), ["<p>", "a"]);
        assert_eq!(target.notices(), [Notice::Stopped]);
        assert_eq!(target.scrolls(), 1);

        target.clear();
        assert!(target.content().is_empty());
        assert!(target.units().is_empty());
    }

    #[test]
    fn terminal_target_writes_units_and_error_notices() {
        let mut target = TerminalTarget::new(Vec::new(), Palette::for_theme(Theme::Dark));
        target.append("hi");
        target.notice(&Notice::Error("boom".to_string()));

        let written = String::from_utf8(target.into_inner()).unwrap();
        assert!(written.starts_with("hi"));
        assert!(written.contains("Error: boom"));
    }

    #[test]
    fn notices_start_on_a_fresh_line_and_errors_can_be_suppressed() {
        let mut target = TerminalTarget::new(Vec::new(), Palette::for_theme(Theme::Light))
            .without_error_notices();
        target.append("<p>partial");
        target.notice(&Notice::Error("hidden".to_string()));
        target.notice(&Notice::Stopped);

        let written = String::from_utf8(target.into_inner()).unwrap();
        assert!(written.starts_with("<p>partial\n"));
        assert!(!written.contains("hidden"));
        assert!(written.contains("Response generation stopped."));
    }
}
