use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::thread;

use regex::Regex;
use tracing::{debug, warn};

use crate::render::markdown::unescape_html;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

/// Case-insensitive word substitutions applied before text is spoken.
#[derive(Debug, Clone)]
pub struct Pronunciations {
    rules: Vec<(Regex, String)>,
}

impl Pronunciations {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with(mut self, word: &str, spoken: impl Into<String>) -> Self {
        let pattern = format!("(?i){}", regex::escape(word));
        if let Ok(regex) = Regex::new(&pattern) {
            self.rules.push((regex, spoken.into()));
        }
        self
    }

    pub fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, (regex, spoken)| {
                regex.replace_all(&acc, regex::NoExpand(spoken)).into_owned()
            })
    }
}

impl Default for Pronunciations {
    fn default() -> Self {
        Self::empty()
            .with("Praterich", "Prah-ter-rich")
            .with("Stenoip", "Stick-noh-ip")
    }
}

/// Plain-text projection of formatted HTML: tags dropped, entities decoded,
/// pronunciations substituted.
pub fn plain_text(html: &str, pronunciations: &Pronunciations) -> String {
    let stripped = TAG.replace_all(html, "");
    pronunciations.apply(&unescape_html(&stripped))
}

/// Speaks whole messages. Starting a new utterance cancels the current one.
pub trait SpeechEngine: Send {
    fn speak(&mut self, text: &str) -> io::Result<()>;
    fn cancel(&mut self);
}

/// Speech disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl SpeechEngine for Silent {
    fn speak(&mut self, _text: &str) -> io::Result<()> {
        Ok(())
    }

    fn cancel(&mut self) {}
}

/// Hands each utterance to an external text-to-speech program such as `espeak`.
///
/// The text is written to the program's stdin, so replies of any length fit.
#[derive(Debug)]
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    current: Option<Child>,
}

impl CommandSpeech {
    /// Parses a whitespace-separated command line like `espeak -s 160`.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
            current: None,
        })
    }

    pub fn is_speaking(&mut self) -> bool {
        matches!(
            self.current.as_mut().map(|child| child.try_wait()),
            Some(Ok(None))
        )
    }
}

impl SpeechEngine for CommandSpeech {
    fn speak(&mut self, text: &str) -> io::Result<()> {
        self.cancel();
        if text.trim().is_empty() {
            return Ok(());
        }
        debug!(program = %self.program, chars = text.chars().count(), "starting speech");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let text = text.to_string();
            // A full pipe blocks until the program reads; keep that off the caller.
            thread::spawn(move || {
                if let Err(err) = stdin.write_all(text.as_bytes()) {
                    debug!(error = %err, "speech program stopped reading");
                }
            });
        }
        self.current = Some(child);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(mut child) = self.current.take() {
            if let Err(err) = child.kill() {
                if err.kind() != io::ErrorKind::InvalidInput {
                    warn!(error = %err, "failed to stop speech process");
                }
            }
            let _ = child.wait();
        }
    }
}
