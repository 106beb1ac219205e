//! One chat conversation: dispatch, formatting, reveal, speech and history.
//!
//! Everything the session touches is handed to it once through
//! [`ChatContext`]. A session serves one request at a time; a second
//! submission while a reply is outstanding or still revealing is rejected
//! with [`SessionError::Busy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OutputMode;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::render::markdown::format_response;
use crate::render::reveal::{DEFAULT_REVEAL_DELAY, RenderSlot, RevealOutcome};
use crate::render::speech::{Pronunciations, Silent, SpeechEngine, plain_text};
use crate::render::target::{Notice, RenderTarget, SharedTarget, lock};
use crate::store::history::{HISTORY_KEY, HistoryStore, Role, Turn};
use crate::store::{Attachment, KeyValueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A response is already in progress.")]
    Busy,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Response generation stopped.")]
    Cancelled,
    #[error("Failed to save history: {0}")]
    Store(#[from] StoreError),
}

/// Collaborators of a [`Session`], built once by the caller.
pub struct ChatContext<S, T> {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub storage: S,
    pub history_key: String,
    pub target: SharedTarget<T>,
    pub speech: Box<dyn SpeechEngine>,
    pub system: String,
    pub output: OutputMode,
    pub reveal_delay: Duration,
    pub pronunciations: Pronunciations,
}

impl<S, T> ChatContext<S, T> {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, storage: S, target: SharedTarget<T>) -> Self {
        Self {
            dispatcher,
            storage,
            history_key: HISTORY_KEY.to_string(),
            target,
            speech: Box::new(Silent),
            system: String::new(),
            output: OutputMode::Html,
            reveal_delay: DEFAULT_REVEAL_DELAY,
            pronunciations: Pronunciations::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_speech(mut self, speech: Box<dyn SpeechEngine>) -> Self {
        self.speech = speech;
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn with_reveal_delay(mut self, delay: Duration) -> Self {
        self.reveal_delay = delay;
        self
    }

    pub fn with_history_key(mut self, key: impl Into<String>) -> Self {
        self.history_key = key.into();
        self
    }
}

/// A reply that was received and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub html: String,
    /// `None` when the output mode skips the reveal.
    pub reveal: Option<RevealOutcome>,
}

pub struct Session<S, T> {
    dispatcher: Arc<dyn Dispatcher>,
    system: String,
    output: OutputMode,
    pronunciations: Pronunciations,
    history: Mutex<HistoryStore<S>>,
    target: SharedTarget<T>,
    slot: tokio::sync::Mutex<RenderSlot<T>>,
    speech: Mutex<Box<dyn SpeechEngine>>,
    responding: AtomicBool,
}

struct Responding<'a>(&'a AtomicBool);

impl Drop for Responding<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: KeyValueStore, T: RenderTarget> Session<S, T> {
    /// Opens the stored conversation and takes ownership of the context.
    pub fn new(context: ChatContext<S, T>) -> Self {
        let history = HistoryStore::open_key(context.storage, context.history_key);
        Self {
            dispatcher: context.dispatcher,
            system: context.system,
            output: context.output,
            pronunciations: context.pronunciations,
            history: Mutex::new(history),
            slot: tokio::sync::Mutex::new(RenderSlot::new(
                context.target.clone(),
                context.reveal_delay,
            )),
            target: context.target,
            speech: Mutex::new(context.speech),
            responding: AtomicBool::new(false),
        }
    }

    pub fn is_responding(&self) -> bool {
        self.responding.load(Ordering::Acquire)
    }

    pub fn target(&self) -> &SharedTarget<T> {
        &self.target
    }

    pub fn turns(&self) -> Vec<Turn> {
        lock(&self.history).turns().to_vec()
    }

    pub fn rendered(&self) -> Vec<(Role, String)> {
        lock(&self.history).rendered()
    }

    fn begin(&self) -> Result<Responding<'_>, SessionError> {
        if self.responding.swap(true, Ordering::AcqRel) {
            return Err(SessionError::Busy);
        }
        Ok(Responding(&self.responding))
    }

    fn notify(&self, notice: Notice) {
        lock(&self.target).notice(&notice);
    }

    /// Sends `text` and renders the reply.
    ///
    /// Returns `Ok(None)` for empty input. `cancel` aborts the request while
    /// it is outstanding and stops the reveal afterwards; a reply that was
    /// already received is kept even when its reveal is stopped.
    pub async fn submit(
        &self,
        text: &str,
        attachment: Option<Attachment>,
        cancel: &CancellationToken,
    ) -> Result<Option<Reply>, SessionError> {
        if text.trim().is_empty() && attachment.is_none() {
            return Ok(None);
        }
        let _responding = self.begin()?;

        let new_turn = Turn::user(text).with_attachment(attachment);
        let history = self.turns();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.dispatcher.send(&self.system, &history, &new_turn) => Some(result),
        };

        let text = match result {
            None => {
                debug!("request cancelled before a reply arrived");
                self.notify(Notice::Stopped);
                return Err(SessionError::Cancelled);
            }
            Some(Err(err)) => {
                debug!(error = %err, "dispatch failed");
                self.notify(Notice::Error(err.to_string()));
                return Err(err.into());
            }
            Some(Ok(text)) => text,
        };

        {
            let mut history = lock(&self.history);
            history.append(new_turn);
            history.append(Turn::assistant(text.clone()));
        }

        let html = format_response(&text);
        if let Err(err) = lock(&self.speech).speak(&plain_text(&html, &self.pronunciations)) {
            warn!(error = %err, "speech failed to start");
        }

        let reveal = match self.output {
            OutputMode::Json => None,
            OutputMode::Html | OutputMode::Text => {
                let body = match self.output {
                    OutputMode::Text => plain_text(&html, &Pronunciations::empty()),
                    _ => html.clone(),
                };
                let mut slot = self.slot.lock().await;
                slot.start(body, || debug!("reply fully revealed"));
                slot.wait(cancel).await
            }
        };

        if reveal == Some(RevealOutcome::Stopped) {
            lock(&self.speech).cancel();
            self.notify(Notice::Stopped);
        }

        lock(&self.history).persist()?;

        Ok(Some(Reply { text, html, reveal }))
    }

    /// Stops speech and any reveal, then forgets the conversation.
    pub fn reset(&self) -> Result<(), SessionError> {
        let _responding = self.begin()?;
        if let Ok(mut slot) = self.slot.try_lock() {
            slot.stop();
        }
        lock(&self.speech).cancel();
        lock(&self.target).clear();
        lock(&self.history).clear()?;
        Ok(())
    }
}
