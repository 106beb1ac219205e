//! Incremental reveal of formatted HTML.
//!
//! A reveal task appends one unit per timer tick to a render target, where a
//! unit is either a single character or a whole `<...>` tag, so the target
//! never holds a truncated tag. Each target owns at most one running task
//! through [`RenderSlot`]; starting a new reveal stops the previous one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::render::target::{RenderTarget, SharedTarget, lock};

pub const DEFAULT_REVEAL_DELAY: Duration = Duration::from_millis(10);

/// Returns the byte offset just past the unit starting at `index`.
///
/// A `<` with a later `>` spans to that `>`; a `<` with none is a plain character.
pub fn next_unit_end(source: &str, index: usize) -> Option<usize> {
    let rest = source.get(index..)?;
    let ch = rest.chars().next()?;
    if ch == '<' {
        if let Some(offset) = rest.find('>') {
            return Some(index + offset + 1);
        }
    }
    Some(index + ch.len_utf8())
}

/// Iterator over the reveal units of a string.
pub struct RevealUnits<'a> {
    source: &'a str,
    index: usize,
}

pub fn reveal_units(source: &str) -> RevealUnits<'_> {
    RevealUnits { source, index: 0 }
}

impl<'a> Iterator for RevealUnits<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let end = next_unit_end(self.source, self.index)?;
        let unit = &self.source[self.index..end];
        self.index = end;
        Some(unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    Completed,
    Stopped,
}

/// Stops a running reveal from outside the task.
#[derive(Debug, Clone)]
pub struct RevealStopper {
    token: CancellationToken,
    tick: Arc<Mutex<()>>,
}

impl RevealStopper {
    /// Once this returns the target receives no further units.
    pub fn stop(&self) {
        let _tick = lock(&self.tick);
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Per-message reveal state: the source, the revealed offset and the timer task.
pub struct RevealHandle {
    stopper: RevealStopper,
    revealed: Arc<AtomicUsize>,
    len: usize,
    task: JoinHandle<RevealOutcome>,
}

impl RevealHandle {
    pub fn stopper(&self) -> RevealStopper {
        self.stopper.clone()
    }

    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// Byte offset into the source that the target currently shows.
    pub fn revealed_index(&self) -> usize {
        self.revealed.load(Ordering::Acquire)
    }

    pub fn source_len(&self) -> usize {
        self.len
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn finished(self) -> RevealOutcome {
        self.task.await.unwrap_or(RevealOutcome::Stopped)
    }
}

/// Starts revealing `html` into `target`, one unit every `delay`.
///
/// The target is cleared first. `on_done` runs once the whole source has
/// been appended and never runs for a stopped reveal. Must be called from
/// within a tokio runtime.
pub fn reveal<T, F>(
    html: String,
    target: SharedTarget<T>,
    delay: Duration,
    on_done: F,
) -> RevealHandle
where
    T: RenderTarget,
    F: FnOnce() + Send + 'static,
{
    let stopper = RevealStopper {
        token: CancellationToken::new(),
        tick: Arc::new(Mutex::new(())),
    };
    let revealed = Arc::new(AtomicUsize::new(0));
    let len = html.len();

    let task = tokio::spawn({
        let stopper = stopper.clone();
        let revealed = revealed.clone();
        async move {
            lock(&target).clear();

            let mut ticker = time::interval(delay);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut index = 0;

            while index < html.len() {
                tokio::select! {
                    biased;
                    _ = stopper.token.cancelled() => return RevealOutcome::Stopped,
                    _ = ticker.tick() => {}
                }

                let _tick = lock(&stopper.tick);
                if stopper.token.is_cancelled() {
                    return RevealOutcome::Stopped;
                }
                let Some(end) = next_unit_end(&html, index) else {
                    break;
                };
                let mut target = lock(&target);
                target.append(&html[index..end]);
                target.scroll_to_end();
                index = end;
                revealed.store(index, Ordering::Release);
            }

            debug!(bytes = index, "reveal completed");
            on_done();
            RevealOutcome::Completed
        }
    });

    RevealHandle {
        stopper,
        revealed,
        len,
        task,
    }
}

/// Owns the single active reveal of one render target.
pub struct RenderSlot<T> {
    target: SharedTarget<T>,
    delay: Duration,
    active: Option<RevealHandle>,
}

impl<T: RenderTarget> RenderSlot<T> {
    pub fn new(target: SharedTarget<T>, delay: Duration) -> Self {
        Self {
            target,
            delay,
            active: None,
        }
    }

    pub fn target(&self) -> &SharedTarget<T> {
        &self.target
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Stops any running reveal, then starts revealing `html`.
    pub fn start<F>(&mut self, html: String, on_done: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stop();
        self.active = Some(reveal(html, self.target.clone(), self.delay, on_done));
    }

    /// Stops the running reveal, if any. Returns whether one was running.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.stop();
                running
            }
            None => false,
        }
    }

    pub fn active(&self) -> Option<&RevealHandle> {
        self.active.as_ref()
    }

    /// Waits for the active reveal to finish, stopping it early when `stop` fires.
    pub async fn wait(&mut self, stop: &CancellationToken) -> Option<RevealOutcome> {
        let handle = self.active.take()?;
        let stopper = handle.stopper();
        let outcome = tokio::select! {
            outcome = handle.finished() => outcome,
            _ = stop.cancelled() => {
                stopper.stop();
                RevealOutcome::Stopped
            }
        };
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::target::{BufferTarget, Notice, shared};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    fn assert_no_open_tag(content: &str) {
        if let Some(open) = content.rfind('<') {
            assert!(
                content[open..].contains('>'),
                "target holds a truncated tag: {content:?}"
            );
        }
    }

    #[test]
    fn units_reconstruct_source_and_keep_tags_whole() {
        let html = "<p>Hi <strong>you</strong> ü</p>\n<ul>\n<li>a</li>\n</ul>";
        let units: Vec<&str> = reveal_units(html).collect();

        assert_eq!(units.concat(), html);
        assert_eq!(units[0], "<p>");
        assert!(units.contains(&"<strong>"));
        assert!(units.contains(&"ü"));

        let mut shown = String::new();
        for unit in &units {
            shown.push_str(unit);
            assert_no_open_tag(&shown);
        }
    }

    #[test]
    fn lone_angle_bracket_is_a_plain_character() {
        let units: Vec<&str> = reveal_units("a < b").collect();
        assert_eq!(units, ["a", " ", "<", " ", "b"]);
        let units: Vec<&str> = reveal_units("1 < 2 > 0").collect();
        assert_eq!(units, ["1", " ", "< 2 >", " ", "0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_completes_and_runs_callback() {
        let target = shared(BufferTarget::new());
        let done = Arc::new(AtomicBool::new(false));
        let html = "<p>one <em>two</em></p>".to_string();

        let handle = reveal(html.clone(), target.clone(), DEFAULT_REVEAL_DELAY, {
            let done = done.clone();
            move || done.store(true, Ordering::SeqCst)
        });
        assert_eq!(handle.source_len(), html.len());
        assert_eq!(handle.finished().await, RevealOutcome::Completed);

        let target = lock(&target);
        assert_eq!(target.content(), html);
        assert_eq!(target.units().len(), reveal_units(&html).count());
        assert!(done.load(Ordering::SeqCst));
    }

    struct CountingTarget {
        units: Vec<String>,
        tx: mpsc::UnboundedSender<usize>,
    }

    impl RenderTarget for CountingTarget {
        fn clear(&mut self) {
            self.units.clear();
        }

        fn append(&mut self, unit: &str) {
            self.units.push(unit.to_string());
            let _ = self.tx.send(self.units.len());
        }

        fn notice(&mut self, _notice: &Notice) {}
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_mid_reveal_freezes_the_target() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let target = shared(CountingTarget {
            units: Vec::new(),
            tx,
        });
        let html = "abcdefghijklmnopqrst".to_string();
        let done = Arc::new(AtomicBool::new(false));

        let handle = reveal(html.clone(), target.clone(), DEFAULT_REVEAL_DELAY, {
            let done = done.clone();
            move || done.store(true, Ordering::SeqCst)
        });
        while let Some(count) = rx.recv().await {
            if count == 5 {
                break;
            }
        }
        handle.stop();
        assert_eq!(handle.revealed_index(), 5);

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.finished().await, RevealOutcome::Stopped);
        assert_eq!(lock(&target).units.concat(), "abcde");
        assert!(!done.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn starting_a_new_reveal_stops_the_previous_one() {
        let target = shared(BufferTarget::new());
        let mut slot = RenderSlot::new(target.clone(), DEFAULT_REVEAL_DELAY);

        slot.start("first message that is long".to_string(), || {});
        time::sleep(Duration::from_millis(35)).await;
        slot.start("second".to_string(), || {});

        let stop = CancellationToken::new();
        assert_eq!(slot.wait(&stop).await, Some(RevealOutcome::Completed));
        assert_eq!(lock(&target).content(), "second");
        assert!(slot.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_stops_when_token_fires() {
        let target = shared(BufferTarget::new());
        let mut slot = RenderSlot::new(target.clone(), Duration::from_secs(1));
        slot.start("abcdef".to_string(), || {});

        let stop = CancellationToken::new();
        stop.cancel();
        assert_eq!(slot.wait(&stop).await, Some(RevealOutcome::Stopped));
        assert!(!slot.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_completes_immediately() {
        let target = shared(BufferTarget::new());
        let handle = reveal(String::new(), target.clone(), DEFAULT_REVEAL_DELAY, || {});
        assert_eq!(handle.finished().await, RevealOutcome::Completed);
        assert!(lock(&target).content().is_empty());
    }
}
