//! Download state and the fields shared between the client and its worker.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use super::config::HostOptions;
use super::locator::{Locator, Protocol};

/// Download state machine states.
///
/// A download moves `Idle → Connecting → Downloading → Closing → Finished
/// → Idle`. `Finished` is transient and turns into `Idle` without an
/// event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No download in flight.
    Idle,
    /// Resolving and connecting.
    Connecting,
    /// Requesting and receiving.
    Downloading,
    /// Tearing down after completion or failure.
    Closing,
    /// Done; about to return to idle.
    Finished,
}

impl State {
    /// Returns true when a new download may start.
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::Finished)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Downloading => "downloading",
            Self::Closing => "closing",
            Self::Finished => "finished",
        })
    }
}

/// Target configured with `set_target`.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub locator: Locator,
    pub protocol: Protocol,
    pub options: HostOptions,
}

#[derive(Debug)]
struct Guarded {
    state: State,
    target: Option<Target>,
    close_when_done: bool,
    total_size: Option<usize>,
}

/// Fields the public API touches concurrently with the worker.
///
/// The mutex is held only for field access, never across an await.
#[derive(Debug)]
pub(crate) struct Shared {
    guarded: Mutex<Guarded>,
    progress: AtomicUsize,
    state_tx: watch::Sender<State>,
}

impl Shared {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(State::Idle);
        Self {
            guarded: Mutex::new(Guarded {
                state: State::Idle,
                target: None,
                close_when_done: false,
                total_size: None,
            }),
            progress: AtomicUsize::new(0),
            state_tx,
        }
    }

    pub fn state(&self) -> State {
        self.guarded.lock().state
    }

    pub fn set_state(&self, state: State) {
        let mut guarded = self.guarded.lock();
        if guarded.state != state {
            trace!(from = %guarded.state, to = %state, "state change");
            guarded.state = state;
            self.state_tx.send_replace(state);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state_tx.subscribe()
    }

    /// Stores a new target unless a download is in flight.
    pub fn set_target(&self, target: Target, close_when_done: bool) -> Result<(), State> {
        let mut guarded = self.guarded.lock();
        if !guarded.state.is_idle() {
            return Err(guarded.state);
        }
        guarded.target = Some(target);
        guarded.close_when_done = close_when_done;
        Ok(())
    }

    /// Moves an idle client to `Connecting` and returns the target to
    /// download.
    pub fn begin(&self) -> Result<Option<Target>, State> {
        let mut guarded = self.guarded.lock();
        if !guarded.state.is_idle() {
            return Err(guarded.state);
        }
        let Some(target) = guarded.target.clone() else {
            return Ok(None);
        };
        guarded.state = State::Connecting;
        guarded.total_size = None;
        self.progress.store(0, Ordering::SeqCst);
        self.state_tx.send_replace(State::Connecting);
        Ok(Some(target))
    }

    pub fn close_when_done(&self) -> bool {
        self.guarded.lock().close_when_done
    }

    pub fn total_size(&self) -> Option<usize> {
        self.guarded.lock().total_size
    }

    pub fn set_total_size(&self, size: usize) {
        let mut guarded = self.guarded.lock();
        if guarded.total_size.is_none() {
            guarded.total_size = Some(size);
        }
    }

    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn set_progress(&self, progress: usize) {
        self.progress.store(progress, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target {
            locator: Locator::parse("http://example.com/file.bin").unwrap(),
            protocol: Protocol::Tcp,
            options: HostOptions::default(),
        }
    }

    #[test]
    fn test_begin_without_target() {
        let shared = Shared::new();
        assert!(matches!(shared.begin(), Ok(None)));
        assert_eq!(shared.state(), State::Idle);
    }

    #[test]
    fn test_begin_is_exclusive() {
        let shared = Shared::new();
        shared.set_target(target(), true).unwrap();
        assert!(matches!(shared.begin(), Ok(Some(_))));
        assert_eq!(shared.state(), State::Connecting);
        assert!(matches!(shared.begin(), Err(State::Connecting)));
        assert!(shared.set_target(target(), false).is_err());
    }

    #[test]
    fn test_total_size_is_set_once() {
        let shared = Shared::new();
        shared.set_total_size(100);
        shared.set_total_size(200);
        assert_eq!(shared.total_size(), Some(100));
    }

    #[test]
    fn test_state_changes_are_published() {
        let shared = Shared::new();
        let rx = shared.subscribe();
        shared.set_state(State::Downloading);
        assert_eq!(*rx.borrow(), State::Downloading);
    }
}
