//! Event recording handlers.

#![allow(dead_code)]

use std::ops::ControlFlow;
use std::sync::Arc;

use downloader_client::{DownloadError, Event, EventHandler, OwnedEvent};
use parking_lot::Mutex;

/// Events seen by a recording handler, shared with the test body.
#[derive(Clone, Default)]
pub struct Events {
    seen: Arc<Mutex<Vec<OwnedEvent>>>,
}

impl Events {
    pub fn all(&self) -> Vec<OwnedEvent> {
        self.seen.lock().clone()
    }

    /// Fragment lengths in delivery order.
    pub fn fragment_sizes(&self) -> Vec<usize> {
        self.seen
            .lock()
            .iter()
            .filter_map(|event| match event {
                OwnedEvent::Fragment(bytes) => Some(bytes.len()),
                _ => None,
            })
            .collect()
    }

    /// All fragments concatenated.
    pub fn payload(&self) -> Vec<u8> {
        self.seen
            .lock()
            .iter()
            .filter_map(|event| match event {
                OwnedEvent::Fragment(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn errors(&self) -> Vec<DownloadError> {
        self.seen
            .lock()
            .iter()
            .filter_map(|event| match event {
                OwnedEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn done_count(&self) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|event| **event == OwnedEvent::Done)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// Handler recording every event and answering with `policy`.
pub fn recorder(
    mut policy: impl FnMut(&Event<'_>) -> ControlFlow<()> + Send + 'static,
) -> (impl EventHandler, Events) {
    let events = Events::default();
    let seen = Arc::clone(&events.seen);
    let handler = move |event: Event<'_>| {
        seen.lock().push(event.to_owned_event());
        policy(&event)
    };
    (handler, events)
}

/// Handler recording every event and always continuing.
pub fn accept_all() -> (impl EventHandler, Events) {
    recorder(|_| ControlFlow::Continue(()))
}

/// Handler recording every event and refusing every error.
pub fn refuse_errors() -> (impl EventHandler, Events) {
    recorder(|event| match event {
        Event::Error(_) => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    })
}
