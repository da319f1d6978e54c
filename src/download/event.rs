//! Event sink contract.
//!
//! The engine reports everything through one caller-supplied
//! [`EventHandler`]. Fragments borrow the receive buffer, so they are only
//! valid for the duration of the call; the buffer is reused as soon as the
//! handler returns.
//!
//! Returning [`ControlFlow::Break`] from a `Fragment` or `Error` event aborts
//! the current download. No further event is emitted for that download.

use std::ops::ControlFlow;

use tokio::sync::mpsc;

use super::error::DownloadError;

/// An event delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// The next contiguous slice of the payload.
    Fragment(&'a [u8]),

    /// A download error. For transient errors, returning
    /// `ControlFlow::Continue` authorizes a reconnect-and-resume.
    Error(&'a DownloadError),

    /// The whole resource has been delivered.
    Done,

    /// The client has shut down; no event follows.
    Deinitialized,
}

impl Event<'_> {
    /// Copies the event out of the receive buffer.
    #[must_use]
    pub fn to_owned_event(&self) -> OwnedEvent {
        match *self {
            Self::Fragment(bytes) => OwnedEvent::Fragment(bytes.to_vec()),
            Self::Error(error) => OwnedEvent::Error(error.clone()),
            Self::Done => OwnedEvent::Done,
            Self::Deinitialized => OwnedEvent::Deinitialized,
        }
    }
}

/// An [`Event`] that owns its payload, for delivery over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedEvent {
    /// Payload bytes.
    Fragment(Vec<u8>),
    /// A download error.
    Error(DownloadError),
    /// Download complete.
    Done,
    /// Client shut down.
    Deinitialized,
}

/// Receives download events on the worker task.
///
/// Implemented for any `FnMut(Event<'_>) -> ControlFlow<()>` closure.
pub trait EventHandler: Send + 'static {
    /// Handles one event. `Break` aborts the current download.
    fn on_event(&mut self, event: Event<'_>) -> ControlFlow<()>;
}

impl<F> EventHandler for F
where
    F: for<'a> FnMut(Event<'a>) -> ControlFlow<()> + Send + 'static,
{
    fn on_event(&mut self, event: Event<'_>) -> ControlFlow<()> {
        self(event)
    }
}

/// Forwards every event over an unbounded channel and never aborts.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<OwnedEvent>,
}

impl EventHandler for ChannelHandler {
    fn on_event(&mut self, event: Event<'_>) -> ControlFlow<()> {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event.to_owned_event());
        ControlFlow::Continue(())
    }
}

/// Creates a [`ChannelHandler`] and the receiving end of its channel.
#[must_use]
pub fn channel() -> (ChannelHandler, mpsc::UnboundedReceiver<OwnedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelHandler { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_event_handler() {
        let mut seen = 0usize;
        let mut handler = move |event: Event<'_>| {
            if let Event::Fragment(bytes) = event {
                seen += bytes.len();
            }
            if seen >= 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        assert_eq!(
            handler.on_event(Event::Fragment(b"ab")),
            ControlFlow::Continue(())
        );
        assert_eq!(handler.on_event(Event::Fragment(b"cd")), ControlFlow::Break(()));
    }

    #[test]
    fn test_channel_handler_copies_fragments() {
        let (mut handler, mut rx) = channel();
        let buf = vec![1u8, 2, 3];
        assert_eq!(
            handler.on_event(Event::Fragment(&buf)),
            ControlFlow::Continue(())
        );
        let error = DownloadError::PeerClosed;
        let _ = handler.on_event(Event::Error(&error));
        let _ = handler.on_event(Event::Done);

        assert_eq!(rx.try_recv().ok(), Some(OwnedEvent::Fragment(vec![1, 2, 3])));
        assert_eq!(
            rx.try_recv().ok(),
            Some(OwnedEvent::Error(DownloadError::PeerClosed))
        );
        assert_eq!(rx.try_recv().ok(), Some(OwnedEvent::Done));
    }

    #[test]
    fn test_channel_handler_survives_dropped_receiver() {
        let (mut handler, rx) = channel();
        drop(rx);
        assert_eq!(handler.on_event(Event::Done), ControlFlow::Continue(()));
    }
}
