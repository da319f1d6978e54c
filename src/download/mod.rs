//! Download client: handle, engine, events and configuration.
//!
//! A [`Client`] fetches one resource at a time over HTTP(S) or CoAP(s) and
//! delivers it as [`Event::Fragment`]s to the caller's [`EventHandler`].
//!
//! # Features
//!
//! - Bounded memory: every byte lands in one fixed-size receive buffer
//! - Resume from any offset (HTTP range requests, CoAP block numbers)
//! - Reconnect-and-resume after transport faults, with the caller's consent
//! - HTTP redirects and fragmented range requests
//! - CoAP retransmission with exponential backoff and duplicate suppression
//!
//! # Example
//!
//! ```no_run
//! use downloader_client::{Client, ClientConfig, HostOptions, OwnedEvent};
//! use downloader_client::download::channel;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (handler, mut events) = channel();
//! let client = Client::new(ClientConfig::default(), handler)?;
//! client.get("coap://example.com/fw/app.bin", HostOptions::default(), 0)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         OwnedEvent::Fragment(bytes) => println!("{} bytes", bytes.len()),
//!         OwnedEvent::Done | OwnedEvent::Error(_) => break,
//!         OwnedEvent::Deinitialized => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
pub mod constants;
mod engine;
mod error;
mod event;
mod locator;
mod state;

pub use client::Client;
pub use config::{ClientConfig, CoapParams, HostOptions};
pub use error::{ClientError, DownloadError, FailureKind};
pub use event::{ChannelHandler, Event, EventHandler, OwnedEvent, channel};
pub use locator::{Locator, Protocol};
pub use state::State;

// Note: no module-local Result aliases; signatures spell out
// `Result<T, DownloadError>` / `Result<T, ClientError>`.
