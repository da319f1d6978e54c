//! Downloader Client Library
//!
//! This library provides a protocol-agnostic file-retrieval engine that
//! fetches a remote resource over HTTP(S) or CoAP(s) into a bounded receive
//! buffer and hands it to the caller as a sequence of fragments, with
//! automatic reconnection and partial-range resume.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Client handle, download engine, events, configuration
//! - [`transport`] - Socket layer seam and the transport adapter on top of it
//! - [`protocol`] - HTTP and CoAP codecs driven by the engine
//!
//! # Example
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use downloader_client::{Client, ClientConfig, Event, HostOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ClientConfig::default(), |event: Event<'_>| {
//!     if let Event::Fragment(bytes) = event {
//!         println!("received {} bytes", bytes.len());
//!     }
//!     ControlFlow::Continue(())
//! })?;
//!
//! client.get("http://example.com/firmware.bin", HostOptions::default(), 0)?;
//! client.wait_idle().await;
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use download::{
    ChannelHandler, Client, ClientConfig, ClientError, CoapParams, DownloadError, Event,
    EventHandler, FailureKind, HostOptions, Locator, OwnedEvent, Protocol, State,
};
pub use transport::{AddressFamily, Network, PeerVerify, TokioNetwork};
