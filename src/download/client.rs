//! Public client handle.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::config::{ClientConfig, HostOptions};
use super::constants::{COAP_HEADER_ROOM, HTTP_HEADER_ROOM, MIN_FIRST_FRAGMENT};
use super::engine::{Command, Engine};
use super::error::ClientError;
use super::event::EventHandler;
use super::locator::Locator;
use super::state::{Shared, State, Target};
use crate::transport::{Network, TokioNetwork, Transport};

/// A download client.
///
/// Each client owns one worker task that runs downloads one after another.
/// The methods here never perform socket I/O: they validate arguments,
/// update the shared fields and wake the worker. Results arrive through the
/// [`EventHandler`] given at construction.
///
/// Dropping the client stops the worker; no event follows.
pub struct Client {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Option<JoinHandle<()>>,
    config: ClientConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.shared.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client on tokio's TCP/UDP sockets.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`] or
    /// [`ClientError::BufferTooLarge`] for an invalid configuration and
    /// [`ClientError::WorkerStopped`] outside a tokio runtime.
    pub fn new(config: ClientConfig, handler: impl EventHandler) -> Result<Self, ClientError> {
        Self::with_network(config, Arc::new(TokioNetwork::new()), handler)
    }

    /// Creates a client on a custom socket layer.
    ///
    /// # Errors
    ///
    /// Same as [`Client::new`].
    pub fn with_network(
        config: ClientConfig,
        network: Arc<dyn Network>,
        handler: impl EventHandler,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            warn!(error = %e, "no tokio runtime");
            ClientError::WorkerStopped
        })?;

        let shared = Arc::new(Shared::new());
        let transport = Transport::new(network, config.connect_timeout, config.send_timeout);
        let engine = Engine::new(config.clone(), transport, Arc::clone(&shared), Box::new(handler));
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = runtime.spawn(engine.run(rx));

        debug!(buffer_size = config.buffer_size, "client initialized");
        Ok(Self {
            shared,
            commands,
            worker: Some(worker),
            config,
        })
    }

    /// Sets the download target. The socket is kept open after downloads
    /// started with [`Client::start`] until [`Client::disconnect`].
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidArgument`] for an unparsable locator, a secure
    ///   scheme without security tags, or a receive buffer too small for the
    ///   CoAP block size or an HTTP header.
    /// - [`ClientError::ProtocolUnsupported`] for an unknown scheme.
    /// - [`ClientError::AlreadyInProgress`] while a download is running.
    #[instrument(skip(self, options))]
    pub fn set_target(&self, locator: &str, options: HostOptions) -> Result<(), ClientError> {
        let target = self.resolve_target(locator, options)?;
        self.shared
            .set_target(target, false)
            .map_err(|_| ClientError::AlreadyInProgress)
    }

    /// Starts downloading `path` from the current target, from
    /// `resume_offset` onwards. An empty `path` keeps the target's own path.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidArgument`] when no target is set.
    /// - [`ClientError::AlreadyInProgress`] while a download is running.
    /// - [`ClientError::WorkerStopped`] after shutdown.
    #[instrument(skip(self))]
    pub fn start(&self, path: &str, resume_offset: usize) -> Result<(), ClientError> {
        let mut target = self
            .shared
            .begin()
            .map_err(|_| ClientError::AlreadyInProgress)?
            .ok_or_else(|| ClientError::invalid_argument("no target set"))?;
        if !path.is_empty() {
            target.locator = target.locator.with_path(path);
        }
        info!(locator = %target.locator, resume_offset, "starting download");

        self.commands
            .send(Command::Start {
                target,
                resume_offset,
            })
            .map_err(|_| {
                self.shared.set_state(State::Idle);
                ClientError::WorkerStopped
            })
    }

    /// Sets the target and starts downloading it.
    ///
    /// The socket is closed when the download ends unless
    /// [`HostOptions::keep_connection`] is set.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::set_target`] or [`Client::start`].
    #[instrument(skip(self, options))]
    pub fn get(&self, locator: &str, options: HostOptions, resume_offset: usize) -> Result<(), ClientError> {
        let close_when_done = !options.keep_connection;
        let target = self.resolve_target(locator, options)?;
        self.shared
            .set_target(target, close_when_done)
            .map_err(|_| ClientError::AlreadyInProgress)?;
        self.start("", resume_offset)
    }

    /// Like [`Client::get`], with the resource path given separately from
    /// the host locator.
    ///
    /// # Errors
    ///
    /// Any error of [`Client::get`].
    pub fn get_with_host_and_file(
        &self,
        host: &str,
        file: &str,
        options: HostOptions,
        resume_offset: usize,
    ) -> Result<(), ClientError> {
        let locator = Locator::parse(host)?.with_path(file);
        self.get(&locator.to_string(), options, resume_offset)
    }

    /// Closes the connection kept open between downloads.
    ///
    /// Safe to call at any time while idle, including repeatedly or before
    /// anything connected.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AlreadyInProgress`] while a download is running.
    /// - [`ClientError::WorkerStopped`] after shutdown.
    #[instrument(skip(self))]
    pub fn disconnect(&self) -> Result<(), ClientError> {
        let state = self.shared.state();
        if !state.is_idle() {
            debug!(%state, "disconnect refused while downloading");
            return Err(ClientError::AlreadyInProgress);
        }
        self.commands
            .send(Command::Disconnect)
            .map_err(|_| ClientError::WorkerStopped)
    }

    /// Total size of the current download; 0 while unknown.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.shared.total_size().unwrap_or(0)
    }

    /// Payload bytes delivered in the current (or last) download, including
    /// the resume offset.
    #[must_use]
    pub fn downloaded_size(&self) -> usize {
        self.shared.progress()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Waits until no download is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == State::Idle).await;
    }

    /// Stops the worker once the current download has ended, closes the
    /// connection and emits [`Event::Deinitialized`](super::Event::Deinitialized).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WorkerStopped`] if the worker already exited.
    #[instrument(skip(self))]
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Shutdown)
            .map_err(|_| ClientError::WorkerStopped)?;
        if let Some(worker) = self.worker.take() {
            worker.await.map_err(|e| {
                warn!(error = %e, "download worker panicked");
                ClientError::WorkerStopped
            })?;
        }
        Ok(())
    }

    fn resolve_target(&self, locator: &str, options: HostOptions) -> Result<Target, ClientError> {
        let locator = Locator::parse(locator)?;
        let protocol = locator.protocol(&options)?;
        if protocol.is_datagram() {
            let needed = usize::from(self.config.coap.block_size) + COAP_HEADER_ROOM;
            if self.config.buffer_size < needed {
                return Err(ClientError::invalid_argument(format!(
                    "receive buffer of {} bytes cannot hold a {}-byte CoAP block",
                    self.config.buffer_size, self.config.coap.block_size
                )));
            }
        } else if self.config.buffer_size < HTTP_HEADER_ROOM + MIN_FIRST_FRAGMENT {
            return Err(ClientError::invalid_argument(format!(
                "receive buffer of {} bytes cannot hold an HTTP header and first fragment ({} bytes)",
                self.config.buffer_size,
                HTTP_HEADER_ROOM + MIN_FIRST_FRAGMENT
            )));
        }
        Ok(Target {
            locator,
            protocol,
            options,
        })
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
