//! Download state machine.
//!
//! One [`Engine`] runs on the worker task of each [`Client`](super::Client).
//! It owns the receive buffer and the connection, drives the protocol codec
//! and reports through the event handler. The public API only reaches it
//! through [`Command`]s and the [`Shared`] fields.
//!
//! # Recovery
//!
//! | Failure | Handling |
//! |---------|----------|
//! | connect fails | Error event, download ends |
//! | send fails | Error event, one reconnect, then terminal |
//! | receive error, zero-length read, server closing between ranges, give-up timeout | Error event; `Continue` reconnects and resumes, `Break` ends |
//! | malformed stream, header overflow, redirect loop | Error event, download ends |
//! | handler returns `Break` on a fragment | download ends, no further event |
//!
//! A datagram receive timeout is first handled by the codec's own
//! retransmission; only when that gives up does the caller see a timeout.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::config::{ClientConfig, HostOptions};
use super::error::{ClientError, DownloadError};
use super::event::{Event, EventHandler};
use super::locator::{Locator, Protocol};
use super::state::{Shared, State, Target};
use crate::protocol::{self, Outcome, ProtocolCodec, Retransmission};
use crate::transport::{Connection, Transport};

/// Work handed to the worker task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Download `target` starting at `resume_offset`.
    Start {
        target: Target,
        resume_offset: usize,
    },
    /// Close the connection, if any.
    Disconnect,
    /// Close the connection and stop the worker.
    Shutdown,
}

/// How a download ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Done,
    Failed,
    Aborted,
}

/// Per-download state owned by the worker.
struct Download {
    locator: Locator,
    protocol: Protocol,
    options: HostOptions,
    codec: Box<dyn ProtocolCodec>,
    progress: usize,
    redirects: u8,
    request_owed: bool,
}

pub(crate) struct Engine {
    config: ClientConfig,
    transport: Transport,
    shared: Arc<Shared>,
    handler: Box<dyn EventHandler>,
    buffer: Vec<u8>,
    filled: usize,
    connection: Option<Connection>,
    /// Endpoint the open connection is bound to.
    endpoint: Option<(Locator, Protocol)>,
}

impl Engine {
    pub fn new(
        config: ClientConfig,
        transport: Transport,
        shared: Arc<Shared>,
        handler: Box<dyn EventHandler>,
    ) -> Self {
        let buffer = vec![0; config.buffer_size];
        Self {
            config,
            transport,
            shared,
            handler,
            buffer,
            filled: 0,
            connection: None,
            endpoint: None,
        }
    }

    /// Worker loop: waits for commands until shut down or orphaned.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("download worker started");
        while let Some(command) = commands.recv().await {
            match command {
                Command::Start {
                    target,
                    resume_offset,
                } => self.download(target, resume_offset).await,
                Command::Disconnect => self.close(),
                Command::Shutdown => {
                    self.close();
                    let _ = self.handler.on_event(Event::Deinitialized);
                    info!("download worker stopped");
                    return;
                }
            }
        }
        self.close();
        debug!("client dropped, download worker exiting");
    }

    #[instrument(skip_all, fields(locator = %target.locator, protocol = %target.protocol, resume_offset = resume_offset))]
    async fn download(&mut self, target: Target, resume_offset: usize) {
        let mut progress = resume_offset;
        if progress > 0 && !target.protocol.is_datagram() && !self.config.allow_range_requests {
            warn!(resume_offset, "range requests disabled, restarting from zero");
            progress = 0;
        }
        self.shared.set_progress(progress);

        let mut download = Download {
            codec: protocol::codec_for(target.protocol, &self.config, &target.options),
            locator: target.locator,
            protocol: target.protocol,
            options: target.options,
            progress,
            redirects: 0,
            request_owed: true,
        };

        let end = self.run_download(&mut download).await;

        self.shared.set_state(State::Closing);
        let keep = end == End::Done
            && !self.shared.close_when_done()
            && !download.codec.server_requests_close();
        if !keep {
            self.close();
        }
        self.filled = 0;
        self.shared.set_state(State::Finished);
        info!(?end, progress = download.progress, "download finished");
        self.shared.set_state(State::Idle);
    }

    async fn run_download(&mut self, dl: &mut Download) -> End {
        if let Err(error) = self.ensure_connected(dl).await {
            let _ = self.emit_error(&error);
            return End::Failed;
        }
        self.shared.set_state(State::Downloading);
        self.filled = 0;

        loop {
            if dl.request_owed {
                if let Err(end) = self.send_request(dl).await {
                    return end;
                }
            }

            if self.filled == self.buffer.len() {
                let error = DownloadError::BufferOverflow {
                    capacity: self.buffer.len(),
                };
                let _ = self.emit_error(&error);
                return End::Failed;
            }

            let received = match self.connection.as_mut() {
                Some(conn) => {
                    conn.receive(&mut self.buffer[self.filled..], dl.codec.recv_timeout())
                        .await
                }
                None => Err(DownloadError::ConnectionReset),
            };
            match received {
                Ok(len) => self.filled += len,
                Err(DownloadError::Timeout { .. }) => {
                    match dl.codec.retransmission_due() {
                        Retransmission::Resend(request) => {
                            if let Err(error) = self.send(&request).await {
                                if let Err(end) = self.recover(dl, error).await {
                                    return end;
                                }
                            }
                        }
                        Retransmission::GiveUp => {
                            let error = DownloadError::timeout("receiving");
                            if let Err(end) = self.recover(dl, error).await {
                                return end;
                            }
                        }
                    }
                    continue;
                }
                Err(error) => {
                    if let Err(end) = self.recover(dl, error).await {
                        return end;
                    }
                    continue;
                }
            }

            if let ControlFlow::Break(end) = self.interpret(dl).await {
                return end;
            }
        }
    }

    /// Feeds the buffered bytes to the codec and acts on the outcome.
    async fn interpret(&mut self, dl: &mut Download) -> ControlFlow<End> {
        let outcome = dl.codec.on_bytes(&self.buffer[..self.filled], dl.progress);
        match outcome {
            Outcome::NeedMoreData => {
                if dl.protocol.is_datagram() {
                    self.filled = 0;
                }
            }
            Outcome::PayloadReady {
                payload,
                consumed,
                duplicate,
            } => {
                if duplicate {
                    debug!(progress = dl.progress, "discarding duplicate");
                    self.consume(dl.protocol, consumed);
                    return ControlFlow::Continue(());
                }

                let len = payload.len();
                if len > 0 {
                    dl.progress += len;
                    self.shared.set_progress(dl.progress);
                    let flow = self.handler.on_event(Event::Fragment(&self.buffer[payload]));
                    if flow.is_break() {
                        info!(progress = dl.progress, "download aborted by handler");
                        return ControlFlow::Break(End::Aborted);
                    }
                }
                self.consume(dl.protocol, consumed);

                if let Some(size) = dl.codec.total_size() {
                    self.shared.set_total_size(size);
                    if dl.progress >= size {
                        let _ = self.handler.on_event(Event::Done);
                        return ControlFlow::Break(End::Done);
                    }
                }

                if dl.codec.request_owed() {
                    if dl.codec.server_requests_close() {
                        debug!("server closed the connection after the response");
                        if let Err(end) = self.recover(dl, DownloadError::PeerClosed).await {
                            return ControlFlow::Break(end);
                        }
                    }
                    dl.request_owed = true;
                }
            }
            Outcome::Redirect(location) => {
                if let Err(error) = self.follow_redirect(dl, &location).await {
                    let _ = self.emit_error(&error);
                    return ControlFlow::Break(End::Failed);
                }
            }
            Outcome::Malformed(reason) => {
                let _ = self.emit_error(&DownloadError::malformed(reason));
                return ControlFlow::Break(End::Failed);
            }
        }
        ControlFlow::Continue(())
    }

    /// Drops consumed bytes from the front of the buffer.
    fn consume(&mut self, protocol: Protocol, consumed: usize) {
        if protocol.is_datagram() || consumed >= self.filled {
            self.filled = 0;
        } else {
            self.buffer.copy_within(consumed..self.filled, 0);
            self.filled -= consumed;
        }
    }

    async fn follow_redirect(&mut self, dl: &mut Download, location: &str) -> Result<(), DownloadError> {
        if dl.redirects >= self.config.max_redirects {
            return Err(DownloadError::TooManyRedirects {
                limit: self.config.max_redirects,
            });
        }
        dl.redirects += 1;
        let next = dl.locator.redirect(location).map_err(|e| redirect_error(&e))?;
        let protocol = next.protocol(&dl.options).map_err(|e| redirect_error(&e))?;
        if protocol.is_datagram() != dl.protocol.is_datagram() {
            return Err(DownloadError::protocol_unsupported(protocol.scheme()));
        }
        info!(from = %dl.locator, to = %next, redirects = dl.redirects, "following redirect");
        dl.locator = next;
        dl.protocol = protocol;
        dl.request_owed = true;
        self.filled = 0;
        self.close();
        self.ensure_connected(dl).await
    }

    /// Builds and sends the owed request, reconnecting once if the send
    /// fails.
    async fn send_request(&mut self, dl: &mut Download) -> Result<(), End> {
        let request = match dl.codec.build_request(&dl.locator, dl.progress) {
            Ok(request) => request,
            Err(error) => {
                let _ = self.emit_error(&error);
                return Err(End::Failed);
            }
        };
        self.filled = 0;
        dl.request_owed = false;

        let Err(error) = self.send(&request).await else {
            return Ok(());
        };
        if self.emit_error(&error).is_break() {
            return Err(End::Aborted);
        }
        self.reconnect(dl).await?;
        // The codec state is per request; rebuild it for the new connection.
        let request = match dl.codec.build_request(&dl.locator, dl.progress) {
            Ok(request) => request,
            Err(error) => {
                let _ = self.emit_error(&error);
                return Err(End::Failed);
            }
        };
        if let Err(error) = self.send(&request).await {
            let _ = self.emit_error(&error);
            return Err(End::Failed);
        }
        Ok(())
    }

    async fn send(&mut self, request: &[u8]) -> Result<(), DownloadError> {
        match self.connection.as_mut() {
            Some(conn) => conn.send(request).await.map(|_| ()),
            None => Err(DownloadError::ConnectionReset),
        }
    }

    /// Reports a transfer failure and, if the handler agrees, reconnects so
    /// the download can resume from the current progress.
    async fn recover(&mut self, dl: &mut Download, error: DownloadError) -> Result<(), End> {
        if self.emit_error(&error).is_break() {
            info!(progress = dl.progress, "download aborted by handler");
            return Err(End::Aborted);
        }
        if !error.is_recoverable() {
            return Err(End::Failed);
        }
        self.reconnect(dl).await
    }

    async fn reconnect(&mut self, dl: &mut Download) -> Result<(), End> {
        info!(progress = dl.progress, "reconnecting");
        self.close();
        if !dl.protocol.is_datagram() && !self.config.allow_range_requests && dl.progress > 0 {
            warn!("range requests disabled, restarting from zero");
            dl.progress = 0;
            self.shared.set_progress(0);
        }
        if let Err(error) = self.ensure_connected(dl).await {
            let _ = self.emit_error(&error);
            return Err(End::Failed);
        }
        dl.request_owed = true;
        self.filled = 0;
        Ok(())
    }

    /// Connects to the download's endpoint unless the open connection
    /// already points there.
    async fn ensure_connected(&mut self, dl: &Download) -> Result<(), DownloadError> {
        if let (Some(_), Some((locator, protocol))) = (&self.connection, &self.endpoint) {
            if locator.same_endpoint(&dl.locator, *protocol, dl.protocol) {
                debug!(host = dl.locator.host(), "reusing open connection");
                return Ok(());
            }
            debug!(from = locator.host(), to = dl.locator.host(), "endpoint changed");
            self.close();
        }

        let port = dl.locator.port_or_default(dl.protocol);
        let conn = self
            .transport
            .connect(
                dl.locator.host(),
                port,
                dl.protocol,
                &dl.options,
                dl.codec.recv_timeout(),
            )
            .await?;
        self.connection = Some(conn);
        self.endpoint = Some((dl.locator.clone(), dl.protocol));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }
        self.endpoint = None;
    }

    fn emit_error(&mut self, error: &DownloadError) -> ControlFlow<()> {
        warn!(%error, kind = ?error.kind(), "download error");
        self.handler.on_event(Event::Error(error))
    }
}

/// Maps a failure to follow a `Location` header.
fn redirect_error(error: &ClientError) -> DownloadError {
    match error {
        ClientError::ProtocolUnsupported { scheme } => DownloadError::protocol_unsupported(scheme),
        other => DownloadError::malformed(format!("bad redirect location: {other}")),
    }
}
