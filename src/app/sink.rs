//! Event handler writing fragments into the output file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::ops::ControlFlow;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use downloader_client::{Event, EventHandler};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Writes payload fragments to a file and decides whether transport errors
/// are worth a reconnect.
///
/// The final result of the run is sent once, on `Done`, on a refused error
/// or on a write failure.
pub(crate) struct FileSink {
    writer: BufWriter<File>,
    retries_left: u8,
    written: u64,
    result: Option<oneshot::Sender<Result<u64>>>,
}

impl FileSink {
    /// Opens `path` for writing. With `append` set the file is extended,
    /// which is what a resumed download needs.
    pub(crate) fn create(
        path: &Path,
        append: bool,
        max_retries: u8,
    ) -> Result<(Self, oneshot::Receiver<Result<u64>>)> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)
        } else {
            File::create(path)
        }
        .with_context(|| format!("Failed to open output file '{}'", path.display()))?;

        let (tx, rx) = oneshot::channel();
        Ok((
            Self {
                writer: BufWriter::new(file),
                retries_left: max_retries,
                written: 0,
                result: Some(tx),
            },
            rx,
        ))
    }

    fn finish(&mut self, result: Result<u64>) {
        if let Some(tx) = self.result.take() {
            // The receiver only goes away when main already gave up.
            let _ = tx.send(result);
        }
    }
}

impl EventHandler for FileSink {
    fn on_event(&mut self, event: Event<'_>) -> ControlFlow<()> {
        match event {
            Event::Fragment(bytes) => {
                if let Err(e) = self.writer.write_all(bytes) {
                    error!(error = %e, "write to output file failed");
                    self.finish(Err(anyhow!(e).context("Failed to write output file")));
                    return ControlFlow::Break(());
                }
                self.written += bytes.len() as u64;
                ControlFlow::Continue(())
            }
            Event::Error(err) => {
                if err.is_recoverable() && self.retries_left > 0 {
                    self.retries_left -= 1;
                    warn!(error = %err, retries_left = self.retries_left, "reconnecting");
                    return ControlFlow::Continue(());
                }
                error!(error = %err, "download failed");
                // Keep whatever arrived so a later run can resume from it.
                let _ = self.writer.flush();
                self.finish(Err(anyhow!(err.clone())));
                ControlFlow::Break(())
            }
            Event::Done => {
                let flushed = self
                    .writer
                    .flush()
                    .map(|()| self.written)
                    .context("Failed to flush output file");
                debug!(bytes = self.written, "download complete");
                self.finish(flushed);
                ControlFlow::Continue(())
            }
            Event::Deinitialized => ControlFlow::Continue(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use downloader_client::DownloadError;

    #[test]
    fn test_file_sink_writes_fragments_and_reports_done() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let (mut sink, mut rx) = FileSink::create(&path, false, 0).unwrap();

        assert_eq!(sink.on_event(Event::Fragment(b"hello ")), ControlFlow::Continue(()));
        assert_eq!(sink.on_event(Event::Fragment(b"world")), ControlFlow::Continue(()));
        assert_eq!(sink.on_event(Event::Done), ControlFlow::Continue(()));

        assert_eq!(rx.try_recv().unwrap().unwrap(), 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_file_sink_appends_when_resuming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"abc").unwrap();

        let (mut sink, _rx) = FileSink::create(&path, true, 0).unwrap();
        let _ = sink.on_event(Event::Fragment(b"def"));
        let _ = sink.on_event(Event::Done);

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_file_sink_retries_transient_errors_until_budget_spent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, mut rx) = FileSink::create(&dir.path().join("f"), false, 2).unwrap();
        let err = DownloadError::ConnectionReset;

        assert_eq!(sink.on_event(Event::Error(&err)), ControlFlow::Continue(()));
        assert_eq!(sink.on_event(Event::Error(&err)), ControlFlow::Continue(()));
        assert!(rx.try_recv().is_err(), "no result while retries remain");

        assert_eq!(sink.on_event(Event::Error(&err)), ControlFlow::Break(()));
        let result = rx.try_recv().unwrap();
        assert!(result.unwrap_err().to_string().contains("connection reset"));
    }

    #[test]
    fn test_file_sink_refuses_terminal_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, mut rx) = FileSink::create(&dir.path().join("f"), false, 5).unwrap();
        let err = DownloadError::malformed("status code not found");

        assert_eq!(sink.on_event(Event::Error(&err)), ControlFlow::Break(()));
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn test_file_sink_open_failure_names_path() {
        let err = FileSink::create(Path::new("/nonexistent/dir/out.bin"), false, 0)
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/dir/out.bin"));
    }
}
