//! Merges CLI flags with the config file and drives one download.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use downloader_client::{Client, ClientConfig, HostOptions, Locator};
use tracing::{debug, info};

use super::config_file::FileConfig;
use super::progress::spawn_progress_ui;
use super::sink::FileSink;
use crate::cli::Args;

/// Reconnect attempts when neither flag nor file says otherwise.
const DEFAULT_MAX_RETRIES: u8 = 3;

/// File name used when the locator has no path.
const FALLBACK_FILE_NAME: &str = "download.bin";

/// Everything one run needs, after precedence is applied.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub(crate) url: String,
    pub(crate) output: PathBuf,
    pub(crate) resume: usize,
    pub(crate) max_retries: u8,
    pub(crate) client: ClientConfig,
    pub(crate) host: HostOptions,
}

impl RunSettings {
    /// Applies CLI flags over file values over library defaults.
    pub(crate) fn resolve(args: &Args, file: &FileConfig) -> Result<Self> {
        let locator = Locator::parse(&args.url)?;

        let mut client = ClientConfig::default();
        if let Some(size) = args.buffer_size.or(file.buffer_size) {
            client.buffer_size = usize::try_from(size)?;
        }
        if let Some(block) = args.block_size.or(file.coap_block_size) {
            client.coap.block_size = block;
        }
        if let Some(secs) = file.connect_timeout_secs {
            client.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.recv_timeout_secs {
            client.http_recv_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = file.max_redirects {
            client.max_redirects = max;
        }
        if let Some(allow) = file.allow_range_requests {
            client.allow_range_requests = allow;
        }
        client.log_headers = file.log_headers.unwrap_or(false);
        client.validate()?;

        let sec_tags = if args.sec_tags.is_empty() {
            file.sec_tags.clone().unwrap_or_default()
        } else {
            args.sec_tags.clone()
        };
        let fragment_size = match args.fragment_size {
            Some(size) => size,
            None => usize::try_from(file.fragment_size.unwrap_or(0))?,
        };
        let mut host = HostOptions::default()
            .with_sec_tags(sec_tags)
            .with_range_override(fragment_size)
            .with_keep_connection(args.keep_connection);
        if let Some(pdn) = args.pdn {
            host = host.with_pdn_id(pdn);
        }

        let output = match &args.output {
            Some(path) => path.clone(),
            None => {
                let dir = file.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
                dir.join(default_file_name(&locator))
            }
        };

        Ok(Self {
            url: args.url.clone(),
            output,
            resume: args.resume,
            max_retries: args
                .max_retries
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            client,
            host,
        })
    }
}

fn default_file_name(locator: &Locator) -> String {
    let path = locator.path();
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

/// Downloads `settings.url` into `settings.output`.
///
/// Returns the number of bytes written in this run.
pub(crate) async fn run(settings: RunSettings, show_progress: bool) -> Result<u64> {
    let (sink, result) = FileSink::create(
        &settings.output,
        settings.resume > 0,
        settings.max_retries,
    )?;
    let client = Arc::new(Client::new(settings.client.clone(), sink)?);

    client
        .get(&settings.url, settings.host.clone(), settings.resume)
        .with_context(|| format!("Failed to start download of {}", settings.url))?;
    info!(url = %settings.url, output = %settings.output.display(), "download started");

    let use_bar = show_progress && std::io::stderr().is_terminal();
    let (progress, stop) = spawn_progress_ui(use_bar, Arc::clone(&client), label(&settings.output));

    client.wait_idle().await;
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    let client = Arc::try_unwrap(client).map_err(|_| anyhow!("client still shared after download"))?;
    client.shutdown().await?;

    // The sender is dropped without a result only if the download was
    // aborted without an event, which the sink never does.
    let written = result
        .await
        .context("Download ended without a result")??;
    debug!(bytes = written, "output written");
    Ok(written)
}

fn label(output: &Path) -> String {
    output
        .file_name()
        .map_or_else(|| output.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["downloader"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_resolve_defaults() {
        let settings =
            RunSettings::resolve(&args(&["http://example.com/fw/app.bin"]), &FileConfig::default())
                .unwrap();
        assert_eq!(settings.output, PathBuf::from("./app.bin"));
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(settings.client, ClientConfig::default());
        assert_eq!(settings.host.range_override, 0);
        assert!(!settings.host.keep_connection);
    }

    #[test]
    fn test_resolve_cli_overrides_file() {
        let file = FileConfig {
            buffer_size: Some(1024),
            max_retries: Some(1),
            sec_tags: Some(vec![9]),
            fragment_size: Some(4096),
            ..FileConfig::default()
        };
        let settings = RunSettings::resolve(
            &args(&[
                "https://example.com/f.bin",
                "--buffer-size",
                "8192",
                "-r",
                "7",
                "--sec-tag",
                "42",
            ]),
            &file,
        )
        .unwrap();
        assert_eq!(settings.client.buffer_size, 8192);
        assert_eq!(settings.max_retries, 7);
        assert_eq!(settings.host.sec_tags, vec![42]);
        assert_eq!(settings.host.range_override, 4096);
    }

    #[test]
    fn test_resolve_file_values_apply() {
        let file = FileConfig {
            output_dir: Some(PathBuf::from("/tmp/fw")),
            connect_timeout_secs: Some(5),
            max_redirects: Some(1),
            allow_range_requests: Some(false),
            ..FileConfig::default()
        };
        let settings = RunSettings::resolve(&args(&["coap://example.com/a/b.bin"]), &file).unwrap();
        assert_eq!(settings.output, PathBuf::from("/tmp/fw/b.bin"));
        assert_eq!(settings.client.connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.client.max_redirects, 1);
        assert!(!settings.client.allow_range_requests);
    }

    #[test]
    fn test_resolve_rejects_invalid_locator() {
        assert!(RunSettings::resolve(&args(&["http://"]), &FileConfig::default()).is_err());
    }

    #[test]
    fn test_default_file_name() {
        let name = |s: &str| default_file_name(&Locator::parse(s).unwrap());
        assert_eq!(name("http://h/dir/file.bin"), "file.bin");
        assert_eq!(name("http://h/dir/"), "dir");
        assert_eq!(name("http://h"), FALLBACK_FILE_NAME);
        assert_eq!(name("http://h/get?id=7"), "get");
    }
}
