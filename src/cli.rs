//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch one file over HTTP(S) or CoAP(s).
///
/// Fragments are written to the output file as they arrive. Transport
/// errors trigger a reconnect that resumes where the transfer stopped.
#[derive(Parser, Debug)]
#[command(name = "downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Locator to fetch, e.g. http://host/file.bin or coap://host/fw/app.bin
    pub url: String,

    /// Output file (defaults to the last path segment of the locator)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Resume from this byte offset, appending to the output file
    #[arg(long, default_value_t = 0)]
    pub resume: usize,

    /// Ask for at most this many bytes per HTTP request (0 for whole file)
    #[arg(long)]
    pub fragment_size: Option<usize>,

    /// Security tag for TLS/DTLS credentials (repeatable)
    #[arg(long = "sec-tag", value_name = "TAG")]
    pub sec_tags: Vec<u32>,

    /// Packet data network to bind the socket to
    #[arg(long, value_name = "ID")]
    pub pdn: Option<u8>,

    /// Keep the connection open after the download
    #[arg(long)]
    pub keep_connection: bool,

    /// Receive buffer size in bytes (64-65536)
    #[arg(long, value_parser = clap::value_parser!(u32).range(64..=65536))]
    pub buffer_size: Option<u32>,

    /// CoAP block size in bytes (power of two, 16-1024)
    #[arg(long, value_parser = parse_block_size)]
    pub block_size: Option<u16>,

    /// Maximum reconnect attempts after transport errors (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_block_size(raw: &str) -> Result<u16, String> {
    let size: u16 = raw.parse().map_err(|e| format!("{e}"))?;
    if size.is_power_of_two() && (16..=1024).contains(&size) {
        Ok(size)
    } else {
        Err(format!("{size} is not a power of two between 16 and 1024"))
    }
}
