//! Config file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// File configuration for downloader defaults.
///
/// Every field is optional; command-line flags win over file values.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Directory for output files when `-o` is not given.
    pub output_dir: Option<PathBuf>,
    /// Receive buffer size in bytes.
    pub buffer_size: Option<u32>,
    /// CoAP block size in bytes.
    pub coap_block_size: Option<u16>,
    /// HTTP fragment size (bytes per ranged request).
    pub fragment_size: Option<u64>,
    /// Reconnect attempts after transport errors.
    pub max_retries: Option<u8>,
    /// Redirects followed per download.
    pub max_redirects: Option<u8>,
    /// Allow HTTP `Range` requests.
    pub allow_range_requests: Option<bool>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP receive timeout in seconds.
    pub recv_timeout_secs: Option<u64>,
    /// Security tags used for https/coaps.
    pub sec_tags: Option<Vec<u32>>,
    /// Dump request and response headers at trace level.
    pub log_headers: Option<bool>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(buffer_size) = self.buffer_size
            && !(64..=65_536).contains(&buffer_size)
        {
            bail!("Invalid config value for `buffer_size`: {buffer_size}. Expected range: 64..=65536");
        }

        if let Some(block) = self.coap_block_size
            && (!block.is_power_of_two() || !(16..=1024).contains(&block))
        {
            bail!(
                "Invalid config value for `coap_block_size`: {block}. Expected a power of two in 16..=1024"
            );
        }

        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=10");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("recv_timeout_secs", self.recv_timeout_secs)?;

        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/downloader/config.toml`
/// 2. `$HOME/.config/downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("downloader")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("downloader")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path; an absent file yields defaults.
pub fn load_default_file_config() -> Result<FileConfig> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

/// Loads and validates a config file.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "buffer_size" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("buffer_size out of range for u32"))?;
                cfg.buffer_size = Some(n);
            }
            "coap_block_size" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u16::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("coap_block_size out of range for u16"))?;
                cfg.coap_block_size = Some(n);
            }
            "fragment_size" => {
                cfg.fragment_size = Some(parse_integer_u64(value).with_context(context)?);
            }
            "max_retries" => {
                cfg.max_retries = Some(parse_integer_u8(value).with_context(context)?);
            }
            "max_redirects" => {
                cfg.max_redirects = Some(parse_integer_u8(value).with_context(context)?);
            }
            "allow_range_requests" => {
                cfg.allow_range_requests = Some(parse_boolean(value).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "recv_timeout_secs" => {
                cfg.recv_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "sec_tags" => {
                cfg.sec_tags = Some(parse_integer_list(value).with_context(context)?);
            }
            "log_headers" => {
                cfg.log_headers = Some(parse_boolean(value).with_context(context)?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

/// Parses `[1, 2, 3]`.
fn parse_integer_list(raw_value: &str) -> Result<Vec<u32>> {
    let Some(inner) = raw_value
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        bail!("Expected a bracketed list of integers");
    };
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let value = parse_integer_u64(item)?;
            u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
        })
        .collect()
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
