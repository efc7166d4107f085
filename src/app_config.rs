//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use transferq_core::EngineConfig;

/// TOML-backed file configuration. Unset keys keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Remote store base URL.
    pub base_url: Option<String>,
    /// Upload ingest endpoint path.
    pub ingest_path: Option<String>,
    /// Upload task-status endpoint path.
    pub task_status_path: Option<String>,
    /// Bearer token for the remote store.
    pub auth_token: Option<String>,
    /// Task database path.
    pub database_path: Option<PathBuf>,
    /// Concurrent uploads (1..=100).
    pub upload_concurrency: Option<u8>,
    /// Concurrent downloads (1..=100).
    pub download_concurrency: Option<u8>,
    /// Automatic retries (0..=10).
    pub max_retries: Option<u8>,
    /// First retry delay in milliseconds.
    pub retry_base_delay_ms: Option<u64>,
    /// Completion debounce window in milliseconds.
    pub debounce_ms: Option<u64>,
    /// Upload status poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Upload status polling ceiling in seconds.
    pub upload_timeout_secs: Option<u64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Database pool max connections (1..=20).
    pub db_max_connections: Option<u32>,
    /// Database busy timeout in milliseconds.
    pub db_busy_timeout_ms: Option<u32>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_concurrency("upload_concurrency", self.upload_concurrency)?;
        validate_concurrency("download_concurrency", self.download_concurrency)?;

        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=10");
        }
        validate_range("retry_base_delay_ms", self.retry_base_delay_ms, 1, 60_000)?;
        validate_range("debounce_ms", self.debounce_ms, 0, 600_000)?;
        validate_range("poll_interval_ms", self.poll_interval_ms, 1, 60_000)?;
        validate_range("upload_timeout_secs", self.upload_timeout_secs, 1, 86_400)?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        validate_range("read_timeout_secs", self.read_timeout_secs, 1, 3600)?;
        validate_range(
            "db_max_connections",
            self.db_max_connections.map(u64::from),
            1,
            20,
        )?;
        validate_range(
            "db_busy_timeout_ms",
            self.db_busy_timeout_ms.map(u64::from),
            0,
            120_000,
        )?;

        Ok(())
    }

    /// Overlays the set keys onto `config`.
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(base_url) = &self.base_url {
            config.base_url.clone_from(base_url);
        }
        if let Some(ingest_path) = &self.ingest_path {
            config.ingest_path.clone_from(ingest_path);
        }
        if let Some(task_status_path) = &self.task_status_path {
            config.task_status_path.clone_from(task_status_path);
        }
        if self.auth_token.is_some() {
            config.auth_token.clone_from(&self.auth_token);
        }
        if let Some(value) = self.upload_concurrency {
            config.upload_concurrency = usize::from(value);
        }
        if let Some(value) = self.download_concurrency {
            config.download_concurrency = usize::from(value);
        }
        if let Some(value) = self.max_retries {
            config.max_retries = u32::from(value);
        }
        if let Some(value) = self.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.debounce_ms {
            config.debounce_window = Duration::from_millis(value);
        }
        if let Some(value) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.upload_timeout_secs {
            config.upload_timeout = Duration::from_secs(value);
        }
        if let Some(value) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(value);
        }
        if let Some(value) = self.read_timeout_secs {
            config.read_timeout = Duration::from_secs(value);
        }
        if let Some(value) = self.db_max_connections {
            config.db_max_connections = value;
        }
        if let Some(value) = self.db_busy_timeout_ms {
            config.db_busy_timeout_ms = value;
        }
    }
}

fn validate_concurrency(field: &str, value: Option<u8>) -> Result<()> {
    if let Some(value) = value
        && !(1..=100).contains(&value)
    {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=100");
    }
    Ok(())
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/transferq/config.toml`
/// 2. `$HOME/.config/transferq/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("transferq")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("transferq")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` if given (it must exist), otherwise from the
/// default path if present.
pub fn load_file_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = read_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig { path, config: None });
    };
    if !path_ref.exists() {
        return Ok(LoadedConfig { path, config: None });
    }

    let config = read_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
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
        let line_no = line_index + 1;
        let string = || {
            parse_string_literal(value)
                .with_context(|| format!("Invalid `{key}` value on line {line_no}"))
        };
        let integer = || {
            parse_integer_u64(value)
                .with_context(|| format!("Invalid `{key}` value on line {line_no}"))
        };
        let small = || {
            parse_integer_u8(value)
                .with_context(|| format!("Invalid `{key}` value on line {line_no}"))
        };
        let medium = || {
            let parsed = integer()?;
            u32::try_from(parsed).map_err(|_| anyhow::anyhow!("{key} out of range for u32"))
        };

        match key {
            "base_url" => cfg.base_url = Some(string()?),
            "ingest_path" => cfg.ingest_path = Some(string()?),
            "task_status_path" => cfg.task_status_path = Some(string()?),
            "auth_token" => cfg.auth_token = Some(string()?),
            "database_path" => cfg.database_path = Some(PathBuf::from(string()?)),
            "upload_concurrency" => cfg.upload_concurrency = Some(small()?),
            "download_concurrency" => cfg.download_concurrency = Some(small()?),
            "max_retries" => cfg.max_retries = Some(small()?),
            "retry_base_delay_ms" => cfg.retry_base_delay_ms = Some(integer()?),
            "debounce_ms" => cfg.debounce_ms = Some(integer()?),
            "poll_interval_ms" => cfg.poll_interval_ms = Some(integer()?),
            "upload_timeout_secs" => cfg.upload_timeout_secs = Some(integer()?),
            "connect_timeout_secs" => cfg.connect_timeout_secs = Some(integer()?),
            "read_timeout_secs" => cfg.read_timeout_secs = Some(integer()?),
            "db_max_connections" => cfg.db_max_connections = Some(medium()?),
            "db_busy_timeout_ms" => cfg.db_busy_timeout_ms = Some(medium()?),
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
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
