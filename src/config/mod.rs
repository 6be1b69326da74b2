//! Configuration for the relay
//!
//! Configuration is loaded in order of precedence:
//! 1. Command-line flags (highest priority)
//! 2. Environment variables
//! 3. Config file (~/.config/reasoning-relay/config.toml)
//! 4. Built-in defaults (lowest priority)
//!
//! Unlike a missing file, a config file that exists but does not parse or
//! validate is fatal: a broken route should never silently fall back to
//! defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod observability;
mod routing;
mod serialization;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use routing::{
    default_tag_rules, validate_tag_rules, validate_target, FileRoute, FileTagRule, RouteConfig,
    TagActionKind, FALLBACK_TARGET,
};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ENV_CONFIG: &str = "RELAY_CONFIG";
pub const ENV_BIND: &str = "RELAY_BIND";
pub const ENV_TARGET: &str = "RELAY_TARGET_URL";

const DEFAULT_BIND: ([u8; 4], u16) = ([127, 0, 0, 1], 3000);
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const DEFAULT_RELAY_BUFFER: usize = 16;
const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the relay to
    pub bind_addr: SocketAddr,

    /// Bound on connect + send + response headers from the backend
    pub upstream_timeout: Duration,

    /// Longest wait for the next body chunk from the backend
    pub read_timeout: Duration,

    /// Largest body held in memory: client requests and buffered responses
    pub max_body_bytes: usize,

    /// Largest SSE frame rewritten; longer frames are relayed untouched
    pub max_frame_bytes: usize,

    /// Chunks buffered between the backend reader and the client
    pub relay_buffer: usize,

    /// Target of the implicit catch-all route, if any
    pub default_target: Option<String>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Routes in declaration order (without the implicit catch-all)
    pub routes: Vec<RouteConfig>,

    /// File this configuration was read from
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(DEFAULT_BIND),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            relay_buffer: DEFAULT_RELAY_BUFFER,
            default_target: None,
            logging: LoggingConfig::default(),
            routes: Vec::new(),
            source: None,
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub path: Option<PathBuf>,
    pub bind: Option<String>,
    pub target: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub upstream_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub max_frame_bytes: Option<usize>,
    pub relay_buffer: Option<usize>,
    pub default_target: Option<String>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// [[routes]] tables
    #[serde(default)]
    pub routes: Vec<FileRoute>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/reasoning-relay/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| {
            p.join(".config")
                .join("reasoning-relay")
                .join("config.toml")
        })
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Silently fail - config is optional
            }
        }

        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Path that `load` would read, and whether it was asked for explicitly
    pub fn resolve_path(overrides: &ConfigOverrides) -> (Option<PathBuf>, bool) {
        match overrides
            .path
            .clone()
            .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from))
        {
            Some(path) => (Some(path), true),
            None => (Self::config_path(), false),
        }
    }

    /// Load configuration: flags -> env vars -> file -> defaults
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let (path, explicit) = Self::resolve_path(overrides);

        let file = match &path {
            Some(path) => Self::load_file_config(path, explicit)?,
            None => None,
        };
        let source = file.as_ref().and(path);

        Self::resolve(
            file.unwrap_or_default(),
            overrides,
            |key| std::env::var(key).ok(),
            source,
        )
    }

    /// Parse a config file from a string (no env vars, no flags)
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(contents).context("Failed to parse config")?;
        Self::resolve(file, &ConfigOverrides::default(), |_| None, None)
    }

    /// Read the file config. A missing file is fine unless it was named
    /// explicitly.
    fn load_file_config(path: &Path, required: bool) -> Result<Option<FileConfig>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
                .map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Cannot read config file {}", path.display()))
            }
        }
    }

    /// Merge the layers and validate
    fn resolve(
        file: FileConfig,
        overrides: &ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
        source: Option<PathBuf>,
    ) -> Result<Self> {
        let defaults = Self::default();

        // Bind address: flag > env > file > default
        let bind_addr = match overrides
            .bind
            .clone()
            .or_else(|| env(ENV_BIND))
            .or(file.bind_addr)
        {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("Invalid bind address {:?}", addr))?,
            None => defaults.bind_addr,
        };

        // Default target: flag > env > file
        let default_target = overrides
            .target
            .clone()
            .or_else(|| env(ENV_TARGET))
            .or(file.default_target)
            .map(|t| t.trim_end_matches('/').to_string());
        if let Some(target) = &default_target {
            validate_target(target).context("Invalid default_target")?;
        }

        let upstream_timeout = file
            .upstream_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.upstream_timeout);
        let read_timeout = file
            .read_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.read_timeout);
        let max_body_bytes = file.max_body_bytes.unwrap_or(defaults.max_body_bytes);
        let max_frame_bytes = file.max_frame_bytes.unwrap_or(defaults.max_frame_bytes);
        let relay_buffer = file.relay_buffer.unwrap_or(defaults.relay_buffer);

        if upstream_timeout.is_zero() || read_timeout.is_zero() {
            bail!("Timeouts must be at least one second");
        }
        if relay_buffer == 0 {
            bail!("relay_buffer must be at least 1");
        }
        if max_body_bytes == 0 || max_frame_bytes == 0 {
            bail!("max_body_bytes and max_frame_bytes must be at least 1");
        }

        let base_dir = source.as_deref().and_then(Path::parent);
        let routes = file
            .routes
            .into_iter()
            .enumerate()
            .map(|(i, route)| RouteConfig::from_file(route, i, default_target.as_deref(), base_dir))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bind_addr,
            upstream_timeout,
            read_timeout,
            max_body_bytes,
            max_frame_bytes,
            relay_buffer,
            default_target,
            logging: LoggingConfig::from_file(file.logging).context("Invalid [logging] section")?,
            routes,
            source,
        })
    }

    /// Routes the relay actually serves
    ///
    /// `default_target` adds a catch-all after the declared routes. With no
    /// routes and no default target, everything goes to the fallback backend.
    pub fn effective_routes(&self) -> Vec<RouteConfig> {
        let mut routes = self.routes.clone();
        match &self.default_target {
            Some(target) => routes.push(RouteConfig::catch_all(target.clone())),
            None if routes.is_empty() => routes.push(RouteConfig::catch_all(FALLBACK_TARGET)),
            None => {}
        }
        routes
    }
}
