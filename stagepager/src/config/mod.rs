//! Configuration management for `StagePager`.
//!
//! Settings are resolved from (in priority order):
//! 1. CLI arguments
//! 2. Config file (`~/.config/stagepager/config.toml` by default)
//! 3. Built-in defaults
//!
//! The config file is also where v7 template discovery writes back the
//! adopted message slot, through the [`DiscoveryStore`] seam.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use stagepager_proto::payload::{MessageSlot, ProtocolVersion};

use crate::bridge::BridgeConfig;

/// Errors that can occur while loading or writing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("could not read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file could not be written back.
    #[error("could not write config file {path}: {source}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML.
    #[error("could not parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The write-back document could not be serialized.
    #[error("could not serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),

    /// The platform config directory could not be determined.
    #[error("could not determine the user config directory")]
    NoConfigDir,

    /// The presentation password is missing or empty.
    #[error("presentation password must not be empty")]
    EmptyPassword,

    /// The configured protocol version is not 6 or 7.
    #[error("unsupported presentation protocol version {0}")]
    UnsupportedVersion(u64),
}

/// Raw config file shape. All fields optional; missing values fall
/// back to defaults during resolution.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct ConfigFile {
    chat: ChatFileConfig,
    presentation: PresentationFileConfig,
    network: NetworkFileConfig,
    internal: InternalFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct ChatFileConfig {
    listen_channel: Option<String>,
    ignore_codes: Option<Vec<String>>,
    bot_token: Option<String>,
    app_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct PresentationFileConfig {
    version: Option<u64>,
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    batch_window_seconds: Option<u64>,
    batch_max_count: Option<usize>,
    ack_guess_seconds: Option<u64>,
    template_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct NetworkFileConfig {
    target: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct InternalFileConfig {
    message_index: Option<u32>,
    message_token: Option<String>,
}

/// Token server coordinates for the startup bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Base URL of the token server.
    pub target: String,
    /// Shared secret sent in the `Authorization` header.
    pub secret: String,
}

/// Fully resolved settings consumed by the binary.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Chat channel the bridge listens on.
    pub listen_channel: String,
    /// Codes acknowledged with an `x` instead of being displayed.
    pub ignore_codes: Vec<String>,
    /// Bot user token, configured or bootstrapped.
    pub bot_token: Option<String>,
    /// Socket-mode app token, configured or bootstrapped.
    pub app_token: Option<String>,
    /// Protocol dialect of the presentation endpoint.
    pub version: ProtocolVersion,
    /// Presentation control host.
    pub host: String,
    /// Presentation control port.
    pub port: u16,
    /// Control password.
    pub password: String,
    /// Batching window opened by the first code of a batch.
    pub batch_window: Duration,
    /// Most codes displayed in one batch.
    pub batch_max: usize,
    /// How long a batch is presumed visible under timed feedback.
    pub ack_guess: Duration,
    /// Marker looked for in template titles during discovery.
    pub template_marker: String,
    /// Token server coordinates, when bootstrap is configured.
    pub network: Option<NetworkSettings>,
    /// Slot remembered from a previous discovery run.
    pub saved_slot: Option<MessageSlot>,
    /// Log level filter.
    pub log_level: String,
    /// Log file path, when file logging is requested.
    pub log_file: Option<PathBuf>,
    /// The config file these settings came from (write-back target).
    pub source_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_channel: String::new(),
            ignore_codes: Vec::new(),
            bot_token: None,
            app_token: None,
            version: ProtocolVersion::V7,
            host: "127.0.0.1".to_string(),
            port: 55184,
            password: String::new(),
            batch_window: Duration::from_secs(10),
            batch_max: 3,
            ack_guess: Duration::from_secs(45),
            template_marker: "pager".to_string(),
            network: None,
            saved_slot: None,
            log_level: "info".to_string(),
            log_file: None,
            source_path: None,
        }
    }
}

impl Settings {
    /// Load settings from CLI arguments, the config file, and defaults.
    ///
    /// # Errors
    ///
    /// Fails when an explicitly given config path cannot be read, the
    /// file is not valid TOML, the password is empty, or the protocol
    /// version is unsupported.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let (file, source_path) = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file, source_path)
    }

    /// Project the bridge-facing subset of these settings.
    #[must_use]
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            listen_channel: self.listen_channel.clone(),
            ignore_codes: self.ignore_codes.clone(),
            version: self.version,
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            batch_window: self.batch_window,
            batch_max: self.batch_max,
            ack_guess: self.ack_guess,
            template_marker: self.template_marker.clone(),
            saved_slot: self.saved_slot.clone(),
        }
    }

    fn resolve(
        cli: &CliArgs,
        file: &ConfigFile,
        source_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let version_major = file
            .presentation
            .version
            .unwrap_or_else(|| u64::from(defaults.version.major()));
        let version = ProtocolVersion::from_major(version_major)
            .ok_or(ConfigError::UnsupportedVersion(version_major))?;

        let password = file.presentation.password.clone().unwrap_or_default();
        if password.is_empty() {
            return Err(ConfigError::EmptyPassword);
        }

        let network = match (&file.network.target, &file.network.secret) {
            (Some(target), Some(secret)) => Some(NetworkSettings {
                target: target.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        };

        // Both fields are needed to name a slot; a lone leftover is
        // treated as absent.
        let saved_slot = match (file.internal.message_index, &file.internal.message_token) {
            (Some(index), Some(token)) => Some(MessageSlot {
                index,
                token: token.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            listen_channel: cli
                .channel
                .clone()
                .or_else(|| file.chat.listen_channel.clone())
                .unwrap_or(defaults.listen_channel),
            ignore_codes: file
                .chat
                .ignore_codes
                .clone()
                .unwrap_or(defaults.ignore_codes),
            bot_token: file.chat.bot_token.clone(),
            app_token: file.chat.app_token.clone(),
            version,
            host: cli
                .host
                .clone()
                .or_else(|| file.presentation.host.clone())
                .unwrap_or(defaults.host),
            port: cli.port.or(file.presentation.port).unwrap_or(defaults.port),
            password,
            batch_window: file
                .presentation
                .batch_window_seconds
                .map_or(defaults.batch_window, Duration::from_secs),
            // A cap below one code makes no batch dispatchable.
            batch_max: file
                .presentation
                .batch_max_count
                .unwrap_or(defaults.batch_max)
                .max(1),
            ack_guess: file
                .presentation
                .ack_guess_seconds
                .map_or(defaults.ack_guess, Duration::from_secs),
            template_marker: file
                .presentation
                .template_marker
                .clone()
                .unwrap_or(defaults.template_marker),
            network,
            saved_slot,
            log_level: if cli.log_level.is_empty() {
                defaults.log_level
            } else {
                cli.log_level.clone()
            },
            log_file: cli.log_file.clone(),
            source_path,
        })
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "stagepager",
    version,
    about = "Chat-driven pager bridge for stage presentation software"
)]
pub struct CliArgs {
    /// Path to the config file (default: ~/.config/stagepager/config.toml)
    #[arg(short, long, env = "STAGEPAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Chat channel to listen on
    #[arg(long, env = "STAGEPAGER_CHANNEL")]
    pub channel: Option<String>,

    /// Presentation control host
    #[arg(long)]
    pub host: Option<String>,

    /// Presentation control port
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "STAGEPAGER_LOG")]
    pub log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Load the raw config file, returning the path actually used.
///
/// An explicitly given path must exist. The default path is optional;
/// when it is absent, everything resolves from defaults.
fn load_config_file(explicit: Option<&Path>) -> Result<(ConfigFile, Option<PathBuf>), ConfigError> {
    if let Some(path) = explicit {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file = toml::from_str(&contents)?;
        return Ok((file, Some(path.to_path_buf())));
    }

    let path = default_config_path()?;
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok((ConfigFile::default(), None));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
        path: path.clone(),
        source: e,
    })?;
    let file = toml::from_str(&contents)?;
    Ok((file, Some(path)))
}

/// Platform config path: `<config dir>/stagepager/config.toml`.
fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join("stagepager").join("config.toml"))
}

/// Persistence seam for the auto-discovered message slot.
pub trait DiscoveryStore: Send + Sync {
    /// Record `slot` so later runs start from it.
    ///
    /// # Errors
    ///
    /// Implementations report their own persistence failures.
    fn save(&self, slot: &MessageSlot) -> Result<(), ConfigError>;
}

/// Writes the discovered slot into the `[internal]` table of the
/// config file, leaving every other table untouched.
pub struct TomlDiscoveryStore {
    path: PathBuf,
}

impl TomlDiscoveryStore {
    /// Store writing back to `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl DiscoveryStore for TomlDiscoveryStore {
    fn save(&self, slot: &MessageSlot) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        let mut document: toml::Table = toml::from_str(&contents)?;

        let mut internal = toml::Table::new();
        internal.insert(
            "message-index".to_string(),
            toml::Value::Integer(i64::from(slot.index)),
        );
        internal.insert(
            "message-token".to_string(),
            toml::Value::String(slot.token.clone()),
        );
        document.insert("internal".to_string(), toml::Value::Table(internal));

        let serialized = toml::to_string(&document)?;
        std::fs::write(&self.path, serialized).map_err(|e| ConfigError::WriteFile {
            path: self.path.clone(),
            source: e,
        })?;

        tracing::info!(path = %self.path.display(), "saved the discovered message slot");
        Ok(())
    }
}

/// Discards discovered slots. For runs driven without a config file.
pub struct NullDiscoveryStore;

impl DiscoveryStore for NullDiscoveryStore {
    fn save(&self, _slot: &MessageSlot) -> Result<(), ConfigError> {
        Ok(())
    }
}
