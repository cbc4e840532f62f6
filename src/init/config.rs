// SPDX-License-Identifier: Apache-2.0

//! File and environment configuration.
//!
//! A TOML file is merged under `TAILSHIP_`-prefixed environment variables, with
//! `__` separating nested keys (`TAILSHIP_FORWARDER__HOST`). Every field has a
//! default, so an empty file is a valid configuration that tails nothing.

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::archive::ArchiveConfig;
use crate::discovery::DiscoveryRoot;
use crate::enrich::{
    DEFAULT_INTERNAL_PREFIX, DEFAULT_TIMESTAMP_PATTERN, EnrichConfig, LineParser, parse_offset,
};
use crate::forwarder::{Auth, ForwarderConfig, PayloadFormat, RetryConfig, TlsSettings};
use crate::pipeline::PipelineSettings;
use crate::tail::TailConfig;

pub const ENV_PREFIX: &str = "TAILSHIP_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub state_dir: PathBuf,
    pub tail: TailSection,
    pub archive: ArchiveSection,
    pub enrich: EnrichSection,
    pub probe: ProbeSection,
    pub positions: PositionsSection,
    pub status: StatusSection,
    pub forwarder: ForwarderSection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tail: TailSection::default(),
            archive: ArchiveSection::default(),
            enrich: EnrichSection::default(),
            probe: ProbeSection::default(),
            positions: PositionsSection::default(),
            status: StatusSection::default(),
            forwarder: ForwarderSection::default(),
        }
    }
}

#[cfg(unix)]
fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/tailship")
}

#[cfg(not(unix))]
fn default_state_dir() -> PathBuf {
    PathBuf::from("C:\\ProgramData\\tailship")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailSection {
    pub roots: Vec<DiscoveryRoot>,
    pub max_depth: usize,
    pub extension: String,
    pub exclude: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub max_bytes_per_tick: usize,
    pub max_line_bytes: usize,
    pub multiline_start_pattern: Option<String>,
    #[serde(with = "humantime_serde")]
    pub multiline_flush_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    pub timestamp_pattern: String,
}

impl Default for TailSection {
    fn default() -> Self {
        let tail = TailConfig::default();
        Self {
            roots: tail.roots,
            max_depth: tail.max_depth,
            extension: tail.extension,
            exclude: tail.exclude,
            interval: Duration::from_secs(1),
            max_bytes_per_tick: tail.max_bytes_per_tick,
            max_line_bytes: tail.max_line_bytes,
            multiline_start_pattern: tail.multiline_start_pattern,
            multiline_flush_timeout: tail.multiline_flush_timeout,
            grace_period: tail.grace_period,
            timestamp_pattern: DEFAULT_TIMESTAMP_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    /// Archive processing runs only when enabled and at least one root is set
    pub enabled: bool,
    pub roots: Vec<DiscoveryRoot>,
    pub max_depth: usize,
    pub batch_size: usize,
    pub batch_byte_ceiling: u64,
    pub max_file_bytes: u64,
    pub max_decompressed_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        let archive = ArchiveConfig::with_state_dir(PathBuf::new());
        Self {
            enabled: true,
            roots: Vec::new(),
            max_depth: archive.max_depth,
            batch_size: archive.batch_size,
            batch_byte_ceiling: archive.batch_byte_ceiling,
            max_file_bytes: archive.max_file_bytes,
            max_decompressed_bytes: archive.max_decompressed_bytes,
            interval: archive.interval,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichSection {
    /// Offset for timestamps without one, e.g. `+02:00`
    pub timezone: String,
    /// Reported hostname, defaults to the system hostname
    pub hostname: Option<String>,
    pub internal_prefix: String,
    /// Tag of the decompressed-archive tail root
    pub archive_tag: String,
}

impl Default for EnrichSection {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            hostname: None,
            internal_prefix: DEFAULT_INTERNAL_PREFIX.to_string(),
            archive_tag: "archive".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Address used to pick the outbound interface, `host:port`
    pub route_target: Option<String>,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            route_target: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionsSection {
    /// Move a corrupt positions file aside and start over instead of refusing to start
    pub reset_on_corruption: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSection {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatArg {
    #[default]
    JsonArray,
    Ndjson,
}

impl From<FormatArg> for PayloadFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::JsonArray => PayloadFormat::JsonArray,
            FormatArg::Ndjson => PayloadFormat::Ndjson,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderSection {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub stream: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub format: FormatArg,
    pub compression: bool,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub buffer_max_bytes: usize,
    pub max_batch_records: usize,
    pub max_batch_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_flush_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    pub tls_ca_file: Option<PathBuf>,
    pub tls_skip_verify: bool,
}

// Credentials stay out of debug output
impl std::fmt::Debug for ForwarderSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderSection")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("stream", &self.stream)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("format", &self.format)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl Default for ForwarderSection {
    fn default() -> Self {
        let fwd = ForwarderConfig::default();
        Self {
            scheme: fwd.scheme,
            host: fwd.host,
            port: fwd.port,
            path: fwd.path,
            stream: fwd.stream,
            username: None,
            password: None,
            token: None,
            format: FormatArg::default(),
            compression: fwd.compression,
            request_timeout: fwd.request_timeout,
            buffer_max_bytes: fwd.buffer_max_bytes,
            max_batch_records: fwd.max_batch_records,
            max_batch_bytes: fwd.max_batch_bytes,
            flush_interval: fwd.flush_interval,
            shutdown_flush_timeout: fwd.shutdown_flush_timeout,
            initial_backoff: fwd.retry.initial_backoff,
            max_backoff: fwd.retry.max_backoff,
            tls_ca_file: None,
            tls_skip_verify: false,
        }
    }
}

impl ForwarderSection {
    fn auth(&self) -> Result<Auth, ConfigError> {
        match (&self.username, &self.token) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "forwarder username and token are mutually exclusive".to_string(),
            )),
            (Some(username), None) => Ok(Auth::Basic {
                username: username.clone(),
                password: self.password.clone().unwrap_or_default(),
            }),
            (None, Some(token)) => Ok(Auth::Bearer(token.clone())),
            (None, None) => Ok(Auth::None),
        }
    }

    fn to_forwarder_config(&self) -> Result<ForwarderConfig, ConfigError> {
        Ok(ForwarderConfig {
            scheme: self.scheme.to_lowercase(),
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            stream: self.stream.clone(),
            auth: self.auth()?,
            format: self.format.into(),
            compression: self.compression,
            request_timeout: self.request_timeout,
            buffer_max_bytes: self.buffer_max_bytes,
            max_batch_records: self.max_batch_records,
            max_batch_bytes: self.max_batch_bytes,
            flush_interval: self.flush_interval,
            shutdown_flush_timeout: self.shutdown_flush_timeout,
            retry: RetryConfig {
                initial_backoff: self.initial_backoff,
                max_backoff: self.max_backoff,
            },
            tls: TlsSettings {
                ca_file: self.tls_ca_file.clone(),
                skip_verify: self.tls_skip_verify,
            },
        })
    }
}

/// Load the configuration from an optional TOML file and the environment.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
}

impl PipelineConfig {
    /// Resolve into the settings the pipeline runs with, validating every part.
    pub fn into_settings(self) -> Result<PipelineSettings, ConfigError> {
        let mut settings = PipelineSettings::new(&self.state_dir);

        if self.tail.roots.is_empty() && !self.archive_enabled() {
            return Err(ConfigError::Invalid(
                "at least one tail or archive root must be configured".to_string(),
            ));
        }

        settings.tail = TailConfig {
            roots: self.tail.roots.clone(),
            max_depth: self.tail.max_depth,
            extension: self.tail.extension.clone(),
            exclude: self.tail.exclude.clone(),
            max_bytes_per_tick: self.tail.max_bytes_per_tick,
            max_line_bytes: self.tail.max_line_bytes,
            multiline_start_pattern: self.tail.multiline_start_pattern.clone(),
            multiline_flush_timeout: self.tail.multiline_flush_timeout,
            grace_period: self.tail.grace_period,
        };
        settings.tail_interval = self.tail.interval;
        LineParser::new(&self.tail.timestamp_pattern).map_err(ConfigError::Invalid)?;
        settings.timestamp_pattern = self.tail.timestamp_pattern.clone();

        let mut archive = ArchiveConfig::with_state_dir(&self.state_dir);
        let timezone = parse_offset(&self.enrich.timezone).ok_or_else(|| {
            ConfigError::Invalid(format!("invalid timezone offset: {}", self.enrich.timezone))
        })?;
        settings.enrich = EnrichConfig {
            archive_tag: self.enrich.archive_tag.clone(),
            mapping_path: archive.mapping_path.clone(),
            timezone,
            internal_prefix: self.enrich.internal_prefix.clone(),
            hostname_override: self.enrich.hostname.clone(),
        };

        if self.archive_enabled() {
            archive.roots = self.archive.roots.clone();
            archive.max_depth = self.archive.max_depth;
            archive.batch_size = self.archive.batch_size;
            archive.batch_byte_ceiling = self.archive.batch_byte_ceiling;
            archive.max_file_bytes = self.archive.max_file_bytes;
            archive.max_decompressed_bytes = self.archive.max_decompressed_bytes;
            archive.interval = self.archive.interval;
            settings.archive = Some(archive);
        }

        settings.probe_interval = self.probe.enabled.then_some(self.probe.interval);
        settings.probe_route_target = self.probe.route_target.clone();
        settings.reset_positions_on_corruption = self.positions.reset_on_corruption;
        settings.status_interval = self.status.interval;
        settings.forwarder = self.forwarder.to_forwarder_config()?;

        settings.validate().map_err(ConfigError::Invalid)?;
        Ok(settings)
    }

    fn archive_enabled(&self) -> bool {
        self.archive.enabled && !self.archive.roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_file_merged_with_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "tailship.toml",
                r#"
state_dir = "/tmp/tailship-state"

[tail]
roots = [{ path = "/var/log/app", tag = "app" }]
interval = "500ms"
multiline_start_pattern = '^\d{4}-'

[archive]
roots = [{ path = "/var/log/app/old", tag = "old" }]
batch_size = 5

[enrich]
timezone = "+02:00"

[forwarder]
host = "logs.example.com"
port = 5080
stream = "windows"
username = "ingest"
password = "secret"
compression = true
format = "ndjson"
flush_interval = "2s"
"#,
            )?;
            jail.set_env("TAILSHIP_FORWARDER__HOST", "collector.internal");
            jail.set_env("TAILSHIP_PROBE__ENABLED", "false");

            let config = load_config(Some(Path::new("tailship.toml"))).unwrap();
            assert_eq!(config.forwarder.host, "collector.internal");
            assert_eq!(config.tail.interval, Duration::from_millis(500));

            let settings = config.into_settings().unwrap();
            assert_eq!(settings.tail.roots.len(), 1);
            assert_eq!(settings.tail_interval, Duration::from_millis(500));
            assert_eq!(settings.probe_interval, None);

            let archive = settings.archive.as_ref().unwrap();
            assert_eq!(archive.batch_size, 5);
            assert_eq!(
                archive.temp_dir,
                PathBuf::from("/tmp/tailship-state").join("decompressed")
            );
            assert_eq!(settings.enrich.mapping_path, archive.mapping_path);
            assert_eq!(settings.enrich.timezone.local_minus_utc(), 7200);

            let fwd = &settings.forwarder;
            assert_eq!(fwd.url(), "https://collector.internal:5080/api/default/windows/_json");
            assert_eq!(fwd.format, PayloadFormat::Ndjson);
            assert!(fwd.compression);
            assert_eq!(
                fwd.auth,
                Auth::Basic {
                    username: "ingest".to_string(),
                    password: "secret".to_string()
                }
            );
            assert_eq!(fwd.flush_interval, Duration::from_secs(2));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let err = load_config(Some(Path::new("nope.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::NotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn test_env_only_configuration() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("TAILSHIP_FORWARDER__TOKEN", "abc");
            jail.set_env("TAILSHIP_FORWARDER__SCHEME", "http");
            jail.set_env("TAILSHIP_TAIL__ROOTS", r#"[{path="/logs",tag="logs"}]"#);

            let settings = load_config(None).unwrap().into_settings().unwrap();
            assert_eq!(settings.forwarder.auth, Auth::Bearer("abc".to_string()));
            assert_eq!(settings.forwarder.scheme, "http");
            assert_eq!(settings.tail.roots[0].tag, "logs");
            assert!(settings.archive.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_settings_rejected() {
        Jail::expect_with(|jail| {
            jail.clear_env();

            // Nothing to tail
            assert!(matches!(
                load_config(None).unwrap().into_settings(),
                Err(ConfigError::Invalid(_))
            ));

            jail.set_env("TAILSHIP_TAIL__ROOTS", r#"[{path="/logs",tag="logs"}]"#);
            jail.set_env("TAILSHIP_ENRICH__TIMEZONE", "Mars/Olympus");
            assert!(load_config(None).unwrap().into_settings().is_err());

            jail.set_env("TAILSHIP_ENRICH__TIMEZONE", "UTC");
            jail.set_env("TAILSHIP_FORWARDER__USERNAME", "u");
            jail.set_env("TAILSHIP_FORWARDER__TOKEN", "t");
            assert!(load_config(None).unwrap().into_settings().is_err());
            Ok(())
        });
    }
}
