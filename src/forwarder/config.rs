// SPDX-License-Identifier: Apache-2.0

//! Configuration for the forwarder.

use std::path::PathBuf;
use std::time::Duration;

/// Placeholder in the endpoint path replaced by the stream identifier
pub const STREAM_PLACEHOLDER: &str = "{stream}";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// One JSON array per request
    #[default]
    JsonArray,
    /// Newline-delimited JSON objects
    Ndjson,
}

impl PayloadFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            PayloadFormat::JsonArray => "application/json",
            PayloadFormat::Ndjson => "application/x-ndjson",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// TLS settings for the collector connection
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// PEM file with the CA to trust instead of the native roots
    pub ca_file: Option<PathBuf>,
    /// Accept any server certificate
    pub skip_verify: bool,
}

/// Configuration for the forwarder
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Request path, may contain `{stream}`
    pub path: String,
    pub stream: String,
    pub auth: Auth,
    pub format: PayloadFormat,
    /// Gzip request bodies
    pub compression: bool,
    pub request_timeout: Duration,
    /// Buffered bytes beyond which the oldest records are dropped
    pub buffer_max_bytes: usize,
    pub max_batch_records: usize,
    pub max_batch_bytes: usize,
    pub flush_interval: Duration,
    pub shutdown_flush_timeout: Duration,
    pub retry: RetryConfig,
    pub tls: TlsSettings,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            host: "localhost".to_string(),
            port: 443,
            path: "/api/default/{stream}/_json".to_string(),
            stream: "default".to_string(),
            auth: Auth::None,
            format: PayloadFormat::JsonArray,
            compression: false,
            request_timeout: Duration::from_secs(30),
            buffer_max_bytes: 64 * 1024 * 1024,
            max_batch_records: 1000,
            max_batch_bytes: 4 * 1024 * 1024,
            flush_interval: Duration::from_secs(1),
            shutdown_flush_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            tls: TlsSettings::default(),
        }
    }
}

impl ForwarderConfig {
    /// `{scheme}://{host}:{port}{path}` with the stream substituted
    pub fn url(&self) -> String {
        let path = self.path.replace(STREAM_PLACEHOLDER, &self.stream);
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.scheme != "http" && self.scheme != "https" {
            return Err(format!("Unsupported scheme: {}", self.scheme));
        }
        if self.host.is_empty() {
            return Err("Forwarder host must be set".to_string());
        }
        if self.max_batch_records == 0 || self.max_batch_bytes == 0 {
            return Err("Batch limits must be greater than zero".to_string());
        }
        if self.buffer_max_bytes < self.max_batch_bytes {
            return Err("buffer_max_bytes must be at least max_batch_bytes".to_string());
        }
        self.url()
            .parse::<http::Uri>()
            .map_err(|e| format!("Invalid forwarder endpoint: {}", e))?;
        Ok(())
    }
}
