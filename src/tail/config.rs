// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tail reader.

use std::time::Duration;

use crate::discovery::{DiscoveryRoot, check_roots};

/// Configuration for the tail reader
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Directories whose log files are tailed
    pub roots: Vec<DiscoveryRoot>,
    /// Directory levels searched below each root
    pub max_depth: usize,
    /// File extension to tail, without the leading dot
    pub extension: String,
    /// Glob patterns for files to skip
    pub exclude: Vec<String>,
    /// Maximum bytes read from one file in one tick
    pub max_bytes_per_tick: usize,
    /// Maximum length of a single line in bytes
    pub max_line_bytes: usize,
    /// Regex matching the first line of a record; unset means one record per line
    pub multiline_start_pattern: Option<String>,
    /// Emit a pending multi-line record after this long without new lines
    pub multiline_flush_timeout: Duration,
    /// How long a file may be missing from discovery before it is evicted
    pub grace_period: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            max_depth: 2,
            extension: "log".to_string(),
            exclude: Vec::new(),
            max_bytes_per_tick: 4 * 1024 * 1024,
            max_line_bytes: 64 * 1024,
            multiline_start_pattern: None,
            multiline_flush_timeout: Duration::from_secs(5),
            grace_period: Duration::from_secs(60),
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        check_roots(&self.roots, "Tail")?;
        if self.max_line_bytes == 0 {
            return Err("max_line_bytes must be greater than zero".to_string());
        }
        if self.max_bytes_per_tick < self.max_line_bytes {
            return Err("max_bytes_per_tick must be at least max_line_bytes".to_string());
        }
        if let Some(pattern) = &self.multiline_start_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| format!("Invalid multiline start pattern: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_or_filesystem_root_is_rejected() {
        let mut config = TailConfig {
            roots: vec![DiscoveryRoot::new("/var/log/app", "app")],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        for path in ["", "/", "\\", "."] {
            config.roots = vec![
                DiscoveryRoot::new("/var/log/app", "app"),
                DiscoveryRoot::new(path, "all"),
            ];
            let err = config.validate().unwrap_err();
            assert!(err.starts_with("Tail root"), "{}", err);
        }
    }
}
