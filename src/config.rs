//! Proxy filter configuration.
//!
//! Configuration is read from JSON and validated once; the resulting
//! [`ProxyFilterConfig`] is shared by every connection it serves and owns
//! the stat handles those connections record into.

use std::{path::Path, sync::Arc};

use serde::Deserialize;
use thiserror::Error;

use crate::{metrics::ProxyStats, resp::DEFAULT_MAX_FRAME_LENGTH};

/// Default write-buffer size above which client reads are paused.
pub const DEFAULT_HIGH_WATERMARK: usize = 1024 * 1024;
/// Default write-buffer size at or below which client reads resume.
pub const DEFAULT_LOW_WATERMARK: usize = DEFAULT_HIGH_WATERMARK / 2;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The document is not valid JSON or does not match the schema.
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    /// A required string field is empty.
    #[error("config field '{0}' must not be empty")]
    EmptyField(&'static str),
    /// The low watermark is above the high watermark.
    #[error("write buffer low watermark {low} exceeds high watermark {high}")]
    InvertedWatermarks {
        /// Configured low watermark.
        low: usize,
        /// Configured high watermark.
        high: usize,
    },
    /// The frame limit is zero.
    #[error("max_frame_length must be positive")]
    ZeroFrameLength,
}

/// On-disk representation of the filter configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    /// Backend cluster the splitter routes to.
    pub cluster_name: String,
    /// Prefix inserted into every stat name.
    pub stat_prefix: String,
    /// Write-buffer size above which reads are paused.
    #[serde(default = "default_high_watermark")]
    pub write_buffer_high_watermark: usize,
    /// Write-buffer size at or below which reads resume.
    #[serde(default = "default_low_watermark")]
    pub write_buffer_low_watermark: usize,
    /// Largest encoded command accepted from a client.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

fn default_high_watermark() -> usize { DEFAULT_HIGH_WATERMARK }

fn default_low_watermark() -> usize { DEFAULT_LOW_WATERMARK }

fn default_max_frame_length() -> usize { DEFAULT_MAX_FRAME_LENGTH }

impl ProxySettings {
    /// Settings with default limits for the given cluster and stat prefix.
    #[must_use]
    pub fn new(cluster_name: impl Into<String>, stat_prefix: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            stat_prefix: stat_prefix.into(),
            write_buffer_high_watermark: DEFAULT_HIGH_WATERMARK,
            write_buffer_low_watermark: DEFAULT_LOW_WATERMARK,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Replace both write-buffer watermarks.
    #[must_use]
    pub fn with_watermarks(mut self, low: usize, high: usize) -> Self {
        self.write_buffer_low_watermark = low;
        self.write_buffer_high_watermark = high;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.is_empty() {
            return Err(ConfigError::EmptyField("cluster_name"));
        }
        if self.stat_prefix.is_empty() {
            return Err(ConfigError::EmptyField("stat_prefix"));
        }
        if self.write_buffer_low_watermark > self.write_buffer_high_watermark {
            return Err(ConfigError::InvertedWatermarks {
                low: self.write_buffer_low_watermark,
                high: self.write_buffer_high_watermark,
            });
        }
        if self.max_frame_length == 0 {
            return Err(ConfigError::ZeroFrameLength);
        }
        Ok(())
    }
}

/// Validated configuration shared by all connections of one listener.
#[derive(Debug)]
pub struct ProxyFilterConfig {
    settings: ProxySettings,
    stats: ProxyStats,
}

/// Shared handle to a [`ProxyFilterConfig`].
pub type ProxyFilterConfigRef = Arc<ProxyFilterConfig>;

impl ProxyFilterConfig {
    /// Validate `settings` and register the stats for its prefix.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the settings are inconsistent.
    pub fn new(settings: ProxySettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let stats = ProxyStats::new(&settings.stat_prefix);
        Ok(Self { settings, stats })
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is malformed or invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use redis_proxy::config::ProxyFilterConfig;
    ///
    /// let config = ProxyFilterConfig::from_json(r#"{"cluster_name": "cache", "stat_prefix": "front"}"#)
    ///     .expect("valid config");
    /// assert_eq!(config.cluster_name(), "cache");
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::new(serde_json::from_str(json)?)
    }

    /// Read, parse, and validate a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Backend cluster name.
    #[must_use]
    pub fn cluster_name(&self) -> &str { &self.settings.cluster_name }

    /// Stat prefix.
    #[must_use]
    pub fn stat_prefix(&self) -> &str { &self.settings.stat_prefix }

    /// Stats recorded by connections using this configuration.
    #[must_use]
    pub fn stats(&self) -> &ProxyStats { &self.stats }

    /// Write-buffer size above which reads are paused.
    #[must_use]
    pub fn high_watermark(&self) -> usize { self.settings.write_buffer_high_watermark }

    /// Write-buffer size at or below which reads resume.
    #[must_use]
    pub fn low_watermark(&self) -> usize { self.settings.write_buffer_low_watermark }

    /// Largest encoded command accepted from a client.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.settings.max_frame_length }
}
