//! Sink configuration.
//!
//! A sink is configured by a single URI: the scheme and path select the
//! storage backend and prefix, query parameters tune the pipeline. Unknown
//! query parameters are passed through to the storage backend as options
//! (credentials, endpoints, etc.).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use drift_core::error::{
    ConfigError, FileIndexWidthOutOfRangeSnafu, FileSizeOutOfRangeSnafu,
    FlushIntervalOutOfRangeSnafu, InvalidParamSnafu, InvalidSinkUriSnafu, UnknownProtocolSnafu,
    WorkerCountOutOfRangeSnafu,
};
use drift_core::MB;
use snafu::prelude::*;

use crate::codec::Protocol;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(600);
const MIN_FILE_SIZE: usize = MB;
const MAX_FILE_SIZE: usize = 512 * MB;
const MAX_WORKER_COUNT: usize = 512;
const MIN_FILE_INDEX_WIDTH: usize = 6;
const MAX_FILE_INDEX_WIDTH: usize = 20;

/// Configuration for one cloud-storage sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Storage URI without query parameters (scheme selects the backend).
    pub storage_uri: String,
    /// Codec protocol.
    #[serde(default)]
    pub protocol: Protocol,
    /// Number of encoding workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Capacity of the ingest channel (the only admission control).
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    /// Maximum time between a file's first buffered byte and its upload.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Target file size; files rotate once the buffer exceeds it.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    /// Zero-padding width of the rotation index in file names.
    #[serde(default = "default_file_index_width")]
    pub file_index_width: usize,
    /// Whether to upload a schema descriptor before the first data file of
    /// each schema version.
    #[serde(default = "default_emit_schema_files")]
    pub emit_schema_files: bool,
    /// Upload retry budget (attempts beyond the first).
    #[serde(default = "default_upload_retries")]
    pub upload_retries: usize,
    /// Per-attempt upload deadline.
    #[serde(default = "default_upload_timeout", with = "humantime_serde")]
    pub upload_timeout: Duration,
    /// Options forwarded to the storage backend.
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_worker_count() -> usize {
    8
}

fn default_channel_size() -> usize {
    1024
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_file_size() -> usize {
    64 * MB
}

fn default_file_index_width() -> usize {
    10
}

fn default_emit_schema_files() -> bool {
    true
}

fn default_upload_retries() -> usize {
    3
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            storage_uri: String::new(),
            protocol: Protocol::default(),
            worker_count: default_worker_count(),
            channel_size: default_channel_size(),
            flush_interval: default_flush_interval(),
            max_file_size: default_max_file_size(),
            file_index_width: default_file_index_width(),
            emit_schema_files: default_emit_schema_files(),
            upload_retries: default_upload_retries(),
            upload_timeout: default_upload_timeout(),
            storage_options: HashMap::new(),
        }
    }
}

impl SinkConfig {
    /// Parse and validate a sink URI.
    ///
    /// ```text
    /// s3://bucket/prefix?protocol=csv&flush-interval=30s&file-size=33554432
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        // Bare filesystem paths carry no query parameters.
        if uri.starts_with('/') {
            return Ok(Self {
                storage_uri: uri.to_string(),
                ..Self::default()
            });
        }

        let url = Url::parse(uri).context(InvalidSinkUriSnafu {
            uri: uri.to_string(),
        })?;

        let mut config = Self::default();

        for (param, value) in url.query_pairs() {
            match param.as_ref() {
                "protocol" => {
                    config.protocol =
                        value
                            .parse::<Protocol>()
                            .ok()
                            .context(UnknownProtocolSnafu {
                                protocol: value.to_string(),
                            })?;
                }
                "worker-count" => {
                    config.worker_count = parse_param(&param, &value)?;
                }
                "flush-interval" => {
                    config.flush_interval =
                        humantime::parse_duration(&value).ok().context(
                            InvalidParamSnafu {
                                param: param.to_string(),
                                value: value.to_string(),
                            },
                        )?;
                }
                "file-size" => {
                    config.max_file_size = parse_param(&param, &value)?;
                }
                "file-index-width" => {
                    config.file_index_width = parse_param(&param, &value)?;
                }
                "schema-file" => {
                    config.emit_schema_files = parse_param(&param, &value)?;
                }
                _ => {
                    config
                        .storage_options
                        .insert(param.to_string(), value.to_string());
                }
            }
        }

        let mut base = url.clone();
        base.set_query(None);
        config.storage_uri = base.to_string();

        config.validate()?;
        Ok(config)
    }

    /// Validate parameter ranges. Any violation refuses sink creation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.flush_interval >= MIN_FLUSH_INTERVAL && self.flush_interval <= MAX_FLUSH_INTERVAL,
            FlushIntervalOutOfRangeSnafu {
                interval: self.flush_interval,
                min: MIN_FLUSH_INTERVAL,
                max: MAX_FLUSH_INTERVAL,
            }
        );
        ensure!(
            self.max_file_size >= MIN_FILE_SIZE && self.max_file_size <= MAX_FILE_SIZE,
            FileSizeOutOfRangeSnafu {
                size: self.max_file_size,
                min: MIN_FILE_SIZE,
                max: MAX_FILE_SIZE,
            }
        );
        ensure!(
            self.worker_count >= 1 && self.worker_count <= MAX_WORKER_COUNT,
            WorkerCountOutOfRangeSnafu {
                count: self.worker_count,
                max: MAX_WORKER_COUNT,
            }
        );
        ensure!(
            self.file_index_width >= MIN_FILE_INDEX_WIDTH
                && self.file_index_width <= MAX_FILE_INDEX_WIDTH,
            FileIndexWidthOutOfRangeSnafu {
                width: self.file_index_width,
                min: MIN_FILE_INDEX_WIDTH,
                max: MAX_FILE_INDEX_WIDTH,
            }
        );
        Ok(())
    }
}

fn parse_param<T: std::str::FromStr>(param: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().ok().context(InvalidParamSnafu {
        param: param.to_string(),
        value: value.to_string(),
    })
}
