//! URL parsing for storage backends.
//!
//! Extracts backend configuration from the sink URI (S3, GCS, Azure Blob,
//! local filesystem).

use std::collections::HashMap;
use std::sync::OnceLock;

use object_store::path::Path;
use regex::Regex;
use snafu::prelude::*;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{AzureConfig, GcsConfig, LocalConfig, S3Config};

// URL patterns for different storage backends
const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$";
const GCS_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.+))?$";

const AZBLOB_URL: &str = r"^azblob://(?P<container>[a-z0-9\-]+)(/(?P<key>.+))?$";
const ABFS_URL: &str = r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.+))?$";
const AZURE_HTTPS: &str = r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.+))?$";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Azure,
    Local,
}

fn matchers() -> &'static HashMap<Backend, Vec<Regex>> {
    static MATCHERS: OnceLock<HashMap<Backend, Vec<Regex>>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let mut m = HashMap::new();

        m.insert(
            Backend::S3,
            vec![
                Regex::new(S3_PATH).unwrap(),
                Regex::new(S3_VIRTUAL).unwrap(),
                Regex::new(S3_URL).unwrap(),
            ],
        );

        m.insert(
            Backend::Gcs,
            vec![Regex::new(GCS_URL).unwrap(), Regex::new(GCS_VIRTUAL).unwrap()],
        );

        m.insert(
            Backend::Azure,
            vec![
                Regex::new(AZBLOB_URL).unwrap(),
                Regex::new(ABFS_URL).unwrap(),
                Regex::new(AZURE_HTTPS).unwrap(),
            ],
        );

        m.insert(
            Backend::Local,
            vec![Regex::new(FILE_URI).unwrap(), Regex::new(FILE_PATH).unwrap()],
        );

        m
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (k, v) in matchers() {
            if let Some(matches) = v.iter().filter_map(|r| r.captures(url)).next() {
                return Ok(match k {
                    Backend::S3 => Self::parse_s3(&matches),
                    Backend::Gcs => Self::parse_gcs(&matches),
                    Backend::Azure => Self::parse_azure(&matches),
                    Backend::Local => Self::parse_local(&matches),
                });
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(matches: &regex::Captures) -> Self {
        let bucket = matches
            .name("bucket")
            .expect("bucket should always be available")
            .as_str()
            .to_string();

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| matches.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok();

        let key = matches.name("key").map(|m| m.as_str().into());

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        })
    }

    fn parse_gcs(matches: &regex::Captures) -> Self {
        let bucket = matches
            .name("bucket")
            .expect("bucket should always be available")
            .as_str()
            .to_string();

        let key = matches.name("key").map(|r| r.as_str().into());

        BackendConfig::Gcs(GcsConfig { bucket, key })
    }

    fn parse_azure(matches: &regex::Captures) -> Self {
        let container = matches
            .name("container")
            .expect("container should always be available")
            .as_str()
            .to_string();

        // The azblob:// scheme omits the account; it comes from the
        // environment (AZURE_STORAGE_ACCOUNT_NAME) via the builder.
        let account = matches.name("account").map(|m| m.as_str().to_string());

        let key = matches.name("key").map(|r| r.as_str().into());

        BackendConfig::Azure(AzureConfig {
            account,
            container,
            key,
        })
    }

    fn parse_local(matches: &regex::Captures) -> Self {
        let path = matches
            .name("path")
            .expect("path regex must contain a path group")
            .as_str();

        let path = if !path.starts_with('/') {
            format!("/{path}")
        } else {
            path.to_string()
        };

        BackendConfig::Local(LocalConfig { path, key: None })
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Azure(azure) => azure.key.as_ref(),
            BackendConfig::Local(local) => local.key.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://mybucket/changefeed/data").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.key, Some(Path::from("changefeed/data")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_url_without_key() {
        let config = BackendConfig::parse_url("s3://mybucket").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.key, None);
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_path_style_url() {
        let config =
            BackendConfig::parse_url("https://s3.us-east-1.amazonaws.com/mybucket/prefix").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.region, Some("us-east-1".to_string()));
                assert_eq!(s3.key, Some(Path::from("prefix")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_gcs_url_parsing() {
        let config = BackendConfig::parse_url("gs://my-bucket/cdc").unwrap();
        match config {
            BackendConfig::Gcs(gcs) => {
                assert_eq!(gcs.bucket, "my-bucket");
                assert_eq!(gcs.key, Some(Path::from("cdc")));
            }
            _ => panic!("Expected GCS config"),
        }
    }

    #[test]
    fn test_azblob_url_parsing() {
        let config = BackendConfig::parse_url("azblob://container/cdc/prefix").unwrap();
        match config {
            BackendConfig::Azure(azure) => {
                assert_eq!(azure.container, "container");
                assert_eq!(azure.account, None);
                assert_eq!(azure.key, Some(Path::from("cdc/prefix")));
            }
            _ => panic!("Expected Azure config"),
        }
    }

    #[test]
    fn test_abfs_url_parsing() {
        let config =
            BackendConfig::parse_url("abfss://container@account.dfs.core.windows.net/cdc").unwrap();
        match config {
            BackendConfig::Azure(azure) => {
                assert_eq!(azure.container, "container");
                assert_eq!(azure.account, Some("account".to_string()));
                assert_eq!(azure.key, Some(Path::from("cdc")));
            }
            _ => panic!("Expected Azure config"),
        }
    }

    #[test]
    fn test_file_uri_parsing() {
        let config = BackendConfig::parse_url("file:///var/data/cdc").unwrap();
        match config {
            BackendConfig::Local(local) => {
                assert_eq!(local.path, "/var/data/cdc");
            }
            _ => panic!("Expected local config"),
        }
    }

    #[test]
    fn test_bare_path_parsing() {
        let config = BackendConfig::parse_url("/var/data/cdc").unwrap();
        match config {
            BackendConfig::Local(local) => {
                assert_eq!(local.path, "/var/data/cdc");
            }
            _ => panic!("Expected local config"),
        }
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = BackendConfig::parse_url("kafka://broker:9092/topic");
        assert!(matches!(result, Err(StorageError::InvalidUrl { .. })));
    }
}
