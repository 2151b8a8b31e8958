//! Azure Blob Storage backend implementation.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;

use crate::error::{AzureConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// Azure Blob Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    /// Storage account. `azblob://` URIs omit it; the builder then reads it
    /// from the environment.
    pub account: Option<String>,
    pub container: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) async fn construct_azure(
        config: AzureConfig,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = MicrosoftAzureBuilder::from_env().with_container_name(&config.container);

        for (key, value) in &options {
            builder = builder.with_config(key.parse().context(AzureConfigSnafu)?, value.clone());
        }

        builder = builder.with_retry(RetryConfig::default());

        if let Some(account) = &config.account {
            builder = builder.with_account(account);
        }

        let canonical_url = match &config.account {
            Some(account) => format!(
                "https://{}.blob.core.windows.net/{}",
                account, config.container
            ),
            None => format!("azblob://{}", config.container),
        };

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(AzureConfigSnafu)?);

        Ok(Self {
            config: BackendConfig::Azure(config),
            object_store,
            canonical_url,
            storage_options: options,
        })
    }
}
