// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::error::{ConfigError, MetadataError};
use crate::models::DataSourceMetadata;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Samples one connected data source. `Ok(None)` means the source has
/// nothing to offer, which is not an error.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(
        &self,
        plugin_key: &str,
        action: &str,
        params: &Value,
    ) -> Result<Option<DataSourceMetadata>, MetadataError>;
}

/// Races the fetch against a timer. Failures and timeouts degrade to
/// absent metadata so grounding can skip instead of aborting.
pub async fn fetch_with_timeout(
    source: &dyn MetadataSource,
    plugin_key: &str,
    action: &str,
    params: &Value,
    timeout: Duration,
) -> Option<DataSourceMetadata> {
    let outcome = match tokio::time::timeout(timeout, source.fetch(plugin_key, action, params)).await {
        Ok(result) => result,
        Err(_) => Err(MetadataError::Timeout {
            plugin_key: plugin_key.to_string(),
            seconds: timeout.as_secs(),
        }),
    };

    match outcome {
        Ok(Some(mut metadata)) => {
            if metadata.plugin_key.is_none() {
                metadata.plugin_key = Some(plugin_key.to_string());
            }
            debug!(
                plugin_key = plugin_key,
                action = action,
                fields = metadata.effective_fields().len(),
                rows = metadata.sample_rows.len(),
                "Metadata sampled"
            );
            Some(metadata)
        }
        Ok(None) => {
            debug!(plugin_key = plugin_key, "No metadata available");
            None
        }
        Err(err) => {
            warn!(plugin_key = plugin_key, error = %err, "Metadata fetch failed, continuing without it");
            None
        }
    }
}

/// Fixed metadata keyed by plugin, for the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataSource {
    sources: HashMap<String, DataSourceMetadata>,
}

impl StaticMetadataSource {
    pub fn new(sources: HashMap<String, DataSourceMetadata>) -> Self {
        Self { sources }
    }

    pub fn with_source(mut self, plugin_key: impl Into<String>, metadata: DataSourceMetadata) -> Self {
        self.sources.insert(plugin_key.into(), metadata);
        self
    }

    /// Reads a JSON or YAML map of plugin key to metadata.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let sources: HashMap<String, DataSourceMetadata> = serde_yaml::from_str(&content)
            .map_err(|source| ConfigError::Yaml {
                path: shown,
                source,
            })?;
        Ok(Self::new(sources))
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn fetch(
        &self,
        plugin_key: &str,
        _action: &str,
        _params: &Value,
    ) -> Result<Option<DataSourceMetadata>, MetadataError> {
        Ok(self.sources.get(plugin_key).cloned())
    }
}
