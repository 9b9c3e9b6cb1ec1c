use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::DatasetId;
use crate::error::IngestError;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "ckan-ingest.json";
pub const BUCKET_ENV: &str = "GCP_GCS_BUCKET";
const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MIN_PARTITION: i32 = 2016;
pub const SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub catalog: CatalogSection,
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
    #[serde(default)]
    pub publish: Option<PublishSection>,
    #[serde(default)]
    pub warehouse: Option<WarehouseSection>,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CatalogSection {
    pub base_url: String,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DatasetEntry {
    Shorthand(String),
    Detailed(DatasetEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatasetEntryObject {
    pub id: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub min_partition: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PublishSection {
    pub bucket: String,
    #[serde(default)]
    pub remote_root: Option<String>,
    #[serde(default)]
    pub columnar: Option<bool>,
    #[serde(default)]
    pub min_partition: Option<i32>,
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WarehouseSection {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default)]
    pub catalog: Option<RetryPolicy>,
    #[serde(default)]
    pub fetch: Option<RetryPolicy>,
    #[serde(default)]
    pub publish: Option<RetryPolicy>,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub base_url: String,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct DatasetRequest {
    pub id: DatasetId,
    pub table: Option<String>,
    pub min_partition: i32,
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub bucket: String,
    pub remote_root: String,
    pub columnar: bool,
    pub token_env: String,
}

#[derive(Debug, Clone)]
pub struct WarehouseSettings {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub catalog: RetryPolicy,
    pub fetch: RetryPolicy,
    pub publish: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            catalog: RetryPolicy::default(),
            fetch: RetryPolicy::default(),
            publish: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalog: CatalogSettings,
    pub data_root: Utf8PathBuf,
    pub datasets: Vec<DatasetRequest>,
    pub publish: Option<PublishSettings>,
    pub warehouse: Option<WarehouseSettings>,
    pub retry: RetrySettings,
}

impl ResolvedConfig {
    pub fn dataset(&self, id: &DatasetId) -> Option<&DatasetRequest> {
        self.datasets.iter().find(|request| &request.id == id)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(IngestError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IngestError::ConfigParse(err.to_string()))?;

        let bucket_override = std::env::var(BUCKET_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::resolve_config(config, bucket_override)
    }

    pub fn resolve_config(
        config: Config,
        bucket_override: Option<String>,
    ) -> Result<ResolvedConfig, IngestError> {
        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version != SCHEMA_VERSION {
            return Err(IngestError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}, expected {SCHEMA_VERSION}"
            )));
        }

        let base_url = config.catalog.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(IngestError::InvalidConfig(format!(
                "catalog.base_url must be an http(s) url: {}",
                config.catalog.base_url
            )));
        }
        let catalog = CatalogSettings {
            base_url,
            cache_ttl: Duration::from_secs(
                config.catalog.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS),
            ),
        };

        let data_root = Utf8PathBuf::from(
            config
                .data_root
                .as_deref()
                .map(|root| root.trim_end_matches('/'))
                .filter(|root| !root.is_empty())
                .unwrap_or("data"),
        );

        let default_min_partition = config
            .publish
            .as_ref()
            .and_then(|publish| publish.min_partition)
            .unwrap_or(DEFAULT_MIN_PARTITION);

        let datasets = config
            .datasets
            .into_iter()
            .map(|entry| match entry {
                DatasetEntry::Shorthand(value) => Ok(DatasetRequest {
                    id: value.parse()?,
                    table: None,
                    min_partition: default_min_partition,
                }),
                DatasetEntry::Detailed(obj) => Ok(DatasetRequest {
                    id: obj.id.parse()?,
                    table: obj.table,
                    min_partition: obj.min_partition.unwrap_or(default_min_partition),
                }),
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let publish = config
            .publish
            .map(|section| {
                let bucket = bucket_override
                    .unwrap_or(section.bucket)
                    .trim()
                    .to_string();
                if bucket.is_empty() {
                    return Err(IngestError::InvalidConfig(
                        "publish.bucket must not be empty".to_string(),
                    ));
                }
                let remote_root = section
                    .remote_root
                    .unwrap_or_else(|| data_root.to_string());
                Ok(PublishSettings {
                    bucket,
                    remote_root: normalize_remote_root(&remote_root),
                    columnar: section.columnar.unwrap_or(true),
                    token_env: section
                        .token_env
                        .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string()),
                })
            })
            .transpose()?;

        let warehouse = config.warehouse.map(|section| WarehouseSettings {
            project: section.project,
            dataset: section.dataset,
            table: section.table,
        });

        let retry = RetrySettings {
            catalog: config.retry.catalog.unwrap_or_default(),
            fetch: config.retry.fetch.unwrap_or_default(),
            publish: config.retry.publish.unwrap_or_default(),
        };

        Ok(ResolvedConfig {
            schema_version,
            catalog,
            data_root,
            datasets,
            publish,
            warehouse,
            retry,
        })
    }
}

fn normalize_remote_root(root: &str) -> String {
    root.trim()
        .trim_start_matches("./")
        .trim_matches('/')
        .to_string()
}
