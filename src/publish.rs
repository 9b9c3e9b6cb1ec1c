use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::columnar;
use crate::domain::{NormalizedFile, RemoteObject};
use crate::error::IngestError;
use crate::http;
use crate::retry::RetryPolicy;
use crate::store::Store;

const GCS_UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";
const BIGQUERY_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

pub trait ObjectStore: Send + Sync {
    fn put_file(&self, local: &Path, remote_path: &str) -> Result<(), IngestError>;
    fn uri(&self, remote_path: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceFormat {
    Parquet,
    Csv,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Parquet => "PARQUET",
            SourceFormat::Csv => "CSV",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub dataset: String,
    pub table: String,
    pub uri: String,
    pub source_format: SourceFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadJob {
    pub job_id: String,
    pub state: String,
}

pub trait Warehouse: Send + Sync {
    fn load_from_uri(&self, request: &LoadRequest) -> Result<LoadJob, IngestError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn put_file(&self, local: &Path, remote_path: &str) -> Result<(), IngestError> {
        (**self).put_file(local, remote_path)
    }

    fn uri(&self, remote_path: &str) -> String {
        (**self).uri(remote_path)
    }
}

impl<T: Warehouse + ?Sized> Warehouse for Box<T> {
    fn load_from_uri(&self, request: &LoadRequest) -> Result<LoadJob, IngestError> {
        (**self).load_from_uri(request)
    }
}

#[derive(Clone)]
pub struct GcsObjectStore {
    client: Client,
    bucket: String,
    token_env: String,
}

impl GcsObjectStore {
    pub fn new(bucket: &str, token_env: &str) -> Result<Self, IngestError> {
        let client = http::client_builder(Duration::from_secs(600))
            .build()
            .map_err(|err| IngestError::ObjectStoreHttp(err.to_string()))?;
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            token_env: token_env.to_string(),
        })
    }
}

impl ObjectStore for GcsObjectStore {
    fn put_file(&self, local: &Path, remote_path: &str) -> Result<(), IngestError> {
        let token = http::bearer_token(&self.token_env)?;
        let body = fs::read(local)
            .map_err(|err| IngestError::Filesystem(format!("read {}: {err}", local.display())))?;
        let url = format!("{GCS_UPLOAD_BASE}/b/{}/o", self.bucket);
        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", remote_path)])
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .map_err(|err| IngestError::ObjectStoreHttp(err.to_string()))?;
        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response, "upload failed");
            return Err(IngestError::ObjectStoreStatus { status, message });
        }
        Ok(())
    }

    fn uri(&self, remote_path: &str) -> String {
        format!("gs://{}/{remote_path}", self.bucket)
    }
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: Utf8PathBuf,
}

impl FsObjectStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }
}

impl ObjectStore for FsObjectStore {
    fn put_file(&self, local: &Path, remote_path: &str) -> Result<(), IngestError> {
        let destination = self.root.join(remote_path);
        let mut source = File::open(local)
            .map_err(|err| IngestError::Filesystem(format!("open {}: {err}", local.display())))?;
        Store::write_with_atomic(&destination, |file| {
            io::copy(&mut source, file).map_err(|err| IngestError::Filesystem(err.to_string()))
        })?;
        Ok(())
    }

    fn uri(&self, remote_path: &str) -> String {
        format!("file://{}", self.root.join(remote_path))
    }
}

#[derive(Clone)]
pub struct BigQueryWarehouse {
    client: Client,
    project: String,
    token_env: String,
}

impl BigQueryWarehouse {
    pub fn new(project: &str, token_env: &str) -> Result<Self, IngestError> {
        let client = http::client_builder(Duration::from_secs(60))
            .build()
            .map_err(|err| IngestError::WarehouseHttp(err.to_string()))?;
        Ok(Self {
            client,
            project: project.to_string(),
            token_env: token_env.to_string(),
        })
    }
}

impl Warehouse for BigQueryWarehouse {
    fn load_from_uri(&self, request: &LoadRequest) -> Result<LoadJob, IngestError> {
        let token = http::bearer_token(&self.token_env)?;
        let url = format!("{BIGQUERY_BASE}/projects/{}/jobs", self.project);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&load_job_body(&self.project, request))
            .send()
            .map_err(|err| IngestError::WarehouseHttp(err.to_string()))?;
        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response, "load job rejected");
            return Err(IngestError::WarehouseStatus { status, message });
        }
        let status = response.status().as_u16();
        let job: Value = response
            .json()
            .map_err(|err| IngestError::WarehouseHttp(err.to_string()))?;
        parse_load_job(&job, status)
    }
}

pub fn load_job_body(project: &str, request: &LoadRequest) -> Value {
    json!({
        "configuration": {
            "load": {
                "sourceUris": [request.uri],
                "destinationTable": {
                    "projectId": project,
                    "datasetId": request.dataset,
                    "tableId": request.table,
                },
                "sourceFormat": request.source_format.as_str(),
                "writeDisposition": "WRITE_APPEND",
                "autodetect": true,
            }
        }
    })
}

pub fn parse_load_job(job: &Value, status: u16) -> Result<LoadJob, IngestError> {
    if let Some(error) = job.get("status").and_then(|value| value.get("errorResult")) {
        return Err(IngestError::WarehouseStatus {
            status,
            message: error.to_string(),
        });
    }
    let job_id = job
        .get("jobReference")
        .and_then(|value| value.get("jobId"))
        .and_then(|value| value.as_str())
        .ok_or_else(|| IngestError::WarehouseHttp("load job response without jobId".to_string()))?;
    let state = job
        .get("status")
        .and_then(|value| value.get("state"))
        .and_then(|value| value.as_str())
        .unwrap_or("PENDING");
    Ok(LoadJob {
        job_id: job_id.to_string(),
        state: state.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct WarehouseTarget {
    pub dataset: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub remote_root: String,
    pub columnar: bool,
    pub warehouse: Option<WarehouseTarget>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct PublishTarget {
    pub table: Option<String>,
    pub min_partition: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    BelowMinimumPartition,
    NotTabular,
    AlreadyPublished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(RemoteObject),
    Skipped(SkipReason),
}

pub struct Publisher<O: ObjectStore, W: Warehouse> {
    config: PublisherConfig,
    object_store: O,
    warehouse: W,
}

impl<O: ObjectStore, W: Warehouse> Publisher<O, W> {
    pub fn new(config: PublisherConfig, object_store: O, warehouse: W) -> Self {
        Self {
            config,
            object_store,
            warehouse,
        }
    }

    pub fn remote_path(&self, file: &NormalizedFile) -> String {
        let suffix = if self.config.columnar { ".parquet" } else { "" };
        let relative = format!("{}/{}{suffix}", file.partition, file.file_name);
        if self.config.remote_root.is_empty() {
            relative
        } else {
            format!("{}/{relative}", self.config.remote_root)
        }
    }

    pub fn publish(
        &self,
        file: &NormalizedFile,
        target: &PublishTarget,
    ) -> Result<PublishOutcome, IngestError> {
        if !file.partition.is_at_least(target.min_partition) {
            info!(
                file = %file.file_name,
                partition = %file.partition,
                minimum = target.min_partition,
                "partition below publish cutoff"
            );
            return Ok(PublishOutcome::Skipped(SkipReason::BelowMinimumPartition));
        }
        if !file.is_tabular() {
            return Ok(PublishOutcome::Skipped(SkipReason::NotTabular));
        }

        let remote_path = self.remote_path(file);
        let staging = tempfile::Builder::new()
            .prefix(".ckan-ingest-publish")
            .tempdir()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let (upload_path, source_format): (PathBuf, SourceFormat) = if self.config.columnar {
            let parquet = staging.path().join(format!("{}.parquet", file.file_name));
            columnar::csv_to_parquet(&file.path, &parquet)?;
            (parquet, SourceFormat::Parquet)
        } else {
            columnar::load_csv(&file.path)?;
            (file.path.clone().into_std_path_buf(), SourceFormat::Csv)
        };

        self.config.retry.run("upload", || {
            self.object_store.put_file(&upload_path, &remote_path)
        })?;
        let uri = self.object_store.uri(&remote_path);
        info!(file = %file.file_name, uri = %uri, "uploaded");

        let load_job = match &self.config.warehouse {
            Some(warehouse) => {
                let request = LoadRequest {
                    dataset: warehouse.dataset.clone(),
                    table: target
                        .table
                        .clone()
                        .unwrap_or_else(|| warehouse.table.clone()),
                    uri: uri.clone(),
                    source_format,
                };
                let job = self
                    .config
                    .retry
                    .run("load", || self.warehouse.load_from_uri(&request))?;
                info!(uri = %uri, job = %job.job_id, state = %job.state, "load job accepted");
                Some(job.job_id)
            }
            None => {
                warn!(uri = %uri, "no warehouse configured, load skipped");
                None
            }
        };

        if let Err(err) = staging.close() {
            warn!(error = %err, "failed to remove publish staging directory");
        }

        Ok(PublishOutcome::Published(RemoteObject {
            path: remote_path,
            uri,
            load_job,
        }))
    }
}
