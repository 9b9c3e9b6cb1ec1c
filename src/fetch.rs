use std::io::{self, Read, Write};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{LocalArtifact, Resource};
use crate::error::IngestError;
use crate::http;
use crate::retry::RetryPolicy;
use crate::store::{Store, file_sha256, sha256_hex};

pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;

pub trait RemoteSource: Send + Sync {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, IngestError>;
    fn download_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, IngestError>;
}

#[derive(Clone)]
pub struct HttpRemoteSource {
    client: Client,
}

impl HttpRemoteSource {
    pub fn new() -> Result<Self, IngestError> {
        let client = http::client_builder(Duration::from_secs(300))
            .build()
            .map_err(|err| IngestError::FetchHttp {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<Response, IngestError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| IngestError::FetchHttp {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response, "download failed");
            return Err(IngestError::FetchStatus {
                url: url.to_string(),
                status,
                message,
            });
        }
        Ok(response)
    }
}

impl RemoteSource for HttpRemoteSource {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, IngestError> {
        let response = self.get(url)?;
        let bytes = response.bytes().map_err(|err| IngestError::FetchHttp {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    fn download_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, IngestError> {
        let mut response = self.get(url)?;
        copy_chunked(&mut response, sink, url)
    }
}

pub fn copy_chunked<R, W>(reader: &mut R, writer: &mut W, url: &str) -> Result<u64, IngestError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = [0u8; DOWNLOAD_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(IngestError::FetchHttp {
                    url: url.to_string(),
                    message: err.to_string(),
                });
            }
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        total += read as u64;
    }
    writer
        .flush()
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchAction {
    Downloaded,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub artifact: LocalArtifact,
    pub action: FetchAction,
    pub sha256: String,
}

pub fn plan_artifact(store: &Store, resource: &Resource) -> Result<LocalArtifact, IngestError> {
    let partition = resource.partition()?;
    let file_name = resource.file_name()?;
    Ok(LocalArtifact {
        path: store.artifact_path(&partition, &file_name),
        partition,
        file_name,
    })
}

pub fn fetch_resource<R: RemoteSource>(
    store: &Store,
    source: &R,
    resource: &Resource,
    options: &FetchOptions,
    retry: &RetryPolicy,
) -> Result<FetchOutcome, IngestError> {
    let artifact = plan_artifact(store, resource)?;
    store.ensure_partition_dir(&artifact.partition)?;
    let url = resource.url.as_str();
    let existed = artifact.path.as_std_path().exists();

    if existed && !options.force {
        let local_digest = file_sha256(&artifact.path)?;
        let remote = retry.run("fetch", || source.fetch_bytes(url))?;
        let remote_digest = sha256_hex(&remote);
        debug!(url, local = %local_digest, remote = %remote_digest, "compared digests");
        if local_digest == remote_digest {
            info!(url, file = %artifact.file_name, "unchanged since last download");
            return Ok(FetchOutcome {
                artifact,
                action: FetchAction::Unchanged,
                sha256: local_digest,
            });
        }
        Store::write_bytes_atomic(&artifact.path, &remote)?;
        info!(url, file = %artifact.file_name, bytes = remote.len(), "replaced changed artifact");
        return Ok(FetchOutcome {
            artifact,
            action: FetchAction::Updated,
            sha256: remote_digest,
        });
    }

    let bytes = retry.run("fetch", || {
        Store::write_with_atomic(&artifact.path, |file| source.download_to(url, file))
    })?;
    let digest = file_sha256(&artifact.path)?;
    info!(url, file = %artifact.file_name, bytes, "downloaded artifact");
    Ok(FetchOutcome {
        artifact,
        action: if existed {
            FetchAction::Updated
        } else {
            FetchAction::Downloaded
        },
        sha256: digest,
    })
}
