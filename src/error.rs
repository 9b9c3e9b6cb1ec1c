use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid dataset id: {0}")]
    InvalidDatasetId(String),

    #[error("cannot derive a partition from resource url: {0}")]
    InvalidResourceUrl(String),

    #[error("missing config file ckan-ingest.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("catalog response rejected: {0}")]
    CatalogResponse(String),

    #[error("resource not found in catalog: {0}")]
    ResourceNotFound(String),

    #[error("download of {url} failed: {message}")]
    FetchHttp { url: String, message: String },

    #[error("download of {url} returned status {status}: {message}")]
    FetchStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("invalid workbook {path}: {message}")]
    Workbook { path: String, message: String },

    #[error("invalid archive {path}: {message}")]
    Archive { path: String, message: String },

    #[error("cannot read tabular file {path}: {message}")]
    Tabular { path: String, message: String },

    #[error("object store request failed: {0}")]
    ObjectStoreHttp(String),

    #[error("object store returned status {status}: {message}")]
    ObjectStoreStatus { status: u16, message: String },

    #[error("warehouse request failed: {0}")]
    WarehouseHttp(String),

    #[error("warehouse returned status {status}: {message}")]
    WarehouseStatus { status: u16, message: String },

    #[error("station feed request failed: {0}")]
    FeedHttp(String),

    #[error("station feed returned status {status}: {message}")]
    FeedStatus { status: u16, message: String },

    #[error("malformed station feed: {0}")]
    FeedParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::CatalogHttp(_)
            | IngestError::FetchHttp { .. }
            | IngestError::ObjectStoreHttp(_)
            | IngestError::WarehouseHttp(_)
            | IngestError::FeedHttp(_) => true,
            IngestError::CatalogStatus { status, .. }
            | IngestError::FetchStatus { status, .. }
            | IngestError::ObjectStoreStatus { status, .. }
            | IngestError::WarehouseStatus { status, .. }
            | IngestError::FeedStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
