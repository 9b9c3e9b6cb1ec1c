use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::warn;

use crate::domain::{LocalArtifact, PartitionKey};
use crate::error::IngestError;

const TEMP_PREFIX: &str = ".ckan-ingest";
const COMPLETION_PREFIX: &str = ".ckan-ingest-done-";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub sha256: String,
    pub normalized: bool,
    pub files: Vec<String>,
    pub published: BTreeMap<String, Option<String>>,
}

impl CompletionRecord {
    pub fn new(sha256: &str) -> Self {
        Self {
            sha256: sha256.to_string(),
            ..Self::default()
        }
    }

    pub fn is_done(&self, file_name: &str) -> bool {
        self.published.contains_key(file_name)
    }

    pub fn is_complete(&self, publishing: bool) -> bool {
        self.normalized && (!publishing || self.files.iter().all(|file| self.is_done(file)))
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn partition_dir(&self, partition: &PartitionKey) -> Utf8PathBuf {
        self.root.join(partition.as_str())
    }

    pub fn artifact_path(&self, partition: &PartitionKey, file_name: &str) -> Utf8PathBuf {
        self.partition_dir(partition).join(file_name)
    }

    pub fn ensure_partition_dir(
        &self,
        partition: &PartitionKey,
    ) -> Result<Utf8PathBuf, IngestError> {
        let dir = self.partition_dir(partition);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir)
    }

    pub fn completion_path(&self, artifact: &LocalArtifact) -> Utf8PathBuf {
        self.partition_dir(&artifact.partition)
            .join(format!("{COMPLETION_PREFIX}{}.json", artifact.file_name))
    }

    pub fn read_completion(
        &self,
        artifact: &LocalArtifact,
    ) -> Result<Option<CompletionRecord>, IngestError> {
        let path = self.completion_path(artifact);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("read {path}: {err}")))?;
        match serde_json::from_slice(&content) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(path = %path, error = %err, "ignoring unreadable completion record");
                Ok(None)
            }
        }
    }

    pub fn write_completion(
        &self,
        artifact: &LocalArtifact,
        record: &CompletionRecord,
    ) -> Result<(), IngestError> {
        let content = serde_json::to_vec_pretty(record)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&self.completion_path(artifact), &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), IngestError> {
        Self::write_with_atomic(path, |file| {
            file.write_all(content)
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
            Ok(content.len() as u64)
        })
        .map(|_| ())
    }

    /// Writes through a temp file in the destination directory and renames it
    /// over `path` only when `write` succeeded.
    pub fn write_with_atomic<F>(path: &Utf8Path, write: F) -> Result<u64, IngestError>
    where
        F: FnOnce(&mut File) -> Result<u64, IngestError>,
    {
        let parent = path
            .parent()
            .ok_or_else(|| IngestError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let written = write(temp.as_file_mut())?;
        temp.as_file_mut()
            .sync_all()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("persist {path}: {err}")))?;
        Ok(written)
    }

    pub fn temp_dir_in(dir: &Utf8Path) -> Result<tempfile::TempDir, IngestError> {
        Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(dir.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))
    }

    pub fn move_file(from: &Path, to: &Utf8Path) -> Result<(), IngestError> {
        fs::rename(from, to.as_std_path()).map_err(|err| {
            IngestError::Filesystem(format!("move {} to {to}: {err}", from.display()))
        })
    }

    pub fn list_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, IngestError> {
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(path)
                .map_err(|_| IngestError::Filesystem("non-utf8 file path".to_string()))?;
            if path
                .file_name()
                .map(|name| name.starts_with(TEMP_PREFIX))
                .unwrap_or(false)
            {
                continue;
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }
}

pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    items.sort();
    Ok(items)
}

pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

pub fn file_sha256(path: &Utf8Path) -> Result<String, IngestError> {
    let mut file = File::open(path.as_std_path())
        .map_err(|err| IngestError::Filesystem(format!("open {path}: {err}")))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|err| IngestError::Filesystem(format!("read {path}: {err}")))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new(Utf8PathBuf::from("data/toronto/ridership"));
        let partition = PartitionKey::from_url("https://host/ridership-2019.zip").unwrap();
        let path = store.artifact_path(&partition, "ridership-2019.zip");
        assert_eq!(path, "data/toronto/ridership/2019/ridership-2019.zip");
    }

    #[test]
    fn streamed_digest_matches_in_memory_digest() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("a.bin")).unwrap();
        Store::write_bytes_atomic(&path, b"trip_id,duration\n1,300\n").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            sha256_hex(b"trip_id,duration\n1,300\n")
        );
    }

    #[test]
    fn failed_atomic_write_keeps_previous_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("a.csv")).unwrap();
        Store::write_bytes_atomic(&path, b"old").unwrap();
        let result = Store::write_with_atomic(&path, |file| {
            file.write_all(b"partial").unwrap();
            Err(IngestError::Filesystem("stream interrupted".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"old");
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        assert_eq!(Store::list_files(&dir).unwrap(), vec![path]);
    }

    #[test]
    fn partition_dir_creation_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        let partition = PartitionKey::from_url("https://host/x-2020.zip").unwrap();
        let first = store.ensure_partition_dir(&partition).unwrap();
        let second = store.ensure_partition_dir(&partition).unwrap();
        assert_eq!(first, second);
        assert!(first.as_std_path().is_dir());
    }

    #[test]
    fn completion_record_is_hidden_from_listings() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        let partition = PartitionKey::from_url("https://host/x-2020.zip").unwrap();
        let artifact = LocalArtifact {
            path: store.artifact_path(&partition, "x-2020.zip"),
            partition: partition.clone(),
            file_name: "x-2020.zip".to_string(),
        };
        assert_eq!(store.read_completion(&artifact).unwrap(), None);

        let mut record = CompletionRecord::new("abc");
        record.normalized = true;
        record.files = vec!["a.csv".to_string(), "b.csv".to_string()];
        record
            .published
            .insert("a.csv".to_string(), Some("data/2020/a.parquet".to_string()));
        store.write_completion(&artifact, &record).unwrap();

        let read = store.read_completion(&artifact).unwrap().unwrap();
        assert_eq!(read, record);
        assert!(!read.is_complete(true));
        assert!(read.is_complete(false));
        assert!(Store::list_files(&store.partition_dir(&partition)).unwrap().is_empty());
    }

    #[test]
    fn unreadable_completion_record_counts_as_missing() {
        let temp = tempfile::tempdir().unwrap();
        let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        let partition = PartitionKey::from_url("https://host/x-2020.zip").unwrap();
        let artifact = LocalArtifact {
            path: store.artifact_path(&partition, "x-2020.zip"),
            partition,
            file_name: "x-2020.zip".to_string(),
        };
        Store::write_bytes_atomic(&store.completion_path(&artifact), b"{not json").unwrap();
        assert_eq!(store.read_completion(&artifact).unwrap(), None);
    }
}
