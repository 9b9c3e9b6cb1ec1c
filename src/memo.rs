use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::store::{Store, sha256_hex};

#[derive(Debug, Clone)]
pub struct Memo {
    dir: Option<Utf8PathBuf>,
    ttl: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoEntry<V> {
    stored_at: String,
    value: V,
}

impl Memo {
    pub fn new(dir: Utf8PathBuf, ttl: Duration) -> Self {
        Self {
            dir: Some(dir),
            ttl,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dir: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn default_dir() -> Result<Utf8PathBuf, IngestError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("ckan-ingest")).ok()
            })
            .ok_or_else(|| IngestError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn key<K: Serialize + ?Sized>(namespace: &str, input: &K) -> Result<String, IngestError> {
        let mut payload = namespace.as_bytes().to_vec();
        payload.push(0);
        let encoded =
            serde_json::to_vec(input).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        payload.extend_from_slice(&encoded);
        Ok(sha256_hex(&payload))
    }

    pub fn get_or_compute<K, V, F>(
        &self,
        namespace: &str,
        input: &K,
        compute: F,
    ) -> Result<V, IngestError>
    where
        K: Serialize + ?Sized,
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<V, IngestError>,
    {
        let Some(dir) = &self.dir else {
            return compute();
        };
        let key = Self::key(namespace, input)?;
        let path = dir.join(namespace).join(format!("{key}.json"));

        if let Some(value) = self.read_fresh::<V>(&path) {
            debug!(namespace, key = %key, "memo hit");
            return Ok(value);
        }

        let value = compute()?;
        let entry = MemoEntry {
            stored_at: Utc::now().to_rfc3339(),
            value: &value,
        };
        match serde_json::to_vec_pretty(&entry) {
            Ok(bytes) => {
                if let Err(err) = Store::write_bytes_atomic(&path, &bytes) {
                    warn!(namespace, error = %err, "failed to store memo entry");
                }
            }
            Err(err) => warn!(namespace, error = %err, "failed to encode memo entry"),
        }
        Ok(value)
    }

    fn read_fresh<V: DeserializeOwned>(&self, path: &Utf8PathBuf) -> Option<V> {
        let content = fs::read(path.as_std_path()).ok()?;
        let entry: MemoEntry<V> = match serde_json::from_slice(&content) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(path = %path, error = %err, "discarding unreadable memo entry");
                return None;
            }
        };
        let stored_at = DateTime::parse_from_rfc3339(&entry.stored_at)
            .ok()?
            .with_timezone(&Utc);
        let age = Utc::now().signed_duration_since(stored_at).to_std().ok()?;
        (age <= self.ttl).then_some(entry.value)
    }
}
