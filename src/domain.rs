use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(IngestError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceFormat {
    Xlsx,
    Zip,
    Other(String),
}

impl ResourceFormat {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "XLSX" => ResourceFormat::Xlsx,
            "ZIP" => ResourceFormat::Zip,
            other => ResourceFormat::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourceFormat::Xlsx => "XLSX",
            ResourceFormat::Zip => "ZIP",
            ResourceFormat::Other(tag) => tag,
        }
    }
}

impl fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for ResourceFormat {
    fn from(value: String) -> Self {
        ResourceFormat::from_tag(&value)
    }
}

impl From<ResourceFormat> for String {
    fn from(value: ResourceFormat) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    pub format: ResourceFormat,
    #[serde(default, deserialize_with = "null_as_false")]
    pub datastore_active: bool,
}

impl Resource {
    pub fn is_eligible(&self) -> bool {
        !self.datastore_active
    }

    pub fn partition(&self) -> Result<PartitionKey, IngestError> {
        PartitionKey::from_url(&self.url)
    }

    pub fn file_name(&self) -> Result<String, IngestError> {
        let segment = last_path_segment(&self.url);
        if segment.is_empty() {
            return Err(IngestError::InvalidResourceUrl(self.url.clone()));
        }
        Ok(segment.to_string())
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn from_url(url: &str) -> Result<Self, IngestError> {
        let segment = last_path_segment(url);
        let token = segment.rsplit('-').next().unwrap_or_default();
        let key = token.split('.').next().unwrap_or_default();
        if key.is_empty() {
            return Err(IngestError::InvalidResourceUrl(url.to_string()));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn year(&self) -> Option<i32> {
        if self.0.is_empty() || !self.0.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }

    pub fn is_at_least(&self, minimum: i32) -> bool {
        self.year().map(|year| year >= minimum).unwrap_or(false)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn last_path_segment(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    without_query.rsplit('/').next().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub path: Utf8PathBuf,
    pub partition: PartitionKey,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFile {
    pub path: Utf8PathBuf,
    pub partition: PartitionKey,
    pub file_name: String,
}

impl NormalizedFile {
    pub fn from_artifact(artifact: &LocalArtifact) -> Self {
        Self {
            path: artifact.path.clone(),
            partition: artifact.partition.clone(),
            file_name: artifact.file_name.clone(),
        }
    }

    pub fn is_tabular(&self) -> bool {
        let lower = self.file_name.to_ascii_lowercase();
        lower.ends_with(".csv") || lower.ends_with(".csv.gz")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteObject {
    pub path: String,
    pub uri: String,
    pub load_job: Option<String>,
}
