use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::domain::{DatasetId, Resource};
use crate::error::IngestError;
use crate::http;
use crate::memo::Memo;
use crate::retry::RetryPolicy;

pub const MEMO_NAMESPACE: &str = "package_show";

pub trait CatalogClient: Send + Sync {
    fn endpoint(&self) -> &str;
    fn package_show(&self, dataset: &DatasetId) -> Result<Vec<Resource>, IngestError>;
    fn resource_show(&self, resource_id: &str) -> Result<Resource, IngestError>;
}

#[derive(Clone)]
pub struct CkanHttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CkanEnvelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Package {
    resources: Vec<Resource>,
}

impl CkanHttpClient {
    pub fn new(base_url: &str) -> Result<Self, IngestError> {
        let client = http::client_builder(Duration::from_secs(60))
            .build()
            .map_err(|err| IngestError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn action_url(&self, action: &str) -> String {
        format!("{}/api/3/action/{action}", self.base_url)
    }

    fn get_action(&self, action: &str, id: &str) -> Result<Vec<u8>, IngestError> {
        let url = self.action_url(action);
        let response = self
            .client
            .get(&url)
            .query(&[("id", id)])
            .send()
            .map_err(|err| IngestError::CatalogHttp(err.to_string()))?;
        if !response.status().is_success() {
            let (status, message) = http::failure_parts(response, "catalog request failed");
            return Err(IngestError::CatalogStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| IngestError::CatalogHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl CatalogClient for CkanHttpClient {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn package_show(&self, dataset: &DatasetId) -> Result<Vec<Resource>, IngestError> {
        let body = self.get_action("package_show", dataset.as_str())?;
        parse_package(&body)
    }

    fn resource_show(&self, resource_id: &str) -> Result<Resource, IngestError> {
        let body = self.get_action("resource_show", resource_id)?;
        parse_resource(&body)
    }
}

pub fn parse_package(body: &[u8]) -> Result<Vec<Resource>, IngestError> {
    let package: Package = parse_envelope(body)?;
    Ok(package.resources)
}

pub fn parse_resource(body: &[u8]) -> Result<Resource, IngestError> {
    parse_envelope(body)
}

fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, IngestError> {
    let envelope: CkanEnvelope<T> = serde_json::from_slice(body)
        .map_err(|err| IngestError::CatalogResponse(err.to_string()))?;
    if !envelope.success {
        let detail = envelope
            .error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "success=false".to_string());
        return Err(IngestError::CatalogResponse(detail));
    }
    envelope
        .result
        .ok_or_else(|| IngestError::CatalogResponse("missing result".to_string()))
}

pub fn eligible_resources(resources: Vec<Resource>) -> Vec<Resource> {
    resources
        .into_iter()
        .filter(Resource::is_eligible)
        .collect()
}

pub fn find_resource_by_name<'a>(
    resources: &'a [Resource],
    name: &str,
) -> Result<&'a Resource, IngestError> {
    resources
        .iter()
        .find(|resource| resource.name.as_deref() == Some(name))
        .ok_or_else(|| IngestError::ResourceNotFound(name.to_string()))
}

pub fn lookup<C: CatalogClient>(
    client: &C,
    memo: &Memo,
    retry: &RetryPolicy,
    dataset: &DatasetId,
) -> Result<Vec<Resource>, IngestError> {
    let resources = memo.get_or_compute(MEMO_NAMESPACE, &(client.endpoint(), dataset), || {
        retry.run("catalog", || client.package_show(dataset))
    })?;
    info!(dataset = %dataset, resources = resources.len(), "catalog resolved");
    Ok(resources)
}
