use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::IngestError;

pub const USER_AGENT_VALUE: &str = concat!("ckan-ingest/", env!("CARGO_PKG_VERSION"));

pub fn client_builder(timeout: Duration) -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    Client::builder().default_headers(headers).timeout(timeout)
}

pub fn failure_parts(response: Response, fallback: &str) -> (u16, String) {
    let status = response.status().as_u16();
    let message = response
        .text()
        .ok()
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    (status, message)
}

pub fn bearer_token(env_name: &str) -> Result<String, IngestError> {
    match std::env::var(env_name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(IngestError::MissingCredentials(env_name.to_string())),
    }
}
