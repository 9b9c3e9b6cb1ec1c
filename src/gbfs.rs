use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::IngestError;
use crate::http;
use crate::store::Store;

pub const STATION_CSV_HEADER: [&str; 5] = ["station_id", "name", "lat", "lon", "capacity"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    #[serde(deserialize_with = "id_as_string")]
    pub station_id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub capacity: Option<u32>,
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected station_id {other}"
        ))),
    }
}

pub fn fetch_station_information(url: &str) -> Result<Vec<StationInfo>, IngestError> {
    let client: Client = http::client_builder(Duration::from_secs(60))
        .build()
        .map_err(|err| IngestError::FeedHttp(err.to_string()))?;
    let response = client
        .get(url)
        .send()
        .map_err(|err| IngestError::FeedHttp(err.to_string()))?;
    if !response.status().is_success() {
        let (status, message) = http::failure_parts(response, "station feed unavailable");
        return Err(IngestError::FeedStatus { status, message });
    }
    let body = response
        .bytes()
        .map_err(|err| IngestError::FeedHttp(err.to_string()))?;
    let stations = parse_station_information(&body)?;
    info!(url, stations = stations.len(), "station feed parsed");
    Ok(stations)
}

/// Accepts `data.stations` as well as the language-keyed
/// `data.<lang>.stations` layout; the first language present wins.
pub fn parse_station_information(body: &[u8]) -> Result<Vec<StationInfo>, IngestError> {
    let feed: Value =
        serde_json::from_slice(body).map_err(|err| IngestError::FeedParse(err.to_string()))?;
    let data = feed
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| IngestError::FeedParse("missing data object".to_string()))?;
    let stations = match data.get("stations") {
        Some(stations) => stations,
        None => data
            .values()
            .find_map(|value| value.get("stations"))
            .ok_or_else(|| IngestError::FeedParse("missing stations list".to_string()))?,
    };
    serde_json::from_value(stations.clone()).map_err(|err| IngestError::FeedParse(err.to_string()))
}

pub fn write_station_csv(stations: &[StationInfo], path: &Utf8Path) -> Result<usize, IngestError> {
    Store::write_with_atomic(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(STATION_CSV_HEADER)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        for station in stations {
            let lat = station.lat.to_string();
            let lon = station.lon.to_string();
            let capacity = station
                .capacity
                .map(|value| value.to_string())
                .unwrap_or_default();
            writer
                .write_record([
                    station.station_id.as_str(),
                    station.name.as_str(),
                    lat.as_str(),
                    lon.as_str(),
                    capacity.as_str(),
                ])
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(stations.len() as u64)
    })?;
    info!(path = %path, stations = stations.len(), "station csv written");
    Ok(stations.len())
}
