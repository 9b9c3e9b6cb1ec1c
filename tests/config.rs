use std::time::Duration;

use assert_matches::assert_matches;

use ckan_ingest::config::{Config, ConfigLoader, DatasetEntry};
use ckan_ingest::error::IngestError;
use ckan_ingest::retry::RetryPolicy;

const FULL: &str = r#"{
    "schema_version": 1,
    "catalog": {"base_url": "https://ckan0.cf.opendata.inter.prod-toronto.ca", "cache_ttl_secs": 600},
    "data_root": "data/toronto",
    "datasets": [
        "bike-share-toronto-ridership-data",
        {"id": "bike-share-toronto", "table": "stg_stations", "min_partition": 2020}
    ],
    "publish": {"bucket": "lake", "columnar": false, "min_partition": 2017, "token_env": "GCS_TOKEN"},
    "warehouse": {"project": "lotus-375803", "dataset": "toronto", "table": "stg_toronto_ridership"},
    "retry": {"fetch": {"max_retries": 5, "delay_ms": 10}}
}"#;

fn parse(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

#[test]
fn parses_shorthand_and_detailed_entries() {
    let config = parse(FULL);
    assert_matches!(&config.datasets[0], DatasetEntry::Shorthand(id) if id == "bike-share-toronto-ridership-data");
    assert_matches!(&config.datasets[1], DatasetEntry::Detailed(entry) if entry.id == "bike-share-toronto");

    let resolved = ConfigLoader::resolve_config(config, None).unwrap();
    assert_eq!(resolved.catalog.cache_ttl, Duration::from_secs(600));
    assert_eq!(resolved.data_root, "data/toronto");
    assert_eq!(resolved.datasets[0].min_partition, 2017);
    assert_eq!(resolved.datasets[0].table, None);
    assert_eq!(resolved.datasets[1].min_partition, 2020);
    assert_eq!(resolved.datasets[1].table.as_deref(), Some("stg_stations"));

    let publish = resolved.publish.unwrap();
    assert_eq!(publish.bucket, "lake");
    assert_eq!(publish.remote_root, "data/toronto");
    assert!(!publish.columnar);
    assert_eq!(publish.token_env, "GCS_TOKEN");
    assert_eq!(resolved.warehouse.unwrap().table, "stg_toronto_ridership");
    assert_eq!(
        resolved.retry.fetch,
        RetryPolicy {
            max_retries: 5,
            delay_ms: 10
        }
    );
    assert_eq!(resolved.retry.catalog, RetryPolicy::default());
}

#[test]
fn missing_publish_section_disables_publishing() {
    let config = parse(
        r#"{"catalog": {"base_url": "https://ckan.example.org"}, "datasets": ["a-dataset"]}"#,
    );
    let resolved = ConfigLoader::resolve_config(config, None).unwrap();
    assert!(resolved.publish.is_none());
    assert_eq!(resolved.data_root, "data");
    assert_eq!(resolved.datasets[0].min_partition, 2016);
}

#[test]
fn rejects_non_http_base_url() {
    let config = parse(r#"{"catalog": {"base_url": "ftp://ckan.example.org"}}"#);
    let err = ConfigLoader::resolve_config(config, None).unwrap_err();
    assert_matches!(err, IngestError::InvalidConfig(_));
}

#[test]
fn rejects_unknown_schema_version() {
    let config = parse(r#"{"schema_version": 2, "catalog": {"base_url": "https://ckan.example.org"}}"#);
    let err = ConfigLoader::resolve_config(config, None).unwrap_err();
    assert_matches!(err, IngestError::InvalidConfig(message) if message.contains("schema_version 2"));

    let config = parse(r#"{"catalog": {"base_url": "https://ckan.example.org"}}"#);
    assert_eq!(ConfigLoader::resolve_config(config, None).unwrap().schema_version, 1);
}

#[test]
fn rejects_invalid_dataset_id() {
    let config = parse(
        r#"{"catalog": {"base_url": "https://ckan.example.org"}, "datasets": ["not a dataset/../"]}"#,
    );
    let err = ConfigLoader::resolve_config(config, None).unwrap_err();
    assert_matches!(err, IngestError::InvalidDatasetId(_));
}

#[test]
fn resolve_reads_file_from_path() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ckan-ingest.json");
    std::fs::write(&path, FULL).unwrap();
    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.datasets.len(), 2);
}

#[test]
fn resolve_reports_unreadable_path() {
    let err = ConfigLoader::resolve(Some("/nonexistent/ckan-ingest.json")).unwrap_err();
    assert_matches!(err, IngestError::ConfigRead(_));
}
