use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{self, CatalogClient};
use crate::config::{DatasetRequest, RetrySettings};
use crate::domain::{DatasetId, NormalizedFile, Resource};
use crate::error::IngestError;
use crate::fetch::{self, FetchAction, FetchOptions, RemoteSource};
use crate::memo::Memo;
use crate::normalize;
use crate::publish::{
    ObjectStore, PublishOutcome, PublishTarget, Publisher, SkipReason, Warehouse,
};
use crate::store::{CompletionRecord, Store};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub force: bool,
    pub republish: bool,
    pub dry_run: bool,
    pub skip_publish: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Planned,
    Downloaded,
    Updated,
    Unchanged,
    Failed,
}

impl From<FetchAction> for ResourceAction {
    fn from(action: FetchAction) -> Self {
        match action {
            FetchAction::Downloaded => ResourceAction::Downloaded,
            FetchAction::Updated => ResourceAction::Updated,
            FetchAction::Unchanged => ResourceAction::Unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishAction {
    Published,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub local_path: String,
    pub action: PublishAction,
    pub skip_reason: Option<SkipReason>,
    pub remote_path: Option<String>,
    pub uri: Option<String>,
    pub load_job: Option<String>,
    pub error: Option<String>,
}

impl PublishReport {
    fn new(file: &NormalizedFile, action: PublishAction) -> Self {
        Self {
            local_path: file.path.to_string(),
            action,
            skip_reason: None,
            remote_path: None,
            uri: None,
            load_job: None,
            error: None,
        }
    }

    fn already_published(file: &NormalizedFile, remote_path: &str) -> Self {
        let mut report = Self::new(file, PublishAction::Skipped);
        report.skip_reason = Some(SkipReason::AlreadyPublished);
        report.remote_path = Some(remote_path.to_string());
        report
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub url: String,
    pub format: String,
    pub partition: Option<String>,
    pub file_name: Option<String>,
    pub action: ResourceAction,
    pub sha256: Option<String>,
    pub normalized: Vec<String>,
    pub published: Vec<PublishReport>,
    pub error: Option<String>,
}

impl ResourceReport {
    fn new(resource: &Resource) -> Self {
        Self {
            url: resource.url.clone(),
            format: resource.format.to_string(),
            partition: None,
            file_name: None,
            action: ResourceAction::Failed,
            sha256: None,
            normalized: Vec::new(),
            published: Vec::new(),
            error: None,
        }
    }

    pub fn failures(&self) -> usize {
        let own = usize::from(self.error.is_some());
        own + self
            .published
            .iter()
            .filter(|report| report.action == PublishAction::Failed)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub dataset: String,
    pub started_at: String,
    pub resources: Vec<ResourceReport>,
}

impl RunResult {
    pub fn failures(&self) -> usize {
        self.resources.iter().map(ResourceReport::failures).sum()
    }

    pub fn published(&self) -> usize {
        self.resources
            .iter()
            .flat_map(|resource| resource.published.iter())
            .filter(|report| report.action == PublishAction::Published)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: Option<String>,
    pub url: String,
    pub format: String,
    pub datastore_active: bool,
    pub eligible: bool,
    pub partition: Option<String>,
}

impl From<Resource> for CatalogEntry {
    fn from(resource: Resource) -> Self {
        Self {
            eligible: resource.is_eligible(),
            partition: resource
                .partition()
                .ok()
                .map(|partition| partition.to_string()),
            format: resource.format.to_string(),
            datastore_active: resource.datastore_active,
            name: resource.name,
            url: resource.url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogListing {
    pub dataset: String,
    pub resources: Vec<CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: CatalogClient, R: RemoteSource, O: ObjectStore, W: Warehouse> {
    store: Store,
    memo: Memo,
    retry: RetrySettings,
    catalog: C,
    source: R,
    publisher: Option<Publisher<O, W>>,
}

impl<C: CatalogClient, R: RemoteSource, O: ObjectStore, W: Warehouse> App<C, R, O, W> {
    pub fn new(
        store: Store,
        memo: Memo,
        retry: RetrySettings,
        catalog: C,
        source: R,
        publisher: Option<Publisher<O, W>>,
    ) -> Self {
        Self {
            store,
            memo,
            retry,
            catalog,
            source,
            publisher,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn catalog(&self, dataset: &DatasetId, all: bool) -> Result<CatalogListing, IngestError> {
        let resources = catalog::lookup(&self.catalog, &self.memo, &self.retry.catalog, dataset)?;
        let resources = resources
            .into_iter()
            .filter(|resource| all || resource.is_eligible())
            .map(CatalogEntry::from)
            .collect();
        Ok(CatalogListing {
            dataset: dataset.to_string(),
            resources,
        })
    }

    pub fn resource(&self, dataset: &DatasetId, name: &str) -> Result<CatalogEntry, IngestError> {
        let resources = catalog::lookup(&self.catalog, &self.memo, &self.retry.catalog, dataset)?;
        let listed = catalog::find_resource_by_name(&resources, name)?;
        let resource = self
            .retry
            .catalog
            .run("catalog", || self.catalog.resource_show(&listed.id))?;
        Ok(CatalogEntry::from(resource))
    }

    pub fn run_all(
        &self,
        datasets: &[DatasetRequest],
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<RunResult>, IngestError> {
        datasets
            .iter()
            .map(|request| self.run(request, options, sink))
            .collect()
    }

    pub fn run(
        &self,
        request: &DatasetRequest,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, IngestError> {
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Catalog; dataset {}", request.id),
            elapsed: None,
        });
        let resources =
            catalog::lookup(&self.catalog, &self.memo, &self.retry.catalog, &request.id)?;
        let eligible = catalog::eligible_resources(resources);
        sink.event(ProgressEvent {
            message: format!("phase=Catalog; {} eligible resources", eligible.len()),
            elapsed: Some(started.elapsed()),
        });

        let target = PublishTarget {
            table: request.table.clone(),
            min_partition: request.min_partition,
        };
        let mut reports = Vec::with_capacity(eligible.len());
        for resource in &eligible {
            let mut report = ResourceReport::new(resource);
            if let Err(err) = self.run_resource(resource, &target, options, sink, &mut report) {
                warn!(url = %resource.url, error = %err, "resource failed");
                sink.event(ProgressEvent {
                    message: format!("phase=Error; {}: {err}", resource.url),
                    elapsed: Some(started.elapsed()),
                });
                report.error = Some(err.to_string());
            }
            reports.push(report);
        }

        let result = RunResult {
            dataset: request.id.to_string(),
            started_at,
            resources: reports,
        };
        info!(
            dataset = %request.id,
            resources = result.resources.len(),
            published = result.published(),
            failures = result.failures(),
            "run finished"
        );
        Ok(result)
    }

    fn run_resource(
        &self,
        resource: &Resource,
        target: &PublishTarget,
        options: &RunOptions,
        sink: &dyn ProgressSink,
        report: &mut ResourceReport,
    ) -> Result<(), IngestError> {
        let artifact = fetch::plan_artifact(&self.store, resource)?;
        report.partition = Some(artifact.partition.to_string());
        report.file_name = Some(artifact.file_name.clone());
        if options.dry_run {
            report.action = ResourceAction::Planned;
            return Ok(());
        }

        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {}", resource.url),
            elapsed: None,
        });
        let outcome = fetch::fetch_resource(
            &self.store,
            &self.source,
            resource,
            &FetchOptions {
                force: options.force,
            },
            &self.retry.fetch,
        )?;
        report.action = outcome.action.into();
        report.sha256 = Some(outcome.sha256.clone());
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} {:?}", artifact.file_name, outcome.action),
            elapsed: Some(started.elapsed()),
        });
        let publisher = self.publisher.as_ref().filter(|_| !options.skip_publish);
        let mut record = match self.store.read_completion(&outcome.artifact)? {
            Some(record) if record.sha256 == outcome.sha256 => record,
            _ => CompletionRecord::new(&outcome.sha256),
        };
        if options.republish {
            record.published.clear();
        }
        if outcome.action == FetchAction::Unchanged && record.is_complete(publisher.is_some()) {
            return Ok(());
        }

        let files = normalize::normalize(&outcome.artifact, &resource.format)?;
        report.normalized = files.iter().map(|file| file.path.to_string()).collect();
        record.normalized = true;
        record.files = files.iter().map(|file| file.file_name.clone()).collect();
        if let Some(publisher) = publisher {
            for file in &files {
                let published = match record.published.get(&file.file_name) {
                    Some(Some(remote_path)) => PublishReport::already_published(file, remote_path),
                    _ => self.publish_file(publisher, file, target, sink),
                };
                match published.action {
                    PublishAction::Published => {
                        record
                            .published
                            .insert(file.file_name.clone(), published.remote_path.clone());
                    }
                    PublishAction::Skipped => {
                        record.published.entry(file.file_name.clone()).or_insert(None);
                    }
                    PublishAction::Failed => {}
                }
                report.published.push(published);
            }
        }
        self.store.write_completion(&outcome.artifact, &record)
    }

    fn publish_file(
        &self,
        publisher: &Publisher<O, W>,
        file: &NormalizedFile,
        target: &PublishTarget,
        sink: &dyn ProgressSink,
    ) -> PublishReport {
        let started = Instant::now();
        let mut report = PublishReport::new(file, PublishAction::Failed);
        match publisher.publish(file, target) {
            Ok(PublishOutcome::Published(object)) => {
                sink.event(ProgressEvent {
                    message: format!("phase=Publish; {}", object.uri),
                    elapsed: Some(started.elapsed()),
                });
                report.action = PublishAction::Published;
                report.remote_path = Some(object.path);
                report.uri = Some(object.uri);
                report.load_job = object.load_job;
            }
            Ok(PublishOutcome::Skipped(reason)) => {
                report.action = PublishAction::Skipped;
                report.skip_reason = Some(reason);
            }
            Err(err) => {
                warn!(file = %file.path, error = %err, "publish failed");
                report.error = Some(err.to_string());
            }
        }
        report
    }
}
