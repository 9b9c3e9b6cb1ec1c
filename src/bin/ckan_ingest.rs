use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ckan_ingest::app::{App, CatalogEntry, RunOptions, RunResult};
use ckan_ingest::catalog::CkanHttpClient;
use ckan_ingest::config::{ConfigLoader, DEFAULT_TOKEN_ENV, ResolvedConfig};
use ckan_ingest::domain::DatasetId;
use ckan_ingest::error::IngestError;
use ckan_ingest::fetch::HttpRemoteSource;
use ckan_ingest::gbfs;
use ckan_ingest::memo::Memo;
use ckan_ingest::output::{JsonOutput, LogSink};
use ckan_ingest::publish::{
    BigQueryWarehouse, FsObjectStore, GcsObjectStore, LoadJob, LoadRequest, ObjectStore,
    Publisher, PublisherConfig, Warehouse, WarehouseTarget,
};
use ckan_ingest::store::Store;

type DynPublisher = Publisher<Box<dyn ObjectStore>, Box<dyn Warehouse>>;

#[derive(Parser)]
#[command(name = "ckan-ingest")]
#[command(about = "Change-aware ingestion of CKAN open-data resources into object storage and a warehouse")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch, normalize and publish configured datasets")]
    Run(RunArgs),
    #[command(about = "List the resources a dataset publishes")]
    Catalog(CatalogArgs),
    #[command(about = "Write the bike-share station feed as CSV")]
    Stations(StationsArgs),
}

#[derive(Args)]
struct RunArgs {
    datasets: Vec<String>,

    #[arg(long)]
    force: bool,

    #[arg(long)]
    republish: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    skip_publish: bool,

    #[arg(long)]
    object_store_dir: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct CatalogArgs {
    dataset: String,

    #[arg(long)]
    all: bool,

    #[arg(long)]
    resource: Option<String>,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct StationsArgs {
    #[arg(long)]
    url: String,

    #[arg(long, default_value = "station_information.csv")]
    out: Utf8PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<IngestError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::MissingConfig
        | IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_)
        | IngestError::InvalidConfig(_)
        | IngestError::InvalidDatasetId(_)
        | IngestError::ResourceNotFound(_) => 2,
        IngestError::CatalogHttp(_)
        | IngestError::CatalogStatus { .. }
        | IngestError::CatalogResponse(_)
        | IngestError::FeedHttp(_)
        | IngestError::FeedStatus { .. }
        | IngestError::FeedParse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_datasets(cli.config.as_deref(), cli.json, args),
        Commands::Catalog(args) => show_catalog(cli.config.as_deref(), cli.json, args),
        Commands::Stations(args) => {
            let stations = gbfs::fetch_station_information(&args.url)?;
            let written = gbfs::write_station_csv(&stations, &args.out)?;
            if cli.json {
                JsonOutput::print_json(&serde_json::json!({
                    "path": args.out.as_str(),
                    "stations": written,
                }))
                .into_diagnostic()?;
            } else {
                println!("wrote {written} stations to {}", args.out);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_datasets(config_path: Option<&str>, json: bool, args: RunArgs) -> miette::Result<ExitCode> {
    let config = ConfigLoader::resolve(config_path)?;
    let requests = if args.datasets.is_empty() {
        config.datasets.clone()
    } else {
        args.datasets
            .iter()
            .map(|value| {
                let id: DatasetId = value.parse()?;
                config.dataset(&id).cloned().ok_or_else(|| {
                    IngestError::InvalidDatasetId(format!("{id} is not listed in the config"))
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?
    };

    let publisher = if args.skip_publish || args.dry_run {
        None
    } else {
        build_publisher(&config, args.object_store_dir.as_ref())?
    };
    let app = App::new(
        Store::new(config.data_root.clone()),
        build_memo(&config, args.no_cache)?,
        config.retry,
        CkanHttpClient::new(&config.catalog.base_url)?,
        HttpRemoteSource::new()?,
        publisher,
    );
    let options = RunOptions {
        force: args.force,
        republish: args.republish,
        dry_run: args.dry_run,
        skip_publish: args.skip_publish,
    };

    let results = if json {
        let results = app.run_all(&requests, &options, &JsonOutput)?;
        JsonOutput::print_runs(&results).into_diagnostic()?;
        results
    } else {
        let results = app.run_all(&requests, &options, &LogSink)?;
        print_run_summary(&results);
        results
    };

    let failures: usize = results.iter().map(RunResult::failures).sum();
    if failures > 0 {
        return Ok(ExitCode::from(4));
    }
    Ok(ExitCode::SUCCESS)
}

fn show_catalog(config_path: Option<&str>, json: bool, args: CatalogArgs) -> miette::Result<ExitCode> {
    let config = ConfigLoader::resolve(config_path)?;
    let dataset: DatasetId = args.dataset.parse()?;
    let app: App<_, _, Box<dyn ObjectStore>, Box<dyn Warehouse>> = App::new(
        Store::new(config.data_root.clone()),
        build_memo(&config, args.no_cache)?,
        config.retry,
        CkanHttpClient::new(&config.catalog.base_url)?,
        HttpRemoteSource::new()?,
        None,
    );

    if let Some(name) = args.resource {
        let entry = app.resource(&dataset, &name)?;
        if json {
            JsonOutput::print_json(&entry).into_diagnostic()?;
        } else {
            print_catalog_entry(&entry);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let listing = app.catalog(&dataset, args.all)?;
    if json {
        JsonOutput::print_catalog(&listing).into_diagnostic()?;
    } else {
        println!("{} ({} resources)", listing.dataset, listing.resources.len());
        for entry in &listing.resources {
            print_catalog_entry(entry);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn build_memo(config: &ResolvedConfig, no_cache: bool) -> Result<Memo, IngestError> {
    if no_cache {
        return Ok(Memo::disabled());
    }
    Ok(Memo::new(Memo::default_dir()?, config.catalog.cache_ttl))
}

fn build_publisher(
    config: &ResolvedConfig,
    object_store_dir: Option<&Utf8PathBuf>,
) -> Result<Option<DynPublisher>, IngestError> {
    let remote_root = config
        .publish
        .as_ref()
        .map(|publish| publish.remote_root.clone())
        .unwrap_or_else(|| config.data_root.to_string());
    let columnar = config
        .publish
        .as_ref()
        .map(|publish| publish.columnar)
        .unwrap_or(true);
    let token_env = config
        .publish
        .as_ref()
        .map(|publish| publish.token_env.clone())
        .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());

    if let Some(dir) = object_store_dir {
        let publisher = Publisher::new(
            PublisherConfig {
                remote_root,
                columnar,
                warehouse: None,
                retry: config.retry.publish,
            },
            Box::new(FsObjectStore::new(dir.clone())) as Box<dyn ObjectStore>,
            Box::new(NopWarehouse) as Box<dyn Warehouse>,
        );
        return Ok(Some(publisher));
    }

    let Some(publish) = &config.publish else {
        return Ok(None);
    };
    let object_store: Box<dyn ObjectStore> =
        Box::new(GcsObjectStore::new(&publish.bucket, &publish.token_env)?);
    let (warehouse, target): (Box<dyn Warehouse>, Option<WarehouseTarget>) =
        match &config.warehouse {
            Some(settings) => (
                Box::new(BigQueryWarehouse::new(&settings.project, &token_env)?) as Box<dyn Warehouse>,
                Some(WarehouseTarget {
                    dataset: settings.dataset.clone(),
                    table: settings.table.clone(),
                }),
            ),
            None => (Box::new(NopWarehouse) as Box<dyn Warehouse>, None),
        };
    Ok(Some(Publisher::new(
        PublisherConfig {
            remote_root,
            columnar,
            warehouse: target,
            retry: config.retry.publish,
        },
        object_store,
        warehouse,
    )))
}

fn print_run_summary(results: &[RunResult]) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    for result in results {
        println!("{cyan}📦 {} (started {}){reset}", result.dataset, result.started_at);
        println!(
            "{green}✅ Resources: {} | published files: {}{reset}",
            result.resources.len(),
            result.published()
        );
        let failures = result.failures();
        let color = if failures > 0 { red } else { yellow };
        println!("{color}⚠️ Errors: {failures}{reset}");

        for resource in &result.resources {
            let name = resource.file_name.as_deref().unwrap_or(resource.url.as_str());
            let partition = resource.partition.as_deref().unwrap_or("-");
            let color = if resource.error.is_some() { red } else { cyan };
            println!("{color}• {name} [{partition}] {:?}{reset}", resource.action);
            if let Some(error) = &resource.error {
                println!("{red}   error: {error}{reset}");
            }
            for file in &resource.published {
                match (&file.uri, &file.error) {
                    (Some(uri), _) => println!("{green}   ⬆️  {uri}{reset}"),
                    (None, Some(error)) => {
                        println!("{red}   ✗ {}: {error}{reset}", file.local_path)
                    }
                    (None, None) => println!("{yellow}   skipped {}{reset}", file.local_path),
                }
            }
        }
    }
}

fn print_catalog_entry(entry: &CatalogEntry) {
    let marker = if entry.eligible { "*" } else { " " };
    println!(
        "{marker} {:<8} {:<6} {}",
        entry.partition.as_deref().unwrap_or("-"),
        entry.format,
        entry.url
    );
}

struct NopWarehouse;

impl Warehouse for NopWarehouse {
    fn load_from_uri(&self, request: &LoadRequest) -> Result<LoadJob, IngestError> {
        Err(IngestError::InvalidConfig(format!(
            "no warehouse configured to load {}",
            request.uri
        )))
    }
}
