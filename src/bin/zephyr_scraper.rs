// zephyr_scraper - Weather station telemetry acquisition and health monitoring
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use prometheus_client::registry::Registry;
use std::collections::BTreeSet;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;
use zephyr_scraper::adapter::cam::cam_adapters;
use zephyr_scraper::adapter::nws::DEFAULT_API_URL;
use zephyr_scraper::adapter::{http_client, station_adapters};
use zephyr_scraper::blob::FsBlobStore;
use zephyr_scraper::bucket::SystemClock;
use zephyr_scraper::config::{ConfigError, JobSchedules, PipelineConfig};
use zephyr_scraper::health::{AlertSink, LogAlertSink, WebhookAlertSink};
use zephyr_scraper::http::RequestContext;
use zephyr_scraper::jobs::{build_registry, Dependencies};
use zephyr_scraper::metrics::PipelineMetrics;
use zephyr_scraper::sounding::HttpImageSource;
use zephyr_scraper::sqlite::SqliteStore;
use zephyr_scraper::store::Inventory;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9783);
const DEFAULT_TIMEOUT_MILLIS: u64 = 30_000;
const DEFAULT_CONCURRENCY: usize = 5;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_DATA_DIR: &str = "public";
const DEFAULT_DATABASE: &str = "zephyr.db";
const DEFAULT_ALWAYS_ALERT: &str = "lpc";

#[derive(Debug, Parser)]
#[clap(name = "zephyr_scraper", version = clap::crate_version!())]
struct ZephyrScraperApplication {
    /// JSON file with the stations, webcams and soundings to track
    #[clap(long)]
    inventory: PathBuf,

    /// Directory where webcam and sounding images are stored
    #[clap(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// SQLite database with readings, station state and the image index. Created if it
    /// doesn't exist.
    #[clap(long, default_value = DEFAULT_DATABASE)]
    database: PathBuf,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for each request to a station or webcam source, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Maximum number of concurrent requests to sources of the same type.
    #[clap(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Station types that raise an alert when any single station goes offline. May be
    /// given multiple times.
    #[clap(long, default_values_t = vec![DEFAULT_ALWAYS_ALERT.to_owned()])]
    always_alert: Vec<String>,

    /// Webhook to POST offline alerts to. Alerts are only logged when not set.
    #[clap(long)]
    alert_webhook: Option<String>,

    /// Remove station readings older than this many days.
    #[clap(long, default_value_t = DEFAULT_RETENTION_DAYS, conflicts_with = "keep_readings")]
    reading_retention_days: u32,

    /// Never remove station readings.
    #[clap(long)]
    keep_readings: bool,

    /// Base URL for the Weather.gov API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    nws_api_url: String,

    /// Run a single job ('station', 'miss', 'errors', 'cam', 'cleanup' or 'sounding') once
    /// and exit instead of starting the scheduler.
    #[clap(long)]
    run_once: Option<String>,

    /// Address to bind to. By default, zephyr_scraper will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = ZephyrScraperApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = Duration::from_millis(opts.timeout_millis);
    let retention_days = (!opts.keep_readings).then_some(opts.reading_retention_days);
    let config = pipeline_config(&opts, timeout, retention_days).unwrap_or_else(|e| {
        tracing::error!(message = "invalid configuration", error = %e);
        process::exit(1)
    });

    let schedules = JobSchedules::standard().unwrap_or_else(|e| {
        tracing::error!(message = "invalid job schedule", error = %e);
        process::exit(1)
    });

    let client = http_client(timeout).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let station_adapters = station_adapters(client.clone(), &opts.nws_api_url).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize station adapters", error = %e);
        process::exit(1)
    });

    let inventory = Inventory::load(&opts.inventory).await.unwrap_or_else(|e| {
        tracing::error!(message = "unable to load inventory", error = %e);
        process::exit(1)
    });

    let store = Arc::new(SqliteStore::open(&opts.database).await.unwrap_or_else(|e| {
        tracing::error!(message = "unable to open database", path = %opts.database.display(), error = %e);
        process::exit(1)
    }));

    store.sync_inventory(&inventory).await.unwrap_or_else(|e| {
        tracing::error!(message = "unable to sync inventory", path = %opts.database.display(), error = %e);
        process::exit(1)
    });

    let alerts: Arc<dyn AlertSink> = match &opts.alert_webhook {
        Some(url) => Arc::new(WebhookAlertSink::new(client.clone(), url.clone())),
        None => Arc::new(LogAlertSink),
    };

    let mut registry = Registry::default();
    let metrics = Arc::new(PipelineMetrics::new(&mut registry));
    let deps = Dependencies {
        stations: store.clone(),
        cams: store.clone(),
        soundings: store.clone(),
        blobs: Arc::new(FsBlobStore::new(&opts.data_dir)),
        station_adapters: Arc::new(station_adapters),
        cam_adapters: Arc::new(cam_adapters(client.clone())),
        images: Arc::new(HttpImageSource::new(client)),
        alerts,
        clock: Arc::new(SystemClock),
        metrics,
    };
    let jobs = build_registry(deps, &config, schedules);

    if let Some(job) = &opts.run_once {
        jobs.run_job(job).await.unwrap_or_else(|e| {
            tracing::error!(message = "unable to run job", job = %job, available = ?jobs.names(), error = %e);
            process::exit(1)
        });
        store.close().await;
        return Ok(());
    }

    let handles = jobs.start();
    tracing::info!(message = "scheduler started", jobs = handles.len(), data_dir = %opts.data_dir.display());

    let context = Arc::new(RequestContext::new(registry));
    let app = zephyr_scraper::http::router(context);
    let server = axum::Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "server started", address = %opts.bind);
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    for handle in handles {
        handle.abort();
    }
    store.close().await;

    tracing::info!("server shutdown");
    Ok(())
}

fn pipeline_config(
    opts: &ZephyrScraperApplication,
    timeout: Duration,
    retention_days: Option<u32>,
) -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default()
        .with_limits(opts.concurrency, timeout)
        .with_reading_retention(retention_days)?;
    config.health.always_alert = opts.always_alert.iter().cloned().collect::<BTreeSet<_>>();
    config.validate()?;
    Ok(config)
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
