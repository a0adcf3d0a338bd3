// weather_collector - Periodic collector of OpenWeather observations
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
use reqwest::{Client, Url};
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::watch;
use tracing::{Instrument, Level};
use weather_collector::client::{OpenWeatherClient, Units};
use weather_collector::collector::{Collector, DEFAULT_INTERVAL};
use weather_collector::http::RequestContext;
use weather_collector::metrics::CollectorMetrics;
use weather_collector::observation::EntitySet;
use weather_collector::store::{DocumentStore, RelationalStore, StoreSet};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9783);
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const DEFAULT_CITIES: &str = "california,delhi,kolkata,london,toronto";

#[derive(Debug, Parser)]
#[clap(name = "weather_collector", version = clap::crate_version!())]
struct WeatherCollectorApplication {
    /// API key for OpenWeather
    #[clap(long, env = "OPENWEATHER_API_KEY", hide_env_values = true)]
    api_key: String,

    /// URL of the OpenWeather current weather endpoint
    #[clap(long, env = "OPENWEATHER_API_URL", default_value = DEFAULT_API_URL)]
    api_url: Url,

    /// Unit system for temperatures. Allowed values are 'standard' (kelvin), 'metric'
    /// (celsius), and 'imperial' (fahrenheit). Stored temperatures are in this unit.
    #[clap(long, env = "OPENWEATHER_UNITS", default_value_t = Units::Metric)]
    units: Units,

    /// Comma separated list of cities to collect observations for, in collection order
    #[clap(long, env = "WEATHER_CITIES", value_delimiter = ',', default_value = DEFAULT_CITIES)]
    cities: Vec<String>,

    /// Path of the SQLite database holding one document collection per city
    #[clap(long, env = "WEATHER_DOCUMENT_DB", default_value = DocumentStore::DEFAULT_PATH)]
    document_db: String,

    /// Path of the SQLite database holding the `weather` table. If not set, observations
    /// are only written to the document database.
    #[clap(long, env = "WEATHER_RELATIONAL_DB")]
    relational_db: Option<String>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "WEATHER_LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Collect observations for every city at this interval, in seconds.
    #[clap(long, env = "WEATHER_REFRESH_SECS", default_value_t = DEFAULT_INTERVAL.as_secs())]
    refresh_secs: u64,

    /// Timeout for each request to the OpenWeather API, in milliseconds.
    #[clap(long, env = "WEATHER_TIMEOUT_MILLIS", default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind to for metrics and stored observations.
    #[clap(long, env = "WEATHER_BIND", default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = WeatherCollectorApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let entities = EntitySet::new(&opts.cities).unwrap_or_else(|e| {
        tracing::error!(message = "invalid city list", error = %e);
        process::exit(1)
    });

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    // Open both stores before starting so that a bad path or unwritable database is
    // reported once at startup instead of failing every write forever.
    let documents = DocumentStore::open(&opts.document_db)
        .map(Arc::new)
        .unwrap_or_else(|e| {
            tracing::error!(message = "unable to open document database", path = %opts.document_db, error = %e);
            process::exit(1)
        });

    let relational = match &opts.relational_db {
        Some(path) => Some(RelationalStore::open(path).map(Arc::new).unwrap_or_else(|e| {
            tracing::error!(message = "unable to open relational database", path = %path, error = %e);
            process::exit(1)
        })),
        None => None,
    };

    let mut registry = Registry::default();
    let metrics = Arc::new(CollectorMetrics::new(&mut registry));
    let client = OpenWeatherClient::new(http_client, opts.api_url.clone(), opts.api_key.clone(), opts.units);
    let collector = Collector::new(
        client,
        StoreSet::new(documents.clone(), relational),
        entities,
        Duration::from_secs(opts.refresh_secs),
        metrics,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let collection = tokio::spawn(
        async move { collector.run(shutdown_rx).await }.instrument(tracing::span!(Level::DEBUG, "collector")),
    );

    tracing::info!(
        message = "collector configured",
        api_url = %opts.api_url,
        units = %opts.units,
        document_db = %opts.document_db,
        relational_db = ?opts.relational_db,
    );

    let context = Arc::new(RequestContext::new(registry, documents));
    let app = weather_collector::http::router(context);
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

    tracing::info!("server shutdown");
    let _ = shutdown_tx.send(());
    collection.await?;

    tracing::info!("collector shutdown");
    Ok(())
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
