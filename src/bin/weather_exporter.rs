// weather_exporter - Prometheus metrics exporter for Netatmo and OpenWeather
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
use reqwest::{Client, Url};
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Level;
use weather_exporter::config::{self, Config};
use weather_exporter::http::RequestContext;
use weather_exporter::metrics::MetricsRegistry;
use weather_exporter::netatmo::{self, Credentials, NetatmoClient, OAuth};
use weather_exporter::openweather::{self, OpenWeatherClient};
use weather_exporter::scheduler;
use weather_exporter::stations::StationsData;
use weather_exporter::weather::CurrentWeatherData;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9784);
const DEFAULT_CONFIG_PATH: &str = "./config.json";
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_SHUTDOWN_GRACE_MILLIS: u64 = 1000;

#[derive(Debug, Parser)]
#[clap(name = "weather_exporter", version = clap::crate_version!())]
struct WeatherExporterApplication {
    /// Path to the JSON config file selecting which data sources to poll and how often
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Optional dotenv file of `KEY=value` lines to load credentials from. Variables already
    /// set in the environment take precedence
    #[clap(long)]
    env_file: Option<PathBuf>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for each request to the Netatmo and OpenWeather APIs, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// How long to wait for in-flight scrapes to finish when shutting down, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_MILLIS)]
    shutdown_grace_millis: u64,

    /// Base URL for the Netatmo API
    #[clap(long, default_value = netatmo::DEFAULT_API_URL)]
    netatmo_api_url: Url,

    /// Base URL for Netatmo OAuth token requests
    #[clap(long, default_value = netatmo::DEFAULT_OAUTH_URL)]
    netatmo_oauth_url: Url,

    /// Base URL for the OpenWeather API
    #[clap(long, default_value = openweather::DEFAULT_API_URL)]
    open_weather_api_url: Url,

    /// Client ID of the Netatmo API application
    #[clap(long, env = "NETATMO_CLIENT_ID", hide_env_values = true)]
    netatmo_client_id: Option<String>,

    /// Client secret of the Netatmo API application
    #[clap(long, env = "NETATMO_CLIENT_SECRET", hide_env_values = true)]
    netatmo_client_secret: Option<String>,

    /// Username of the Netatmo account that owns the API application
    #[clap(long, env = "NETATMO_USERNAME", hide_env_values = true)]
    netatmo_username: Option<String>,

    /// Password of the Netatmo account that owns the API application
    #[clap(long, env = "NETATMO_PASSWORD", hide_env_values = true)]
    netatmo_password: Option<String>,

    /// OpenWeather API key
    #[clap(long, env = "OPEN_WEATHER_APP_ID", hide_env_values = true)]
    open_weather_app_id: Option<String>,

    /// Address to bind to. By default, weather_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut opts = WeatherExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    if let Some(path) = opts.env_file.clone() {
        config::load_env_file(&path).unwrap_or_else(|e| {
            tracing::error!(message = "unable to load environment file", path = %path.display(), error = %e);
            process::exit(1)
        });

        // Parse again so options backed by environment variables see the loaded values.
        opts = WeatherExporterApplication::parse();
        tracing::info!(message = "loaded environment file", path = %path.display());
    }

    let config = Config::from_path(&opts.config).unwrap_or_else(|e| {
        tracing::error!(message = "unable to load config", path = %opts.config.display(), error = %e);
        process::exit(1)
    });

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut registry = MetricsRegistry::new();
    let mut pollers: Vec<JoinHandle<()>> = Vec::new();

    let stations_config = &config.netatmo.stations_data;
    if stations_config.enabled {
        config::require_env(&[
            ("NETATMO_CLIENT_ID", opts.netatmo_client_id.as_deref()),
            ("NETATMO_CLIENT_SECRET", opts.netatmo_client_secret.as_deref()),
            ("NETATMO_USERNAME", opts.netatmo_username.as_deref()),
            ("NETATMO_PASSWORD", opts.netatmo_password.as_deref()),
        ])
        .unwrap_or_else(|e| {
            tracing::error!(message = "netatmo stations data is enabled but not configured", error = %e);
            process::exit(1)
        });

        let credentials = Credentials {
            client_id: opts.netatmo_client_id.clone().unwrap_or_default(),
            client_secret: opts.netatmo_client_secret.clone().unwrap_or_default(),
            username: opts.netatmo_username.clone().unwrap_or_default(),
            password: opts.netatmo_password.clone().unwrap_or_default(),
        };

        let oauth = OAuth::new(http_client.clone(), opts.netatmo_oauth_url.clone(), credentials);
        let client = NetatmoClient::new(http_client.clone(), opts.netatmo_api_url.clone(), oauth);
        let stations = StationsData::new(client);
        stations.register(&mut registry).unwrap_or_else(|e| {
            tracing::error!(message = "unable to register netatmo metrics", error = %e);
            process::exit(1)
        });

        let interval = stations_config.interval;
        let shutdown = shutdown_rx.clone();
        pollers.push(tokio::spawn(async move {
            scheduler::run(&stations, interval, shutdown).await;
        }));
    }

    let weather_config = &config.open_weather.current_weather_data;
    if weather_config.enabled {
        config::require_env(&[("OPEN_WEATHER_APP_ID", opts.open_weather_app_id.as_deref())]).unwrap_or_else(|e| {
            tracing::error!(message = "openweather current weather data is enabled but not configured", error = %e);
            process::exit(1)
        });

        if weather_config.coords.is_empty() {
            tracing::warn!(message = "openweather current weather data is enabled without any coordinates");
        }

        let app_id = opts.open_weather_app_id.clone().unwrap_or_default();
        let client = OpenWeatherClient::new(http_client.clone(), opts.open_weather_api_url.clone(), app_id);
        let weather = CurrentWeatherData::new(client, weather_config.coords.clone());
        weather.register(&mut registry).unwrap_or_else(|e| {
            tracing::error!(message = "unable to register openweather metrics", error = %e);
            process::exit(1)
        });

        let interval = weather_config.interval;
        let shutdown = shutdown_rx.clone();
        pollers.push(tokio::spawn(async move {
            scheduler::run(&weather, interval, shutdown).await;
        }));
    }

    if pollers.is_empty() {
        tracing::warn!(message = "no data sources enabled", path = %opts.config.display());
    }

    tokio::spawn(async move {
        // Wait for either SIGTERM or SIGINT to shutdown
        tokio::select! {
            _ = sigterm() => {}
            _ = sigint() => {}
        }

        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let context = Arc::new(RequestContext::new(registry));
    let router = weather_exporter::http::router(context);
    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(router.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr());

    let mut server_shutdown = shutdown_rx.clone();
    let graceful = server.with_graceful_shutdown(async move { shutdown_requested(&mut server_shutdown).await });

    let grace = Duration::from_millis(opts.shutdown_grace_millis);
    let mut grace_shutdown = shutdown_rx.clone();
    tokio::select! {
        res = graceful => {
            if let Err(e) = res {
                tracing::error!(message = "server error", error = %e);
            }
        }
        _ = async {
            shutdown_requested(&mut grace_shutdown).await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(message = "in-flight requests did not finish before grace period", grace_millis = opts.shutdown_grace_millis);
        }
    }

    tracing::info!("server shutdown");

    for poller in pollers {
        if let Err(e) = poller.await {
            tracing::error!(message = "poller task failed", error = %e);
        }
    }

    tracing::info!("pollers stopped");
    Ok(())
}

/// Return once shutdown has been requested or every sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
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
