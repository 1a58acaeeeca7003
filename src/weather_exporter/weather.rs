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

use crate::client::ClientError;
use crate::config::Coordinates;
use crate::metrics::{Descriptor, GaugeTable, MetricSpec, MetricsRegistry, RegistrationError, Sample};
use crate::openweather::{CurrentWeather, OpenWeatherClient};
use crate::scheduler::Updater;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{Instrument, Level};

const NAMESPACE: &str = "open_weather";
const LABELS: &[&str] = &["id", "name"];

fn specs() -> Vec<MetricSpec<CurrentWeather>> {
    vec![
        MetricSpec {
            subsystem: "main",
            name: "temp",
            help: "Temperature in kelvin",
            value: |r: &CurrentWeather| r.main.temp,
        },
        MetricSpec {
            subsystem: "main",
            name: "feels_like",
            help: "Temperature accounting for human perception in kelvin",
            value: |r: &CurrentWeather| r.main.feels_like,
        },
        MetricSpec {
            subsystem: "main",
            name: "temp_min",
            help: "Minimum temperature currently observed in the area in kelvin",
            value: |r: &CurrentWeather| r.main.temp_min,
        },
        MetricSpec {
            subsystem: "main",
            name: "temp_max",
            help: "Maximum temperature currently observed in the area in kelvin",
            value: |r: &CurrentWeather| r.main.temp_max,
        },
        MetricSpec {
            subsystem: "main",
            name: "pressure",
            help: "Atmospheric pressure in hPa",
            value: |r: &CurrentWeather| r.main.pressure,
        },
        MetricSpec {
            subsystem: "main",
            name: "humidity",
            help: "Relative humidity (0-100)",
            value: |r: &CurrentWeather| r.main.humidity,
        },
        MetricSpec {
            subsystem: "wind",
            name: "speed",
            help: "Wind speed in meters per second",
            value: |r: &CurrentWeather| r.wind.speed,
        },
        MetricSpec {
            subsystem: "wind",
            name: "deg",
            help: "Wind direction in degrees",
            value: |r: &CurrentWeather| r.wind.deg,
        },
        MetricSpec {
            subsystem: "clouds",
            name: "all",
            help: "Cloud cover (0-100)",
            value: |r: &CurrentWeather| r.clouds.all,
        },
    ]
}

/// Gauges for the current weather at a fixed list of coordinates.
///
/// Every coordinate is fetched concurrently on each pass. Series are labeled with the `id`
/// and `name` of the city OpenWeather resolves the coordinates to, so two coordinates that
/// resolve to the same city share series.
#[derive(Debug)]
pub struct CurrentWeatherData {
    client: OpenWeatherClient,
    coords: Vec<Coordinates>,
    table: GaugeTable<CurrentWeather>,
}

impl CurrentWeatherData {
    pub fn new(client: OpenWeatherClient, coords: Vec<Coordinates>) -> Self {
        Self {
            client,
            coords,
            table: GaugeTable::new(NAMESPACE, LABELS, specs()),
        }
    }

    pub fn register(&self, reg: &mut MetricsRegistry) -> Result<(), RegistrationError> {
        reg.register(self.table.families())
    }

    pub fn describe(&self) -> Vec<Descriptor> {
        self.table.describe()
    }

    pub fn collect(&self) -> Vec<Sample> {
        self.table.collect()
    }

    /// Set every gauge from `res`, returning the number of series written.
    pub fn apply(&self, res: &CurrentWeather) -> usize {
        let id = res.id.to_string();
        self.table.observe(&[id.as_str(), res.name.as_str()], res)
    }

    async fn fetch_all(&self) -> Vec<(Coordinates, Result<CurrentWeather, ClientError>)> {
        let mut tasks = JoinSet::new();
        for coords in self.coords.iter().copied() {
            let client = self.client.clone();
            tasks.spawn(
                async move { (coords, client.current_weather(coords.lat, coords.lon).await) }
                    .instrument(tracing::span!(
                        Level::DEBUG,
                        "open_weather_current_weather",
                        lat = coords.lat,
                        lon = coords.lon
                    )),
            );
        }

        let mut results = Vec::with_capacity(self.coords.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(res) => results.push(res),
                Err(e) => tracing::error!(message = "current weather task failed", error = %e),
            }
        }

        results
    }
}

impl Updater for CurrentWeatherData {
    fn name(&self) -> &'static str {
        "open_weather_current_weather_data"
    }

    async fn update(&self) {
        let start = Instant::now();
        let results = self.fetch_all().await;

        let mut failed = 0usize;
        for (coords, res) in results {
            match res {
                Ok(weather) => {
                    let written = self.apply(&weather);
                    tracing::info!(
                        message = "updated current weather data",
                        lat = coords.lat,
                        lon = coords.lon,
                        id = weather.id,
                        name = %weather.name,
                        series = written,
                    );
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        message = "failed to fetch current weather data",
                        lat = coords.lat,
                        lon = coords.lon,
                        error = %e,
                    );
                }
            }
        }

        tracing::info!(
            message = "updated current weather data for all coordinates",
            coordinates = self.coords.len(),
            failed = failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
        );
    }
}
