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

//! Prometheus metrics exporter for Netatmo weather stations and OpenWeather
//!
//! ## Features
//!
//! `weather_exporter` periodically fetches measurements from the weather stations of a [Netatmo]
//! account and current weather for a list of coordinates from [OpenWeather], and emits them as
//! Prometheus gauges. Each data source is enabled and scheduled independently in the config file.
//!
//! Netatmo stations (`NAMain`), labeled with `home_id`, `home_name`, `id`, `type`, and `station_name`:
//!
//! * `netatmo_indoor_module_absolute_pressure` - Absolute pressure, in millibars.
//! * `netatmo_indoor_module_co2` - CO2 level, in ppm.
//! * `netatmo_indoor_module_humidity` - Relative humidity (0-100).
//! * `netatmo_indoor_module_noise` - Noise level, in dB.
//! * `netatmo_indoor_module_pressure` - Pressure at sea level, in millibars.
//! * `netatmo_indoor_module_temperature` - Temperature, in degrees celsius.
//!
//! Netatmo outdoor (`NAModule1`) and wind (`NAModule2`) modules, labeled with `home_id`, `home_name`,
//! `id`, `type`, and `module_name`. Other module types are skipped.
//!
//! * `netatmo_outdoor_module_humidity` - Relative humidity (0-100).
//! * `netatmo_outdoor_module_temperature` - Temperature, in degrees celsius.
//! * `netatmo_wind_module_gust_angle` - Direction of the highest gust in the last 5 minutes, in degrees.
//! * `netatmo_wind_module_gust_strength` - Speed of the highest gust in the last 5 minutes, in km/h.
//! * `netatmo_wind_module_wind_angle` - Wind direction, in degrees.
//! * `netatmo_wind_module_wind_strength` - Wind speed, in km/h.
//!
//! OpenWeather current weather, labeled with the `id` and `name` of the city the coordinates resolve to:
//!
//! * `open_weather_main_temp` - Temperature, in kelvin.
//! * `open_weather_main_feels_like` - Temperature accounting for human perception, in kelvin.
//! * `open_weather_main_temp_min` - Minimum temperature currently observed in the area, in kelvin.
//! * `open_weather_main_temp_max` - Maximum temperature currently observed in the area, in kelvin.
//! * `open_weather_main_pressure` - Atmospheric pressure, in hPa.
//! * `open_weather_main_humidity` - Relative humidity (0-100).
//! * `open_weather_wind_speed` - Wind speed, in meters per second.
//! * `open_weather_wind_deg` - Wind direction, in degrees.
//! * `open_weather_clouds_all` - Cloud cover (0-100).
//!
//! A gauge keeps its last value when a later fetch fails, and series are never removed.
//!
//! [Netatmo]: https://dev.netatmo.com/apidocumentation/weather
//! [OpenWeather]: https://openweathermap.org/current
//!
//! ## Build
//!
//! `weather_exporter` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Configuration
//!
//! Data sources are configured with a JSON file, `./config.json` by default. Intervals are
//! durations like `30s`, `5m`, or `1h30m`. Missing sections are disabled.
//!
//! ```json
//! {
//!   "Netatmo": {
//!     "StationsData": { "Enabled": true, "Interval": "5m" }
//!   },
//!   "OpenWeather": {
//!     "CurrentWeatherData": {
//!       "Enabled": true,
//!       "Interval": "1m",
//!       "Coords": [{ "Lat": 46.2389, "Lon": 14.3556 }]
//!     }
//!   }
//! }
//! ```
//!
//! Credentials are read from the environment. Netatmo requires `NETATMO_CLIENT_ID`,
//! `NETATMO_CLIENT_SECRET`, `NETATMO_USERNAME`, and `NETATMO_PASSWORD` (the account that owns
//! the API application). OpenWeather requires `OPEN_WEATHER_APP_ID`.
//!
//! ```text
//! export OPEN_WEATHER_APP_ID=...
//! ./weather_exporter --config /etc/weather_exporter/config.json
//! ```
//!
//! They can also be kept in a dotenv file passed with `--env-file`. Variables already set in
//! the environment take precedence over the file.
//!
//! ```text
//! ./weather_exporter --config /etc/weather_exporter/config.json --env-file /etc/weather_exporter/.env
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9784` at `/metrics`. Once `weather_exporter`
//! is running, configure scrapes of it by your Prometheus server. Add the host running
//! `weather_exporter` as a target under the Prometheus `scrape_configs` section as described by
//! the example below.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     15s
//!   evaluation_interval: 15s
//!   external_labels:
//!     monitor: 'my_prom'
//!
//! scrape_configs:
//! - job_name: weather_exporter
//!   static_configs:
//!   - targets: ['example:9784']
//! ```
//!

pub mod client;
pub mod config;
pub mod http;
pub mod metrics;
pub mod netatmo;
pub mod openweather;
pub mod scheduler;
pub mod stations;
pub mod weather;

#[cfg(test)]
mod testutil;
