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

//! Configuration file for which data sources to poll and how often.
//!
//! ```json
//! {
//!   "Netatmo": { "StationsData": { "Enabled": true, "Interval": "5m" } },
//!   "OpenWeather": {
//!     "CurrentWeatherData": {
//!       "Enabled": true,
//!       "Interval": "1m",
//!       "Coords": [{ "Lat": 46.2389, "Lon": 14.3556 }]
//!     }
//!   }
//! }
//! ```

use serde::{Deserialize, Deserializer};
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Parse(serde_json::Error),
    Invalid(String),
    MissingEnv(Vec<&'static str>),
    EnvFile(PathBuf, dotenvy::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "unable to read {}: {}", path.display(), e),
            Self::Parse(e) => write!(f, "unable to parse config: {}", e),
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
            Self::MissingEnv(keys) => write!(f, "missing environment variables: {}", keys.join(", ")),
            Self::EnvFile(path, e) => write!(f, "unable to load environment from {}: {}", path.display(), e),
        }
    }
}

impl error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::EnvFile(_, e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub netatmo: NetatmoConfig,
    pub open_weather: OpenWeatherConfig,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetatmoConfig {
    pub stations_data: StationsDataConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct StationsDataConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for StationsDataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct OpenWeatherConfig {
    pub current_weather_data: CurrentWeatherDataConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct CurrentWeatherDataConfig {
    pub enabled: bool,
    pub coords: Vec<Coordinates>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
}

impl Default for CurrentWeatherDataConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            coords: Vec::new(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let stations = &self.netatmo.stations_data;
        if stations.enabled && stations.interval.is_zero() {
            return Err(ConfigError::Invalid("Netatmo.StationsData.Interval must be positive".to_owned()));
        }

        let weather = &self.open_weather.current_weather_data;
        if weather.enabled && weather.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "OpenWeather.CurrentWeatherData.Interval must be positive".to_owned(),
            ));
        }

        for c in weather.coords.iter() {
            if !(-90.0..=90.0).contains(&c.lat) || !(-180.0..=180.0).contains(&c.lon) {
                return Err(ConfigError::Invalid(format!("coordinates {} out of range", c)));
            }
        }

        Ok(())
    }
}

/// Load `KEY=value` lines from a dotenv file into the process environment. Variables that
/// are already set keep their current value.
pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
    let path = path.as_ref();
    dotenvy::from_path(path).map_err(|e| ConfigError::EnvFile(path.to_path_buf(), e))
}

/// Check that every named environment variable has a non-empty value, reporting all
/// missing ones at once.
pub fn require_env(vars: &[(&'static str, Option<&str>)]) -> Result<(), ConfigError> {
    let missing: Vec<&'static str> = vars
        .iter()
        .filter(|(_, v)| v.map(|s| s.is_empty()).unwrap_or(true))
        .map(|(k, _)| *k)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingEnv(missing))
    }
}

/// Parse durations like `"5m"`, `"1h30m"`, `"0.5s"`, or `"250ms"`.
///
/// Supported units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, and `h`. A bare `"0"` is zero.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    if s.is_empty() {
        return Err("empty duration".to_owned());
    }

    let mut nanos = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(format!("invalid duration {:?}: expected number", input));
        }

        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid duration {:?}: bad number {:?}", input, &rest[..num_end]))?;
        rest = &rest[num_end..];

        let unit_end = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("invalid duration {:?}: missing unit", input)),
            u => return Err(format!("invalid duration {:?}: unknown unit {:?}", input, u)),
        };

        nanos += value * scale;
        rest = &rest[unit_end..];
    }

    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return Err(format!("invalid duration {:?}: out of range", input));
    }

    Ok(Duration::from_nanos(nanos.round() as u64))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}
