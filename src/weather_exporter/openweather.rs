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

//! OpenWeather current weather data API.

use crate::client::{self, ClientError};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5";

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct CurrentWeather {
    pub coord: Coord,
    pub weather: Vec<Condition>,
    pub base: String,
    pub main: Main,
    pub visibility: f64,
    pub wind: Wind,
    pub clouds: Clouds,
    pub dt: i64,
    pub timezone: i64,
    pub id: i64,
    pub name: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Condition {
    pub id: i64,
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Main {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Wind {
    pub speed: f64,
    pub deg: f64,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Clouds {
    pub all: f64,
}

const CODE_OK: i64 = 200;

// OpenWeather reports the error code as a number or a string depending on the endpoint.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Code {
    Number(i64),
    Text(String),
}

impl Code {
    fn value(&self, fallback: i64) -> i64 {
        match self {
            Code::Number(n) => *n,
            Code::Text(s) => s.parse().unwrap_or(fallback),
        }
    }
}

#[derive(Deserialize, Debug)]
struct NestedError {
    code: i64,
    message: String,
}

// Only the fields that tell a reading apart from an error.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct Envelope {
    cod: Option<Code>,
    message: Option<String>,
    error: Option<NestedError>,
}

/// Decode a `/weather` response body received with `status`.
///
/// Bodies carrying `{"cod": ..., "message": ...}` with a code other than 200, or an
/// `{"error": {"code": ..., "message": ...}}` object, become `ClientError::Upstream` whatever
/// the HTTP status.
pub fn decode_current_weather(status: StatusCode, url: &Url, body: &[u8]) -> Result<CurrentWeather, ClientError> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(_) if !status.is_success() => return Err(ClientError::Unexpected(status, url.clone())),
        Err(e) => return Err(ClientError::Decode(e, String::from_utf8_lossy(body).into_owned())),
    };

    if let Some(e) = envelope.error {
        return Err(ClientError::Upstream(e.code, e.message));
    }

    let fallback = i64::from(status.as_u16());
    match envelope.cod.map(|c| c.value(fallback)) {
        Some(code) if code != CODE_OK => {
            return Err(ClientError::Upstream(code, envelope.message.unwrap_or_default()));
        }
        None if !status.is_success() => {
            return match envelope.message {
                Some(msg) => Err(ClientError::Upstream(fallback, msg)),
                None => Err(ClientError::Unexpected(status, url.clone())),
            };
        }
        _ => {}
    }

    if !status.is_success() {
        return Err(ClientError::Unexpected(status, url.clone()));
    }

    client::decode(body)
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: Url,
    app_id: String,
}

impl OpenWeatherClient {
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: Url, app_id: String) -> Self {
        OpenWeatherClient {
            client,
            base_url,
            app_id,
        }
    }

    /// Fetch current weather for the closest location to the given coordinates.
    pub async fn current_weather(&self, lat: f64, lon: f64) -> Result<CurrentWeather, ClientError> {
        let url = client::endpoint(&self.base_url, "weather");
        // The app ID is a secret so it's added to the query only after logging the URL.
        tracing::debug!(message = "making current weather request", url = %url, lat = lat, lon = lon);

        let res = self
            .client
            .get(url.clone())
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", self.app_id.clone()),
            ])
            .header(USER_AGENT, client::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Transport)?;

        let (status, body) = client::read_body(res).await?;
        decode_current_weather(status, &url, &body)
    }
}
