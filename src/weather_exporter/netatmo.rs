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

//! Netatmo weather station API: OAuth password grant, `getstationsdata`, and response types.

use crate::client::{self, ClientError};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::future::Future;

pub const DEFAULT_API_URL: &str = "https://api.netatmo.com/api";
pub const DEFAULT_OAUTH_URL: &str = "https://api.netatmo.com/oauth2";

pub const SCOPE_READ_STATION: &str = "read_station";

pub const DEVICE_TYPE_INDOOR: &str = "NAMain";
pub const DEVICE_TYPE_OUTDOOR: &str = "NAModule1";
pub const DEVICE_TYPE_WIND: &str = "NAModule2";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

/// Source of access tokens for the Netatmo API.
pub trait TokenSource: Send + Sync {
    fn token(&self, scope: &str) -> impl Future<Output = Result<Token, ClientError>> + Send;
}

/// Credentials of the account that owns the Netatmo API application.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize, Debug)]
struct OAuthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Obtains access tokens with the OAuth "password" grant type.
///
/// This only works for the same account that owns the API application. A new token is
/// requested every time, nothing is cached.
#[derive(Debug, Clone)]
pub struct OAuth {
    client: Client,
    base_url: Url,
    credentials: Credentials,
}

impl OAuth {
    pub fn new(client: Client, base_url: Url, credentials: Credentials) -> Self {
        OAuth {
            client,
            base_url,
            credentials,
        }
    }
}

impl TokenSource for OAuth {
    async fn token(&self, scope: &str) -> Result<Token, ClientError> {
        let url = client::endpoint(&self.base_url, "token");
        tracing::debug!(message = "making token request", url = %url, scope = scope);

        let form = [
            ("grant_type", "password"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("scope", scope),
        ];

        let res = self
            .client
            .post(url.clone())
            .header(USER_AGENT, client::USER_AGENT)
            .form(&form)
            .send()
            .await
            .map_err(ClientError::Transport)?;

        let (status, body) = client::read_body(res).await?;
        if status.is_success() {
            return client::decode(&body);
        }

        match serde_json::from_slice::<OAuthError>(&body) {
            Ok(e) => Err(ClientError::Upstream(
                i64::from(status.as_u16()),
                e.error_description.unwrap_or(e.error),
            )),
            Err(_) => Err(ClientError::Unexpected(status, url)),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct StationsDataResponse {
    pub error: Option<ApiError>,
    pub body: StationsBody,
    pub status: String,
    pub time_server: i64,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct StationsBody {
    pub devices: Vec<Device>,
}

/// A base station. Its own dashboard data is the indoor module.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Device {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub station_name: String,
    pub home_id: String,
    pub home_name: String,
    pub reachable: bool,
    pub firmware: i64,
    pub dashboard_data: IndoorModuleData,
    pub modules: Vec<Module>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Module {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub module_name: String,
    pub reachable: bool,
    pub battery_percent: f64,
    pub dashboard_data: ModuleDashboardData,
}

/// Dashboard data of a module. Which half is meaningful depends on the module type.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ModuleDashboardData {
    #[serde(flatten)]
    pub outdoor: OutdoorModuleData,
    #[serde(flatten)]
    pub wind: WindModuleData,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct IndoorModuleData {
    pub time_utc: i64,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "CO2")]
    pub co2: f64,
    #[serde(rename = "Humidity")]
    pub humidity: f64,
    #[serde(rename = "Noise")]
    pub noise: f64,
    #[serde(rename = "Pressure")]
    pub pressure: f64,
    #[serde(rename = "AbsolutePressure")]
    pub absolute_pressure: f64,
    pub pressure_trend: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct OutdoorModuleData {
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "Humidity")]
    pub humidity: f64,
    pub temp_trend: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct WindModuleData {
    #[serde(rename = "WindStrength")]
    pub wind_strength: f64,
    #[serde(rename = "WindAngle")]
    pub wind_angle: f64,
    #[serde(rename = "GustStrength")]
    pub gust_strength: f64,
    #[serde(rename = "GustAngle")]
    pub gust_angle: f64,
}

/// Module data selected by the module type tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModuleData<'a> {
    Outdoor(&'a OutdoorModuleData),
    Wind(&'a WindModuleData),
    Unsupported(&'a str),
}

impl Module {
    pub fn data(&self) -> ModuleData<'_> {
        match self.type_.as_str() {
            DEVICE_TYPE_OUTDOOR => ModuleData::Outdoor(&self.dashboard_data.outdoor),
            DEVICE_TYPE_WIND => ModuleData::Wind(&self.dashboard_data.wind),
            other => ModuleData::Unsupported(other),
        }
    }
}

/// Decode a `getstationsdata` body, turning an error payload into `ClientError::Upstream`.
pub fn decode_stations_data(body: &[u8]) -> Result<StationsDataResponse, ClientError> {
    let res: StationsDataResponse = client::decode(body)?;
    match res.error {
        Some(e) => Err(ClientError::Upstream(e.code, e.message)),
        None => Ok(res),
    }
}

#[derive(Debug, Clone)]
pub struct NetatmoClient<T> {
    client: Client,
    base_url: Url,
    tokens: T,
}

impl<T> NetatmoClient<T>
where
    T: TokenSource,
{
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: Url, tokens: T) -> Self {
        NetatmoClient {
            client,
            base_url,
            tokens,
        }
    }

    /// Fetch data for every station of the account, authenticating first.
    pub async fn stations_data(&self) -> Result<StationsDataResponse, ClientError> {
        let token = self.tokens.token(SCOPE_READ_STATION).await?;
        let url = client::endpoint(&self.base_url, "getstationsdata");
        tracing::debug!(message = "making stations data request", url = %url);

        let res = self
            .client
            .get(url.clone())
            .bearer_auth(&token.access_token)
            .header(USER_AGENT, client::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Transport)?;

        let (status, body) = client::read_body(res).await?;
        match decode_stations_data(&body) {
            Ok(_) if !status.is_success() => Err(ClientError::Unexpected(status, url)),
            Err(ClientError::Decode(_, _)) if !status.is_success() => Err(ClientError::Unexpected(status, url)),
            other => other,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        decode_stations_data, Credentials, ModuleData, NetatmoClient, OAuth, Token, TokenSource,
        DEVICE_TYPE_INDOOR,
    };
    use crate::client::ClientError;
    use crate::testutil::{self, Requests};
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::routing::{get, post};
    use axum::Router;
    use reqwest::{Client, Url};

    pub(crate) const STATIONS_RESPONSE: &str = r#"{
  "body": {
    "devices": [
      {
        "_id": "70:ee:50:80:26:fa",
        "date_setup": 1639335599,
        "last_setup": 1651169293,
        "type": "NAMain",
        "last_status_store": 1651477546,
        "firmware": 181,
        "wifi_status": 41,
        "reachable": true,
        "co2_calibrating": false,
        "data_type": ["Temperature", "CO2", "Humidity", "Noise", "Pressure"],
        "place": {
          "altitude": 395,
          "city": "Kranj",
          "country": "SI",
          "timezone": "Europe/Belgrade",
          "location": [14.3548565, 46.246113]
        },
        "station_name": "My home (Indoor)",
        "home_id": "61b646afb535277ce721d1a4",
        "home_name": "My home",
        "dashboard_data": {
          "time_utc": 1651477543,
          "Temperature": 20.9,
          "CO2": 762,
          "Humidity": 49,
          "Noise": 50,
          "Pressure": 1012,
          "AbsolutePressure": 965.5,
          "min_temp": 18.8,
          "max_temp": 28,
          "date_max_temp": 1651475120,
          "date_min_temp": 1651465946,
          "temp_trend": "down",
          "pressure_trend": "down"
        },
        "modules": [
          {
            "_id": "06:00:00:05:c6:48",
            "type": "NAModule2",
            "module_name": "Veternica",
            "last_setup": 1651333088,
            "data_type": ["Wind"],
            "battery_percent": 100,
            "reachable": true,
            "firmware": 25,
            "last_message": 1651477539,
            "last_seen": 1651477539,
            "rf_status": 74,
            "battery_vp": 6285,
            "dashboard_data": {
              "time_utc": 1651477539,
              "WindStrength": 1,
              "WindAngle": 270,
              "GustStrength": 5,
              "GustAngle": 23,
              "max_wind_str": 11,
              "max_wind_angle": 355,
              "date_max_wind_str": 1651467760
            }
          },
          {
            "_id": "02:00:00:7f:e6:96",
            "type": "NAModule1",
            "module_name": "Zunanji modul",
            "last_setup": 1651475006,
            "data_type": ["Temperature", "Humidity"],
            "battery_percent": 100,
            "reachable": true,
            "firmware": 50,
            "last_message": 1651477539,
            "last_seen": 1651477494,
            "rf_status": 87,
            "battery_vp": 6312,
            "dashboard_data": {
              "time_utc": 1651477494,
              "Temperature": 11.9,
              "Humidity": 91,
              "min_temp": 11.9,
              "max_temp": 20.8,
              "date_max_temp": 1651475085,
              "date_min_temp": 1651477494,
              "temp_trend": "down"
            }
          }
        ]
      }
    ],
    "user": {
      "mail": "someone@example.com",
      "administrative": {
        "lang": "en",
        "reg_locale": "en-US",
        "country": "SI",
        "unit": 0,
        "windunit": 0,
        "pressureunit": 2,
        "feel_like_algo": 0
      }
    }
  },
  "status": "ok",
  "time_exec": 0.08455610275268555,
  "time_server": 1651477647
}"#;

    pub(crate) const ERROR_RESPONSE: &str = r#"{"error":{"code":123,"message":"something went wrong"}}"#;

    /// Hands out the same token every time.
    #[derive(Debug, Clone)]
    pub(crate) struct StaticToken;

    impl TokenSource for StaticToken {
        async fn token(&self, _scope: &str) -> Result<Token, ClientError> {
            Ok(Token {
                access_token: "f1894h0quehf".to_owned(),
                expires_in: 3600,
                refresh_token: "1uu01huiefffa".to_owned(),
            })
        }
    }

    /// Fake Netatmo API answering `getstationsdata` with a fixed status and body.
    pub(crate) fn stations_server(status: StatusCode, body: &'static str, requests: Requests) -> Url {
        let router = Router::new().route(
            "/getstationsdata",
            get(move |uri: Uri, headers: HeaderMap| async move {
                requests.push(uri, headers, String::new());
                (status, body)
            }),
        );

        testutil::serve(router)
    }

    fn credentials() -> Credentials {
        Credentials {
            client_id: "my-clientID".to_owned(),
            client_secret: "my-clientSecret".to_owned(),
            username: "my-username".to_owned(),
            password: "my-password".to_owned(),
        }
    }

    #[test]
    fn test_decode_stations_data() {
        let res = decode_stations_data(STATIONS_RESPONSE.as_bytes()).unwrap();
        assert_eq!("ok", res.status);
        assert_eq!(1, res.body.devices.len());

        let device = &res.body.devices[0];
        assert_eq!(DEVICE_TYPE_INDOOR, device.type_);
        assert_eq!("70:ee:50:80:26:fa", device.id);
        assert_eq!(762.0, device.dashboard_data.co2);
        assert_eq!(965.5, device.dashboard_data.absolute_pressure);
        assert_eq!(2, device.modules.len());

        match device.modules[0].data() {
            ModuleData::Wind(w) => {
                assert_eq!(1.0, w.wind_strength);
                assert_eq!(270.0, w.wind_angle);
                assert_eq!(5.0, w.gust_strength);
                assert_eq!(23.0, w.gust_angle);
            }
            other => panic!("unexpected module data {:?}", other),
        }

        match device.modules[1].data() {
            ModuleData::Outdoor(o) => {
                assert_eq!(11.9, o.temperature);
                assert_eq!(91.0, o.humidity);
            }
            other => panic!("unexpected module data {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_fields_are_zero() {
        let body = r#"{"body":{"devices":[{"_id":"a","type":"NAMain","modules":[{"_id":"b","type":"NAModule1"}]}]},"status":"ok"}"#;
        let res = decode_stations_data(body.as_bytes()).unwrap();
        let device = &res.body.devices[0];

        assert_eq!(0.0, device.dashboard_data.temperature);
        assert_eq!("", device.station_name);
        assert_eq!(ModuleData::Outdoor(&Default::default()), device.modules[0].data());
    }

    #[test]
    fn test_decode_unsupported_module() {
        let body = r#"{"body":{"devices":[{"_id":"a","type":"NAMain","modules":[{"_id":"c","type":"NAModule3"}]}]}}"#;
        let res = decode_stations_data(body.as_bytes()).unwrap();
        assert_eq!(ModuleData::Unsupported("NAModule3"), res.body.devices[0].modules[0].data());
    }

    #[test]
    fn test_decode_upstream_error() {
        match decode_stations_data(ERROR_RESPONSE.as_bytes()) {
            Err(ClientError::Upstream(code, msg)) => {
                assert_eq!(123, code);
                assert_eq!("something went wrong", msg);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_stations_data(b"<html>oops</html>"),
            Err(ClientError::Decode(_, _))
        ));
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let out = format!("{:?}", credentials());
        assert!(out.contains("my-clientID"));
        assert!(!out.contains("my-password"));
        assert!(!out.contains("my-clientSecret"));
    }

    #[tokio::test]
    async fn test_oauth_token() {
        let requests = Requests::default();
        let recorder = requests.clone();
        let router = Router::new().route(
            "/token",
            post(move |uri: Uri, headers: HeaderMap, body: String| async move {
                recorder.push(uri, headers, body);
                r#"{"access_token":"f1894h0quehf","expires_in":3600,"refresh_token":"1uu01huiefffa"}"#
            }),
        );

        let url = testutil::serve(router);
        let oauth = OAuth::new(Client::new(), url, credentials());
        let token = oauth.token("my-scope").await.unwrap();

        assert_eq!(
            Token {
                access_token: "f1894h0quehf".to_owned(),
                expires_in: 3600,
                refresh_token: "1uu01huiefffa".to_owned(),
            },
            token
        );

        let seen = requests.all();
        assert_eq!(1, seen.len());
        assert_eq!("/token", seen[0].uri.path());
        assert_eq!(
            "application/x-www-form-urlencoded",
            seen[0].headers.get("content-type").unwrap().to_str().unwrap()
        );

        let form: Vec<(String, String)> = url_pairs(&seen[0].body);
        assert!(form.contains(&("grant_type".to_owned(), "password".to_owned())));
        assert!(form.contains(&("client_id".to_owned(), "my-clientID".to_owned())));
        assert!(form.contains(&("client_secret".to_owned(), "my-clientSecret".to_owned())));
        assert!(form.contains(&("username".to_owned(), "my-username".to_owned())));
        assert!(form.contains(&("password".to_owned(), "my-password".to_owned())));
        assert!(form.contains(&("scope".to_owned(), "my-scope".to_owned())));
    }

    #[tokio::test]
    async fn test_oauth_token_rejected() {
        let router = Router::new().route(
            "/token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    r#"{"error":"invalid_grant","error_description":"bad credentials"}"#,
                )
            }),
        );

        let url = testutil::serve(router);
        let oauth = OAuth::new(Client::new(), url, credentials());

        match oauth.token("read_station").await {
            Err(ClientError::Upstream(code, msg)) => {
                assert_eq!(400, code);
                assert_eq!("bad credentials", msg);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_stations_data() {
        let requests = Requests::default();
        let url = stations_server(StatusCode::OK, STATIONS_RESPONSE, requests.clone());
        let client = NetatmoClient::new(Client::new(), url, StaticToken);

        let res = client.stations_data().await.unwrap();
        assert_eq!(1, res.body.devices.len());

        let seen = requests.all();
        assert_eq!(1, seen.len());
        assert_eq!("/getstationsdata", seen[0].uri.path());
        assert_eq!(
            "Bearer f1894h0quehf",
            seen[0].headers.get("authorization").unwrap().to_str().unwrap()
        );
        assert_eq!(
            format!("weather_exporter/{}", env!("CARGO_PKG_VERSION")),
            seen[0].headers.get("user-agent").unwrap().to_str().unwrap()
        );
    }

    #[tokio::test]
    async fn test_client_stations_data_error() {
        let url = stations_server(StatusCode::OK, ERROR_RESPONSE, Requests::default());
        let client = NetatmoClient::new(Client::new(), url, StaticToken);

        match client.stations_data().await {
            Err(ClientError::Upstream(code, msg)) => {
                assert_eq!(123, code);
                assert_eq!("something went wrong", msg);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_stations_data_error_status() {
        let url = stations_server(StatusCode::FORBIDDEN, ERROR_RESPONSE, Requests::default());
        let client = NetatmoClient::new(Client::new(), url, StaticToken);

        assert!(matches!(
            client.stations_data().await,
            Err(ClientError::Upstream(123, _))
        ));
    }

    #[tokio::test]
    async fn test_client_stations_data_bad_gateway() {
        let url = stations_server(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>", Requests::default());
        let client = NetatmoClient::new(Client::new(), url, StaticToken);

        assert!(matches!(
            client.stations_data().await,
            Err(ClientError::Unexpected(status, _)) if status == StatusCode::BAD_GATEWAY
        ));
    }

    fn url_pairs(body: &str) -> Vec<(String, String)> {
        Url::parse(&format!("http://localhost/?{}", body))
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}
