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

use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::error;
use std::fmt;

pub(crate) const USER_AGENT: &str = concat!("weather_exporter/", env!("CARGO_PKG_VERSION"));

/// Error fetching or decoding a response from an upstream weather API.
#[derive(Debug)]
pub enum ClientError {
    /// Network, DNS, TLS or timeout error talking to the API.
    Transport(reqwest::Error),
    /// Body was not valid JSON for the expected type. Includes the body as received.
    Decode(serde_json::Error, String),
    /// The API returned a structured error payload with a code and message.
    Upstream(i64, String),
    /// Non-success status without an error payload that could be decoded.
    Unexpected(StatusCode, Url),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Decode(e, body) => write!(f, "unable to decode response: {}, content: {}", e, body),
            Self::Upstream(code, msg) => write!(f, "upstream error code={} msg={}", code, msg),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Decode(e, _) => Some(e),
            _ => None,
        }
    }
}

/// Read the status and full body of a response.
pub(crate) async fn read_body(res: Response) -> Result<(StatusCode, Vec<u8>), ClientError> {
    let status = res.status();
    let body = res.bytes().await.map_err(ClientError::Transport)?;
    Ok((status, body.to_vec()))
}

pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    serde_json::from_slice(body).map_err(|e| ClientError::Decode(e, String::from_utf8_lossy(body).into_owned()))
}

/// Append a single path segment to a base URL, e.g. `https://api.netatmo.com/api` and
/// `getstationsdata` become `https://api.netatmo.com/api/getstationsdata`.
pub(crate) fn endpoint(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut p) = url.path_segments_mut() {
        p.pop_if_empty().push(segment);
    }

    url
}

#[cfg(test)]
mod tests {
    use super::{decode, endpoint, ClientError};
    use reqwest::Url;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Thing {
        #[allow(dead_code)]
        value: f64,
    }

    #[test]
    fn test_endpoint_with_path() {
        let base = Url::parse("https://api.netatmo.com/api").unwrap();
        assert_eq!("https://api.netatmo.com/api/getstationsdata", endpoint(&base, "getstationsdata").as_str());
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let base = Url::parse("https://api.openweathermap.org/data/2.5/").unwrap();
        assert_eq!("https://api.openweathermap.org/data/2.5/weather", endpoint(&base, "weather").as_str());
    }

    #[test]
    fn test_endpoint_root() {
        let base = Url::parse("http://127.0.0.1:1234").unwrap();
        assert_eq!("http://127.0.0.1:1234/token", endpoint(&base, "token").as_str());
    }

    #[test]
    fn test_decode_malformed_keeps_body() {
        let res = decode::<Thing>(b"{\"value\": ");
        match res {
            Err(ClientError::Decode(_, body)) => assert_eq!("{\"value\": ", body),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
