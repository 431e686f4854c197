/*
 *  weather.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use serde::Deserialize;
use reqwest::{Client, header};
use std::future::Future;
use std::io::Read;
use std::time::Duration;
use log::{debug, info};
use chrono::Utc;
use flate2::read::GzDecoder;

use crate::constants::{API_UNITS, HTTP_CONNECT_TIMEOUT_MS};
use crate::error::FetchError;
use crate::snapshot::{SnapshotSource, WeatherSnapshot};

/// A location that does not depend on GPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixedLocation {
    /// provider city id
    Id(String),
    /// free-text city query
    Name(String),
}

impl std::fmt::Display for FixedLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixedLocation::Id(id) => write!(f, "city id {}", id),
            FixedLocation::Name(name) => write!(f, "city {}", name),
        }
    }
}

/// Weather lookups used by the scheduler.
pub trait WeatherSource {
    fn fetch_by_coordinates(
        &self,
        lat: f64,
        lon: f64,
        lang: &str,
    ) -> impl Future<Output = Result<WeatherSnapshot, FetchError>> + Send;

    fn fetch_by_location_id(
        &self,
        id: &str,
        lang: &str,
    ) -> impl Future<Output = Result<WeatherSnapshot, FetchError>> + Send;

    fn fetch_by_location_name(
        &self,
        name: &str,
        lang: &str,
    ) -> impl Future<Output = Result<WeatherSnapshot, FetchError>> + Send;
}

// Only the fields we normalize; the provider sends a lot more.
#[derive(Debug, Deserialize)]
struct CurrentResponse {
    #[serde(default)]
    name: String,
    main: MainBlock,
    #[serde(default)]
    weather: Vec<ConditionBlock>,
    coord: CoordBlock,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    feels_like: f64,
}

#[derive(Debug, Deserialize)]
struct ConditionBlock {
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct CoordBlock {
    lat: f64,
    lon: f64,
}

/// OpenWeatherMap current-weather client
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenWeatherClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, FetchError> {
        const VERSION: &'static str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));
        headers.insert("Accept-Encoding", header::HeaderValue::from_static("gzip"));
        headers.insert("Connection", header::HeaderValue::from_static("close"));

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(HTTP_CONNECT_TIMEOUT_MS).min(timeout))
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(OpenWeatherClient {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    /// One GET, no retries. The next scheduled pass is the retry.
    async fn current(&self, mut params: Vec<(&'static str, String)>, lang: &str) -> Result<WeatherSnapshot, FetchError> {
        params.push(("units", API_UNITS.to_string()));
        params.push(("lang", lang.to_string()));
        debug!("Weather API request: {} {:?} appid=<redacted>", self.base_url, params);
        params.push(("appid", self.api_key.clone()));

        let response = self.client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let raw = response.bytes().await?;
        let plain = decode_body(&raw);
        debug!("Weather API response: {} bytes", plain.len());
        parse_current(&plain)
    }
}

impl WeatherSource for OpenWeatherClient {
    async fn fetch_by_coordinates(&self, lat: f64, lon: f64, lang: &str) -> Result<WeatherSnapshot, FetchError> {
        info!("Fetching weather for ({:.4}, {:.4})...", lat, lon);
        let params = vec![("lat", lat.to_string()), ("lon", lon.to_string())];
        self.current(params, lang).await
    }

    async fn fetch_by_location_id(&self, id: &str, lang: &str) -> Result<WeatherSnapshot, FetchError> {
        info!("Fetching weather for city id {}...", id);
        self.current(vec![("id", id.to_string())], lang).await
    }

    async fn fetch_by_location_name(&self, name: &str, lang: &str) -> Result<WeatherSnapshot, FetchError> {
        info!("Fetching weather for {}...", name);
        self.current(vec![("q", name.to_string())], lang).await
    }
}

/// Bodies arrive gzipped from some proxies even without a header, sniff the magic.
fn decode_body(raw: &[u8]) -> String {
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(raw);
        let mut decoded = String::new();
        if decoder.read_to_string(&mut decoded).is_ok() {
            return decoded;
        }
    }
    String::from_utf8_lossy(raw).to_string()
}

/// Normalize a current-weather body. Source defaults to fixed, the scheduler tags GPS lookups.
fn parse_current(body: &str) -> Result<WeatherSnapshot, FetchError> {
    let current: CurrentResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(e.to_string()))?;
    let condition = current
        .weather
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Parse("response has no weather conditions".to_string()))?;

    Ok(WeatherSnapshot {
        place_name: current.name,
        feels_like_celsius: current.main.feels_like,
        sky_condition: condition.main,
        sky_description: condition.description,
        origin_lat: current.coord.lat,
        origin_lon: current.coord.lon,
        source: SnapshotSource::Fixed,
        fetched_at: Utc::now(),
    })
}
