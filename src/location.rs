/*
 *  location.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *  Location service - current position from the local gpsd daemon
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

use log::debug;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::GPSD_WATCH_COMMAND;
use crate::error::LocationError;
use crate::snapshot::LocationSample;

/// Anything that can tell us where we are right now.
pub trait LocationSource {
    /// Bounded: resolves with a fix or an error, never hangs.
    fn probe(&self) -> impl Future<Output = Result<LocationSample, LocationError>> + Send;
}

/// gpsd client. Every probe opens and closes its own connection.
#[derive(Debug, Clone)]
pub struct GpsdLocation {
    host: String,
    port: u16,
    timeout: Duration,
}

// gpsd reports carry many more fields, we only need these
#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    class: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl GpsdLocation {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
        }
    }

    async fn read_fix(&self) -> Result<LocationSample, LocationError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| LocationError::Unreachable(format!("{}: {}", addr, e)))?;
        let (reader, mut writer) = stream.into_split();

        writer
            .write_all(GPSD_WATCH_COMMAND.as_bytes())
            .await
            .map_err(|e| LocationError::Handshake(e.to_string()))?;

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| LocationError::Malformed(e.to_string()))?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(sample) = parse_report(line)? {
                debug!("gpsd fix {}", sample);
                return Ok(sample);
            }
        }
        Err(LocationError::NoFix)
    }
}

impl LocationSource for GpsdLocation {
    async fn probe(&self) -> Result<LocationSample, LocationError> {
        match timeout(self.timeout, self.read_fix()).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// `Some` only for a TPV report that has both latitude and longitude.
fn parse_report(line: &str) -> Result<Option<LocationSample>, LocationError> {
    let report: Report = serde_json::from_str(line)
        .map_err(|e| LocationError::Malformed(e.to_string()))?;
    match (report.class.as_str(), report.lat, report.lon) {
        ("TPV", Some(lat), Some(lon)) => Ok(Some(LocationSample::new(lat, lon))),
        _ => Ok(None),
    }
}
