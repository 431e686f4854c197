/*
 *  snapshot.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *  Location samples and normalized weather snapshots
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A latitude/longitude pair. `{0, 0}` is the "no fix" sentinel.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationSample {
    pub const NONE: LocationSample = LocationSample { latitude: 0.0, longitude: 0.0 };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True unless this is the `{0, 0}` sentinel.
    pub fn is_fix(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }

    /// Absolute (Δlat, Δlon) between two samples, in degrees.
    pub fn drift_from(&self, other: &LocationSample) -> (f64, f64) {
        (
            (self.latitude - other.latitude).abs(),
            (self.longitude - other.longitude).abs(),
        )
    }
}

impl fmt::Display for LocationSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// How the snapshot's location was chosen.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Gps,
    #[default]
    Fixed,
}

/// One normalized weather lookup. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub place_name: String,
    pub feels_like_celsius: f64,
    pub sky_condition: String,
    #[serde(default)]
    pub sky_description: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    #[serde(default)]
    pub source: SnapshotSource,
    pub fetched_at: DateTime<Utc>,
}

/// What consumers see. Never a fabricated value.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum WeatherState {
    /// nothing fetched yet
    #[default]
    NoData,
    Ready(WeatherSnapshot),
    /// offline for at least a full fetch interval
    NoNetwork,
}

impl WeatherState {
    pub fn snapshot(&self) -> Option<&WeatherSnapshot> {
        match self {
            WeatherState::Ready(s) => Some(s),
            _ => None,
        }
    }
}
