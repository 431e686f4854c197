/*
 *  store.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *  Snapshot persistence: the display cache file, the rolling position
 *  record used across restarts and the optional per-day log.
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

use chrono::{DateTime, Local, NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::StorageSettings;
use crate::constants::{DAILY_LOG_EXTENSION, DAILY_LOG_PREFIX};
use crate::error::StoreError;
use crate::snapshot::{LocationSample, WeatherSnapshot};

/// Rolling "last known position" record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// One line of the daily log.
#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    #[serde(flatten)]
    snapshot: &'a WeatherSnapshot,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    cache_path: PathBuf,
    position_path: PathBuf,
    // Some only when daily logging is enabled
    log_dir: Option<PathBuf>,
}

impl SnapshotStore {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            cache_path: settings.cache_path.clone(),
            position_path: settings.position_path.clone(),
            log_dir: if settings.enable_log { settings.log_dir.clone() } else { None },
        }
    }

    #[cfg(test)]
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Persist a fresh snapshot and the position it was fetched for.
    ///
    /// Cache and position files are replaced atomically, readers see either
    /// the previous record or the new one. The daily log is append-only.
    pub fn put(&self, snapshot: &WeatherSnapshot, location: LocationSample) -> Result<(), StoreError> {
        let body = serde_json::to_vec(snapshot)?;
        write_atomic(&self.cache_path, &body)?;

        let now = Utc::now();
        let position = PositionRecord { time: now, lat: location.latitude, lon: location.longitude };
        write_atomic(&self.position_path, &serde_json::to_vec(&position)?)?;

        if let Some(path) = self.daily_log_path(Local::now().date_naive()) {
            let record = LogRecord {
                time: now,
                lat: location.latitude,
                lon: location.longitude,
                snapshot,
            };
            append_line(&path, &serde_json::to_string(&record)?)?;
            debug!("appended snapshot to {}", path.display());
        }
        Ok(())
    }

    /// Latest cached snapshot, `None` when nothing has been cached yet.
    pub fn get(&self) -> Result<Option<WeatherSnapshot>, StoreError> {
        match fs::read(&self.cache_path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Last known position if it was recorded within `max_age` of `now`, else `{0, 0}`.
    pub fn load_position(&self, max_age: Duration, now: DateTime<Utc>) -> LocationSample {
        let record: PositionRecord = match fs::read(&self.position_path)
            .map_err(StoreError::from)
            .and_then(|b| serde_json::from_slice(&b).map_err(StoreError::from))
        {
            Ok(r) => r,
            Err(e) => {
                debug!("no usable position record at {}: {}", self.position_path.display(), e);
                return LocationSample::NONE;
            }
        };

        let fresh = now
            .signed_duration_since(record.time)
            .to_std()
            .map(|age| age <= max_age)
            // record from the future, the clock moved under us
            .unwrap_or(false);

        if fresh {
            let sample = LocationSample::new(record.lat, record.lon);
            info!("Restored last known position {}", sample);
            sample
        } else {
            info!("Discarding stale position record from {}", record.time);
            LocationSample::NONE
        }
    }

    /// Path of the log for `date`, `None` when logging is disabled.
    pub fn daily_log_path(&self, date: NaiveDate) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| {
            dir.join(format!("{}{}.{}", DAILY_LOG_PREFIX, date.format("%Y-%m-%d"), DAILY_LOG_EXTENSION))
        })
    }
}

/// Write to a sibling temp file then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
