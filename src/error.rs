/*
 *  error.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *  Failure taxonomy for the fetch core. None of these are fatal.
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

use std::fmt;
use thiserror::Error;

/// The GPS daemon could not give us a usable fix.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("gpsd unreachable: {0}")]
    Unreachable(String),
    #[error("gpsd watch handshake failed: {0}")]
    Handshake(String),
    #[error("malformed gpsd report: {0}")]
    Malformed(String),
    #[error("no fix within {0} ms")]
    Timeout(u64),
    #[error("gpsd closed the stream before a fix arrived")]
    NoFix,
}

/// A weather lookup did not produce a snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("weather provider returned HTTP {0}")]
    Status(u16),
    #[error("unable to parse weather response: {0}")]
    Parse(String),
    #[error("no GPS fix and no fixed location configured")]
    NoLocation,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            // strip the url, it carries the api key
            None => FetchError::Transport(err.without_url().to_string()),
        }
    }
}

/// Cache, log or position file could not be written or read.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse failure classes, used to log each distinct kind once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    LocationUnavailable,
    FetchTransport,
    FetchStatus,
    FetchParse,
    NoLocation,
    PersistenceFailed,
    NetworkUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::LocationUnavailable => "location unavailable",
            FailureKind::FetchTransport => "fetch failed (transport)",
            FailureKind::FetchStatus => "fetch failed (status)",
            FailureKind::FetchParse => "fetch failed (parse)",
            FailureKind::NoLocation => "no location to fetch",
            FailureKind::PersistenceFailed => "persistence failed",
            FailureKind::NetworkUnavailable => "network unavailable",
        };
        f.write_str(name)
    }
}

impl LocationError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::LocationUnavailable
    }
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Transport(_) => FailureKind::FetchTransport,
            FetchError::Status(_) => FailureKind::FetchStatus,
            FetchError::Parse(_) => FailureKind::FetchParse,
            FetchError::NoLocation => FailureKind::NoLocation,
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::PersistenceFailed
    }
}
