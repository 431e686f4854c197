//! Tunables shared by the scheduler, the clients and the store.
//!
//! The drift thresholds are policy, not architecture: they were picked
//! empirically for consumer GPS receivers sitting on a desk.

/// Drift (degrees) at or above which the hysteresis counter is bumped.
pub const DRIFT_SOFT_DEGREES: f64 = 0.005;
/// Drift (degrees) at or above which a fetch is forced.
pub const DRIFT_HARD_DEGREES: f64 = 0.01;
/// Counter value that forces a coordinate fetch without a hard drift.
pub const DRIFT_COUNTER_LIMIT: u32 = 2;

/// Default time between weather fetches.
pub const DEFAULT_FETCH_INTERVAL_SECS: u64 = 3600;
/// Default delay before the first scheduling pass.
pub const DEFAULT_SETTLE_SECS: u64 = 5;
/// Default period of the driver tick.
pub const DEFAULT_TICK_SECS: u64 = 60;
/// Period of the idle hook tick (first-run retries).
pub const IDLE_TICK_MS: u64 = 1000;

/// OpenWeatherMap current weather endpoint.
pub const DEFAULT_WEATHER_URL: &str = "http://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;
/// Connect timeout applied to the weather client.
pub const HTTP_CONNECT_TIMEOUT_MS: u64 = 1500;
/// The provider is always queried in metric, conversion happens at display time.
pub const API_UNITS: &str = "metric";
pub const DEFAULT_LANGUAGE: &str = "en";

// gpsd
pub const DEFAULT_GPSD_HOST: &str = "127.0.0.1";
pub const DEFAULT_GPSD_PORT: u16 = 2947;
pub const DEFAULT_GPS_TIMEOUT_MS: u64 = 3000;
pub const GPS_TIMEOUT_MIN_MS: u64 = 500;
pub const GPS_TIMEOUT_MAX_MS: u64 = 10_000;
pub const GPSD_WATCH_COMMAND: &str = "?WATCH={\"enable\":true,\"json\":true}\n";

// connectivity
pub const DEFAULT_CHECK_HOST: &str = "www.google.com";
pub const DEFAULT_CHECK_PORT: u16 = 80;
pub const DEFAULT_CHECK_TIMEOUT_MS: u64 = 1500;

// storage
pub const DEFAULT_CACHE_PATH: &str = "/tmp/wxfresh_data.json";
pub const DEFAULT_POSITION_PATH: &str = "/tmp/wxfresh_position.json";
/// Daily logs are named `<prefix><YYYY-MM-DD>.jsonl`.
pub const DAILY_LOG_PREFIX: &str = "wxfresh_";
pub const DAILY_LOG_EXTENSION: &str = "jsonl";

/// Suffix appended to place names resolved from a GPS fix.
pub const GPS_PLACE_SUFFIX: &str = " (GPS)";

// display
pub const DEFAULT_DISPLAY_REFRESH_MS: u64 = 1000;
pub const LABEL_CITY: &str = "";
pub const LABEL_TEMPERATURE: &str = "Temp:";
pub const LABEL_SKY: &str = "Sky :";
pub const LABEL_DESCRIPTION: &str = "Desc:";
pub const NO_NETWORK_MARKER: &str = "No network";
