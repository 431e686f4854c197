use serde::{Deserialize, Serialize};
use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use dirs_next::home_dir;
use std::{fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::constants::*;
use crate::weather::FixedLocation;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Temperature unit used when rendering. The provider is always asked for metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

/// Labels the display adapter may show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayField {
    City,
    Temperature,
    Sky,
    /// long-form condition, e.g. "light intensity drizzle"
    Description,
}

/// Top-level file configuration. Every field is optional so files and CLI can be layered.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,     // e.g., "info" | "debug"
    pub weather: Option<WeatherConfig>,
    pub gps: Option<GpsConfig>,
    pub network: Option<NetworkConfig>,
    pub storage: Option<StorageConfig>,
    pub display: Option<DisplayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub location_id: Option<String>,
    pub location_name: Option<String>,
    pub use_fixed_location: Option<bool>,
    pub units: Option<TemperatureUnit>,
    pub show_decimal: Option<bool>,
    pub language: Option<String>,
    pub base_url: Option<String>,
    pub fetch_interval_secs: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    pub settle_secs: Option<u64>,
    pub tick_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GpsConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    pub check_host: Option<String>,
    pub check_port: Option<u16>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    pub cache_path: Option<PathBuf>,
    pub position_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub enable_log: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayConfig {
    pub fields: Option<Vec<DisplayField>>,
    pub refresh_ms: Option<u64>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "wxfresh", version, about = "Weather freshness daemon", disable_help_flag = false)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, short = 'c', value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// Enable debug log level
    #[arg(long, short = 'v', alias = "verbose", action = ArgAction::SetTrue)]
    pub debug: bool,
    #[arg(long)]
    pub log_level: Option<String>,
    /// OpenWeatherMap API key
    #[arg(long, short = 'k')]
    pub api_key: Option<String>,
    /// OpenWeatherMap city id
    #[arg(long)]
    pub location_id: Option<String>,
    /// City name query, used when no id is given
    #[arg(long)]
    pub location_name: Option<String>,
    /// Never probe GPS, always use the fixed location
    #[arg(long, action = ArgAction::Set)]
    pub fixed: Option<bool>,
    #[arg(long, value_enum)]
    pub units: Option<TemperatureUnit>,
    #[arg(long, action = ArgAction::Set)]
    pub show_decimal: Option<bool>,
    #[arg(long)]
    pub language: Option<String>,
    #[arg(long)]
    pub fetch_interval_secs: Option<u64>,
    #[arg(long)]
    pub gpsd_host: Option<String>,
    #[arg(long)]
    pub gpsd_port: Option<u16>,
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub cache_path: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub log_dir: Option<PathBuf>,
    #[arg(long, action = ArgAction::Set)]
    pub enable_log: Option<bool>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Effective, validated settings with every default applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: String,
    pub weather: WeatherSettings,
    pub gps: GpsSettings,
    pub network: NetworkSettings,
    pub storage: StorageSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub api_key: String,
    pub fixed_location: Option<FixedLocation>,
    pub use_fixed_location: bool,
    pub language: String,
    pub base_url: String,
    pub fetch_interval: Duration,
    pub http_timeout: Duration,
    pub settle: Duration,
    pub tick: Duration,
}

#[derive(Debug, Clone)]
pub struct GpsSettings {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub cache_path: PathBuf,
    pub position_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub enable_log: bool,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub units: TemperatureUnit,
    pub show_decimal: bool,
    pub fields: Vec<DisplayField>,
    pub refresh: Duration,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<Settings, ConfigError> {
    let cli = Cli::parse();
    let cfg = load_from(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    resolve(&cfg)
}

/// Defaults, then YAML (explicit path or search), then CLI overrides.
pub fn load_from(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    apply_cli_overrides(&mut cfg, cli);
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/wxfresh/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/wxfresh/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/wxfresh.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["wxfresh.yaml", "config.yaml", "config/wxfresh.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some() { dst.log_level = src.log_level; }
    match (&mut dst.weather, src.weather) {
        (None, Some(w)) => dst.weather = Some(w),
        (Some(d), Some(s)) => merge_weather(d, s),
        _ => {}
    }
    match (&mut dst.gps, src.gps) {
        (None, Some(g)) => dst.gps = Some(g),
        (Some(d), Some(s)) => {
            if s.host.is_some()       { d.host = s.host; }
            if s.port.is_some()       { d.port = s.port; }
            if s.timeout_ms.is_some() { d.timeout_ms = s.timeout_ms; }
        }
        _ => {}
    }
    match (&mut dst.network, src.network) {
        (None, Some(n)) => dst.network = Some(n),
        (Some(d), Some(s)) => {
            if s.check_host.is_some() { d.check_host = s.check_host; }
            if s.check_port.is_some() { d.check_port = s.check_port; }
            if s.timeout_ms.is_some() { d.timeout_ms = s.timeout_ms; }
        }
        _ => {}
    }
    match (&mut dst.storage, src.storage) {
        (None, Some(st)) => dst.storage = Some(st),
        (Some(d), Some(s)) => {
            if s.cache_path.is_some()    { d.cache_path = s.cache_path; }
            if s.position_path.is_some() { d.position_path = s.position_path; }
            if s.log_dir.is_some()       { d.log_dir = s.log_dir; }
            if s.enable_log.is_some()    { d.enable_log = s.enable_log; }
        }
        _ => {}
    }
    match (&mut dst.display, src.display) {
        (None, Some(c)) => dst.display = Some(c),
        (Some(d), Some(s)) => {
            if s.fields.is_some()     { d.fields = s.fields; }
            if s.refresh_ms.is_some() { d.refresh_ms = s.refresh_ms; }
        }
        _ => {}
    }
}

fn merge_weather(dst: &mut WeatherConfig, src: WeatherConfig) {
    if src.api_key.is_some()             { dst.api_key = src.api_key; }
    if src.location_id.is_some()         { dst.location_id = src.location_id; }
    if src.location_name.is_some()       { dst.location_name = src.location_name; }
    if src.use_fixed_location.is_some()  { dst.use_fixed_location = src.use_fixed_location; }
    if src.units.is_some()               { dst.units = src.units; }
    if src.show_decimal.is_some()        { dst.show_decimal = src.show_decimal; }
    if src.language.is_some()            { dst.language = src.language; }
    if src.base_url.is_some()            { dst.base_url = src.base_url; }
    if src.fetch_interval_secs.is_some() { dst.fetch_interval_secs = src.fetch_interval_secs; }
    if src.http_timeout_ms.is_some()     { dst.http_timeout_ms = src.http_timeout_ms; }
    if src.settle_secs.is_some()         { dst.settle_secs = src.settle_secs; }
    if src.tick_secs.is_some()           { dst.tick_secs = src.tick_secs; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.debug {
        cfg.log_level = Some("debug".to_string());
    } else if cli.log_level.is_some() {
        cfg.log_level = cli.log_level.clone();
    }

    let weather = cfg.weather.get_or_insert_with(WeatherConfig::default);
    if cli.api_key.is_some()             { weather.api_key = cli.api_key.clone(); }
    if cli.location_id.is_some()         { weather.location_id = cli.location_id.clone(); }
    if cli.location_name.is_some()       { weather.location_name = cli.location_name.clone(); }
    if cli.fixed.is_some()               { weather.use_fixed_location = cli.fixed; }
    if cli.units.is_some()               { weather.units = cli.units; }
    if cli.show_decimal.is_some()        { weather.show_decimal = cli.show_decimal; }
    if cli.language.is_some()            { weather.language = cli.language.clone(); }
    if cli.fetch_interval_secs.is_some() { weather.fetch_interval_secs = cli.fetch_interval_secs; }

    if cli.gpsd_host.is_some() || cli.gpsd_port.is_some() {
        let gps = cfg.gps.get_or_insert_with(GpsConfig::default);
        if cli.gpsd_host.is_some() { gps.host = cli.gpsd_host.clone(); }
        if cli.gpsd_port.is_some() { gps.port = cli.gpsd_port; }
    }

    if cli.cache_path.is_some() || cli.log_dir.is_some() || cli.enable_log.is_some() {
        let storage = cfg.storage.get_or_insert_with(StorageConfig::default);
        if cli.cache_path.is_some() { storage.cache_path = cli.cache_path.clone(); }
        if cli.log_dir.is_some()    { storage.log_dir = cli.log_dir.clone(); }
        if cli.enable_log.is_some() { storage.enable_log = cli.enable_log; }
    }
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let weather = cfg.weather.clone().unwrap_or_default();

    let api_key = weather.api_key.as_deref().unwrap_or("").trim();
    if api_key.is_empty() {
        return Err(ConfigError::Validation("weather api_key is required".into()));
    }
    if weather.use_fixed_location.unwrap_or(false) && fixed_location(&weather).is_none() {
        return Err(ConfigError::Validation(
            "use_fixed_location requires location_id or location_name".into(),
        ));
    }
    if weather.fetch_interval_secs == Some(0) {
        return Err(ConfigError::Validation("fetch_interval_secs must be > 0".into()));
    }
    if weather.tick_secs == Some(0) {
        return Err(ConfigError::Validation("tick_secs must be > 0".into()));
    }
    if let Some(gps) = cfg.gps.as_ref() {
        if let Some(t) = gps.timeout_ms {
            if !(GPS_TIMEOUT_MIN_MS..=GPS_TIMEOUT_MAX_MS).contains(&t) {
                return Err(ConfigError::Validation(format!(
                    "gps timeout_ms must be {GPS_TIMEOUT_MIN_MS}..={GPS_TIMEOUT_MAX_MS}"
                )));
            }
        }
    }
    if let Some(storage) = cfg.storage.as_ref() {
        if storage.enable_log.unwrap_or(false) && storage.log_dir.is_none() {
            return Err(ConfigError::Validation("enable_log requires storage log_dir".into()));
        }
    }
    if let Some(fields) = cfg.display.as_ref().and_then(|d| d.fields.as_ref()) {
        if fields.is_empty() {
            return Err(ConfigError::Validation("display fields must not be empty".into()));
        }
    }
    Ok(())
}

/// An explicit id wins over a free-text name; blanks count as unset.
fn fixed_location(weather: &WeatherConfig) -> Option<FixedLocation> {
    let non_blank = |s: &Option<String>| {
        s.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
    };
    non_blank(&weather.location_id)
        .map(FixedLocation::Id)
        .or_else(|| non_blank(&weather.location_name).map(FixedLocation::Name))
}

/// Validate the merged config and apply defaults.
pub fn resolve(cfg: &Config) -> Result<Settings, ConfigError> {
    validate(cfg)?;

    let weather = cfg.weather.clone().unwrap_or_default();
    let gps = cfg.gps.clone().unwrap_or_default();
    let network = cfg.network.clone().unwrap_or_default();
    let storage = cfg.storage.clone().unwrap_or_default();
    let display = cfg.display.clone().unwrap_or_default();

    let mut fields = display
        .fields
        .unwrap_or_else(|| vec![DisplayField::City, DisplayField::Temperature, DisplayField::Sky]);
    // keep first occurrence order
    let mut seen = Vec::with_capacity(fields.len());
    fields.retain(|f| if seen.contains(f) { false } else { seen.push(*f); true });

    Ok(Settings {
        log_level: cfg.log_level.clone().unwrap_or_else(|| "info".to_string()),
        weather: WeatherSettings {
            api_key: weather.api_key.clone().unwrap_or_default().trim().to_string(),
            fixed_location: fixed_location(&weather),
            use_fixed_location: weather.use_fixed_location.unwrap_or(false),
            language: weather.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            base_url: weather.base_url.unwrap_or_else(|| DEFAULT_WEATHER_URL.to_string()),
            fetch_interval: Duration::from_secs(
                weather.fetch_interval_secs.unwrap_or(DEFAULT_FETCH_INTERVAL_SECS),
            ),
            http_timeout: Duration::from_millis(
                weather.http_timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
            ),
            settle: Duration::from_secs(weather.settle_secs.unwrap_or(DEFAULT_SETTLE_SECS)),
            tick: Duration::from_secs(weather.tick_secs.unwrap_or(DEFAULT_TICK_SECS)),
        },
        gps: GpsSettings {
            host: gps.host.unwrap_or_else(|| DEFAULT_GPSD_HOST.to_string()),
            port: gps.port.unwrap_or(DEFAULT_GPSD_PORT),
            timeout: Duration::from_millis(gps.timeout_ms.unwrap_or(DEFAULT_GPS_TIMEOUT_MS)),
        },
        network: NetworkSettings {
            host: network.check_host.unwrap_or_else(|| DEFAULT_CHECK_HOST.to_string()),
            port: network.check_port.unwrap_or(DEFAULT_CHECK_PORT),
            timeout: Duration::from_millis(network.timeout_ms.unwrap_or(DEFAULT_CHECK_TIMEOUT_MS)),
        },
        storage: StorageSettings {
            cache_path: storage.cache_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH)),
            position_path: storage
                .position_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_POSITION_PATH)),
            log_dir: storage.log_dir,
            enable_log: storage.enable_log.unwrap_or(false),
        },
        display: DisplaySettings {
            units: weather.units.unwrap_or_default(),
            show_decimal: weather.show_decimal.unwrap_or(false),
            fields,
            refresh: Duration::from_millis(display.refresh_ms.unwrap_or(DEFAULT_DISPLAY_REFRESH_MS)),
        },
    })
}
