/*
 *  scheduler.rs
 *
 *  wxfresh - weather that keeps up
 *  (c) 2020-26 Stuart Hunter
 *
 *  Fetch scheduler: decides when to probe the GPS, when a refetch is
 *  warranted and whether to ask by coordinates or by the fixed location.
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

use chrono::Utc;
use log::{debug, error, info, warn};
use std::fmt::Display;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};

use crate::config::WeatherSettings;
use crate::constants::{
    DRIFT_COUNTER_LIMIT, DRIFT_HARD_DEGREES, DRIFT_SOFT_DEGREES, GPS_PLACE_SUFFIX, IDLE_TICK_MS,
};
use crate::error::{FailureKind, FetchError};
use crate::location::LocationSource;
use crate::netcheck::Connectivity;
use crate::snapshot::{LocationSample, SnapshotSource, WeatherSnapshot, WeatherState};
use crate::store::SnapshotStore;
use crate::weather::{FixedLocation, WeatherSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Probing,
    Fetching,
    /// a snapshot is in hand, waiting out the interval
    Cooling,
}

/// Where the next lookup is made from, decided once per pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchPlan {
    UseGps(LocationSample),
    UseFixed(FixedLocation),
}

/// Mutable bookkeeping, owned by exactly one scheduler.
#[derive(Debug, Default)]
struct SchedulerState {
    last_fetch_time: Option<Instant>,
    last_gps_probe_time: Option<Instant>,
    drift_counter: u32,
    ready_flag: bool,
    running_flag: bool,
    last_known: LocationSample,
    offline_since: Option<Instant>,
    /// idle time accrued since the last idle-driven pass
    since_idle_pass: Duration,
    last_failure: Option<FailureKind>,
}

pub struct FetchScheduler<L, W, N> {
    settings: WeatherSettings,
    location: L,
    weather: W,
    network: N,
    store: SnapshotStore,
    state: SchedulerState,
    phase: Phase,
    tx: watch::Sender<WeatherState>,
}

/// `true` when `period` has passed since `since`, or `since` never happened.
fn due(since: Option<Instant>, now: Instant, period: Duration) -> bool {
    since.is_none_or(|t| now.saturating_duration_since(t) >= period)
}

impl<L, W, N> FetchScheduler<L, W, N>
where
    L: LocationSource,
    W: WeatherSource,
    N: Connectivity,
{
    /// Seeds the published state from the cache and the last known
    /// position from the rolling position file.
    pub fn new(settings: WeatherSettings, location: L, weather: W, network: N, store: SnapshotStore) -> Self {
        let initial = match store.get() {
            Ok(Some(previous)) => {
                info!("Serving cached weather for {} until the first fetch", previous.place_name);
                WeatherState::Ready(previous)
            }
            Ok(None) => WeatherState::NoData,
            Err(e) => {
                warn!("Ignoring unreadable weather cache: {}", e);
                WeatherState::NoData
            }
        };
        let last_known = store.load_position(settings.fetch_interval, Utc::now());
        let (tx, _) = watch::channel(initial);

        Self {
            settings,
            location,
            weather,
            network,
            store,
            state: SchedulerState {
                ready_flag: true,
                last_known,
                ..Default::default()
            },
            phase: Phase::Idle,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WeatherState> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub fn latest(&self) -> WeatherState {
        self.tx.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn drift_counter(&self) -> u32 {
        self.state.drift_counter
    }

    #[cfg(test)]
    pub fn is_ready_pending(&self) -> bool {
        self.state.ready_flag
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.state.running_flag
    }

    pub async fn maybe_update(&mut self) {
        self.maybe_update_at(Instant::now()).await
    }

    /// One scheduling pass evaluated at `now`.
    pub async fn maybe_update_at(&mut self, now: Instant) {
        let interval = self.settings.fetch_interval;

        // GPS-probe gate
        let mut fresh = None;
        if !self.settings.use_fixed_location && due(self.state.last_gps_probe_time, now, interval / 2) {
            self.phase = Phase::Probing;
            self.state.last_gps_probe_time = Some(now);
            match self.location.probe().await {
                Ok(sample) if sample.is_fix() => fresh = Some(sample),
                Ok(_) => debug!("gpsd answered without a usable fix"),
                Err(e) => self.note_failure(e.kind(), &e),
            }
        }

        // drift against last known, zero without a fresh fix
        let (dlat, dlon) = fresh
            .map(|s| s.drift_from(&self.state.last_known))
            .unwrap_or((0.0, 0.0));
        let interval_elapsed = due(self.state.last_fetch_time, now, interval);

        if dlat >= DRIFT_SOFT_DEGREES || dlon >= DRIFT_SOFT_DEGREES || interval_elapsed {
            self.state.drift_counter += 1;
            debug!("drift Δlat={:.4} Δlon={:.4} counter={}", dlat, dlon, self.state.drift_counter);
        }

        // checked every pass, independent of the fetch gate
        let online = self.check_network(now).await;

        let hard_drift = dlat >= DRIFT_HARD_DEGREES || dlon >= DRIFT_HARD_DEGREES;
        if !(self.state.ready_flag || interval_elapsed || hard_drift) || !online {
            self.settle_phase();
            return;
        }

        let plan = match self.plan(fresh, hard_drift) {
            Ok(plan) => plan,
            Err(e) => {
                self.note_failure(e.kind(), &e);
                self.settle_phase();
                return;
            }
        };

        self.phase = Phase::Fetching;
        match self.fetch(&plan).await {
            Ok(snapshot) => self.accept(snapshot, fresh, now),
            Err(e) => self.note_failure(e.kind(), &e),
        }
        self.settle_phase();
    }

    /// Startup hook: one pass after the settle delay.
    pub async fn on_ready(&mut self) {
        tokio::time::sleep(self.settings.settle).await;
        self.maybe_update().await;
        self.state.running_flag = true;
    }

    pub async fn on_idle_tick(&mut self, elapsed: Duration) {
        self.on_idle_tick_at(elapsed, Instant::now()).await
    }

    /// Keeps retrying the first fetch, at most once per quarter interval.
    pub async fn on_idle_tick_at(&mut self, elapsed: Duration, now: Instant) {
        if !self.state.ready_flag {
            return;
        }
        self.state.since_idle_pass += elapsed;
        if self.state.since_idle_pass >= self.settings.fetch_interval / 4 {
            self.state.since_idle_pass = Duration::ZERO;
            self.maybe_update_at(now).await;
        }
    }

    fn plan(&self, fresh: Option<LocationSample>, hard_drift: bool) -> Result<FetchPlan, FetchError> {
        let fix = fresh.unwrap_or(self.state.last_known);
        let moved = hard_drift || self.state.drift_counter >= DRIFT_COUNTER_LIMIT;

        if !self.settings.use_fixed_location && moved && fix.is_fix() {
            return Ok(FetchPlan::UseGps(fix));
        }
        self.settings
            .fixed_location
            .clone()
            .map(FetchPlan::UseFixed)
            .ok_or(FetchError::NoLocation)
    }

    async fn fetch(&self, plan: &FetchPlan) -> Result<WeatherSnapshot, FetchError> {
        let lang = self.settings.language.as_str();
        match plan {
            FetchPlan::UseGps(fix) => {
                let mut snapshot = self.weather.fetch_by_coordinates(fix.latitude, fix.longitude, lang).await?;
                snapshot.place_name.push_str(GPS_PLACE_SUFFIX);
                snapshot.source = SnapshotSource::Gps;
                Ok(snapshot)
            }
            FetchPlan::UseFixed(FixedLocation::Id(id)) => self.weather.fetch_by_location_id(id, lang).await,
            FetchPlan::UseFixed(FixedLocation::Name(name)) => self.weather.fetch_by_location_name(name, lang).await,
        }
    }

    async fn check_network(&mut self, now: Instant) -> bool {
        if self.network.is_online().await {
            self.state.offline_since = None;
            return true;
        }
        let since = *self.state.offline_since.get_or_insert(now);
        self.note_failure(FailureKind::NetworkUnavailable, &"connectivity check failed");
        if now.saturating_duration_since(since) >= self.settings.fetch_interval
            && *self.tx.borrow() != WeatherState::NoNetwork
        {
            warn!("Offline for a full fetch interval, showing no network");
            self.tx.send_replace(WeatherState::NoNetwork);
        }
        false
    }

    fn accept(&mut self, snapshot: WeatherSnapshot, fresh: Option<LocationSample>, now: Instant) {
        if let Some(fix) = fresh {
            self.state.last_known = fix;
        }
        self.state.drift_counter = 0;
        self.state.last_fetch_time = Some(now);
        self.state.ready_flag = false;
        self.state.since_idle_pass = Duration::ZERO;
        if self.state.last_failure.take().is_some() {
            info!("Weather fetch recovered");
        }

        // passes run one at a time, so this fetch is newer than whatever is published
        info!(
            "Weather for {}: feels like {:.1}°C, {}",
            snapshot.place_name, snapshot.feels_like_celsius, snapshot.sky_condition
        );
        if let Err(e) = self.store.put(&snapshot, self.state.last_known) {
            self.note_failure(e.kind(), &e);
        }
        self.tx.send_replace(WeatherState::Ready(snapshot));
    }

    fn settle_phase(&mut self) {
        self.phase = if self.state.last_fetch_time.is_some() { Phase::Cooling } else { Phase::Idle };
    }

    /// warn once per distinct kind, repeats go to debug
    fn note_failure(&mut self, kind: FailureKind, detail: &dyn Display) {
        if self.state.last_failure == Some(kind) {
            debug!("{} (repeat): {}", kind, detail);
        } else {
            warn!("{}: {}", kind, detail);
            self.state.last_failure = Some(kind);
        }
    }
}

impl<L, W, N> FetchScheduler<L, W, N>
where
    L: LocationSource + Send + Sync + 'static,
    W: WeatherSource + Send + Sync + 'static,
    N: Connectivity + Send + Sync + 'static,
{
    /// Drives the scheduler until a stop signal arrives.
    pub async fn run(mut self, mut stop_rx: mpsc::Receiver<()>) {
        if !self.state.running_flag {
            self.on_ready().await;
        }
        let tick_period = self.settings.tick;
        let idle_period = Duration::from_millis(IDLE_TICK_MS);
        let start = tokio::time::Instant::now();

        let mut tick = interval_at(start + tick_period, tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle = interval_at(start + idle_period, idle_period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.maybe_update().await;
                    debug!("pass done, phase {:?} drift counter {}", self.phase(), self.drift_counter());
                }
                _ = idle.tick() => {
                    self.on_idle_tick(idle_period).await;
                }
                _ = stop_rx.recv() => {
                    info!("Weather polling received stop signal. Exiting.");
                    break;
                }
            }
        }
    }

    /// Spawns the polling task: settle, one forced pass, then the tick loop.
    pub fn start(mut self) -> (SchedulerHandle, watch::Receiver<WeatherState>) {
        let rx = self.subscribe();
        let (stop_tx, mut stop_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = self.on_ready() => {}
                _ = stop_rx.recv() => {
                    info!("Weather polling stopped before the first pass.");
                    return;
                }
            }
            self.run(stop_rx).await;
        });

        (
            SchedulerHandle {
                stop_sender: Some(stop_tx),
                poll_handle: Some(handle),
            },
            rx,
        )
    }
}

/// Owner side of a running scheduler task.
pub struct SchedulerHandle {
    stop_sender: Option<mpsc::Sender<()>>,
    poll_handle: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub async fn stop(&mut self) {
        if let Some(sender) = self.stop_sender.take() {
            if let Err(e) = sender.send(()).await {
                debug!("weather polling already gone: {}", e);
            }
        }
        if let Some(handle) = self.poll_handle.take() {
            handle
                .await
                .unwrap_or_else(|e| error!("Weather polling task failed to join: {}", e));
        }
        info!("Weather polling stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::error::LocationError;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Clone, Default)]
    struct FakeGps {
        fix: Arc<Mutex<Option<LocationSample>>>,
        probes: Arc<AtomicUsize>,
    }

    impl FakeGps {
        fn at(&self, lat: f64, lon: f64) {
            *self.fix.lock().unwrap() = Some(LocationSample::new(lat, lon));
        }
        fn lost(&self) {
            *self.fix.lock().unwrap() = None;
        }
    }

    impl LocationSource for FakeGps {
        async fn probe(&self) -> Result<LocationSample, LocationError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            (*self.fix.lock().unwrap()).ok_or(LocationError::Timeout(3000))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Coords(f64, f64),
        Id(String),
        Name(String),
    }

    #[derive(Clone, Default)]
    struct FakeWeather {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_status: Arc<Mutex<Option<u16>>>,
    }

    impl FakeWeather {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn respond(&self, call: Call, name: &str, lat: f64, lon: f64) -> Result<WeatherSnapshot, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            if let Some(status) = *self.fail_status.lock().unwrap() {
                return Err(FetchError::Status(status));
            }
            let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            Ok(WeatherSnapshot {
                place_name: name.to_string(),
                feels_like_celsius: 20.0,
                sky_condition: "Clouds".to_string(),
                sky_description: "broken clouds".to_string(),
                origin_lat: lat,
                origin_lon: lon,
                source: SnapshotSource::Fixed,
                fetched_at: base + chrono::Duration::seconds(calls.len() as i64),
            })
        }
    }

    impl WeatherSource for FakeWeather {
        async fn fetch_by_coordinates(&self, lat: f64, lon: f64, _lang: &str) -> Result<WeatherSnapshot, FetchError> {
            self.respond(Call::Coords(lat, lon), "Somewhere", lat, lon)
        }
        async fn fetch_by_location_id(&self, id: &str, _lang: &str) -> Result<WeatherSnapshot, FetchError> {
            self.respond(Call::Id(id.to_string()), "London", 51.51, -0.13)
        }
        async fn fetch_by_location_name(&self, name: &str, _lang: &str) -> Result<WeatherSnapshot, FetchError> {
            self.respond(Call::Name(name.to_string()), name, 53.8, -1.55)
        }
    }

    #[derive(Clone)]
    struct FakeNet(Arc<AtomicBool>);

    impl Default for FakeNet {
        fn default() -> Self {
            FakeNet(Arc::new(AtomicBool::new(true)))
        }
    }

    impl Connectivity for FakeNet {
        async fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Rig {
        gps: FakeGps,
        wx: FakeWeather,
        net: FakeNet,
        dir: TempDir,
    }

    impl Rig {
        fn new() -> Self {
            Rig {
                gps: FakeGps::default(),
                wx: FakeWeather::default(),
                net: FakeNet::default(),
                dir: TempDir::new().unwrap(),
            }
        }

        fn storage(&self) -> StorageSettings {
            StorageSettings {
                cache_path: self.dir.path().join("data.json"),
                position_path: self.dir.path().join("position.json"),
                log_dir: Some(self.dir.path().join("logs")),
                enable_log: true,
            }
        }

        fn scheduler(&self, use_fixed: bool, fixed: Option<FixedLocation>) -> FetchScheduler<FakeGps, FakeWeather, FakeNet> {
            self.scheduler_with(self.storage(), use_fixed, fixed)
        }

        fn scheduler_with(
            &self,
            storage: StorageSettings,
            use_fixed: bool,
            fixed: Option<FixedLocation>,
        ) -> FetchScheduler<FakeGps, FakeWeather, FakeNet> {
            let settings = WeatherSettings {
                api_key: "k".to_string(),
                fixed_location: fixed,
                use_fixed_location: use_fixed,
                language: "en".to_string(),
                base_url: "http://unused".to_string(),
                fetch_interval: HOUR,
                http_timeout: Duration::from_secs(5),
                settle: Duration::ZERO,
                tick: Duration::from_secs(60),
            };
            FetchScheduler::new(
                settings,
                self.gps.clone(),
                self.wx.clone(),
                self.net.clone(),
                SnapshotStore::new(&storage),
            )
        }
    }

    fn london() -> Option<FixedLocation> {
        Some(FixedLocation::Id("2643743".to_string()))
    }

    #[tokio::test]
    async fn test_fixed_first_run_fetches_by_id_once() {
        let rig = Rig::new();
        rig.gps.at(48.85, 2.35);
        let mut sched = rig.scheduler(true, london());

        sched.on_ready().await;

        assert_eq!(rig.wx.calls(), vec![Call::Id("2643743".to_string())]);
        assert_eq!(rig.gps.probes.load(Ordering::SeqCst), 0);
        assert!(!sched.is_ready_pending());
        assert!(sched.is_running());
        assert_eq!(sched.phase(), Phase::Cooling);

        let cached = SnapshotStore::new(&rig.storage()).get().unwrap().unwrap();
        assert_eq!(cached.place_name, "London");
        assert_eq!(sched.latest(), WeatherState::Ready(cached));
    }

    #[tokio::test]
    async fn test_repeat_pass_without_time_or_movement_is_idempotent() {
        let rig = Rig::new();
        rig.gps.at(51.5, -0.12);
        let mut sched = rig.scheduler(false, london());
        sched.state.last_known = LocationSample::new(51.5, -0.12);

        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;
        sched.maybe_update_at(t0).await;

        assert_eq!(rig.wx.calls().len(), 1);
        assert_eq!(rig.gps.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hard_drift_after_fixed_fetches_uses_coordinates() {
        let rig = Rig::new();
        rig.gps.at(51.500, -0.120);
        let mut sched = rig.scheduler(false, london());
        sched.state.last_known = LocationSample::new(51.500, -0.120);

        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;
        sched.maybe_update_at(t0 + HOUR).await;
        assert_eq!(rig.wx.calls(), vec![Call::Id("2643743".into()), Call::Id("2643743".into())]);

        rig.gps.at(51.512, -0.120);
        sched.maybe_update_at(t0 + HOUR + HOUR / 2).await;

        assert_eq!(rig.wx.calls().last(), Some(&Call::Coords(51.512, -0.120)));
        let snap = sched.latest().snapshot().cloned().unwrap();
        assert_eq!(snap.place_name, "Somewhere (GPS)");
        assert_eq!(snap.source, SnapshotSource::Gps);
        assert_eq!(sched.drift_counter(), 0);
        assert_eq!(sched.state.last_known, LocationSample::new(51.512, -0.120));
    }

    #[tokio::test]
    async fn test_sustained_soft_drift_trips_counter() {
        let rig = Rig::new();
        rig.gps.at(51.500, -0.120);
        let mut sched = rig.scheduler(false, london());
        sched.state.last_known = LocationSample::new(51.500, -0.120);

        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;
        assert_eq!(sched.drift_counter(), 0);

        // soft drift, no fetch, counter climbs
        rig.gps.at(51.506, -0.120);
        sched.maybe_update_at(t0 + HOUR / 2).await;
        assert_eq!(sched.drift_counter(), 1);
        assert_eq!(rig.wx.calls().len(), 1);

        // interval up, counter reaches the limit, coordinates win
        sched.maybe_update_at(t0 + HOUR).await;
        assert_eq!(rig.wx.calls().last(), Some(&Call::Coords(51.506, -0.120)));
        assert_eq!(sched.drift_counter(), 0);
    }

    #[tokio::test]
    async fn test_jitter_below_soft_threshold_leaves_counter() {
        let rig = Rig::new();
        rig.gps.at(51.500, -0.120);
        let mut sched = rig.scheduler(false, london());
        sched.state.last_known = LocationSample::new(51.500, -0.120);

        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;
        rig.gps.at(51.501, -0.121);
        sched.maybe_update_at(t0 + HOUR / 2).await;

        assert_eq!(sched.drift_counter(), 0);
        assert_eq!(rig.wx.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_first_gps_fix_fetches_by_coordinates() {
        let rig = Rig::new();
        rig.gps.at(-33.86, 151.21);
        let mut sched = rig.scheduler(false, london());

        sched.maybe_update_at(Instant::now()).await;

        assert_eq!(rig.wx.calls(), vec![Call::Coords(-33.86, 151.21)]);
    }

    #[tokio::test]
    async fn test_lost_gps_falls_back_to_city_name() {
        let rig = Rig::new();
        rig.gps.lost();
        let mut sched = rig.scheduler(false, Some(FixedLocation::Name("Leeds".to_string())));

        sched.maybe_update_at(Instant::now()).await;

        assert_eq!(rig.wx.calls(), vec![Call::Name("Leeds".to_string())]);
        assert_eq!(sched.latest().snapshot().unwrap().source, SnapshotSource::Fixed);
    }

    #[tokio::test]
    async fn test_no_fix_and_no_fixed_location_fetches_nothing() {
        let rig = Rig::new();
        rig.gps.lost();
        let mut sched = rig.scheduler(false, None);

        sched.maybe_update_at(Instant::now()).await;

        assert!(rig.wx.calls().is_empty());
        assert_eq!(sched.latest(), WeatherState::NoData);
        assert!(sched.is_ready_pending());
        assert_eq!(sched.state.last_failure, Some(FailureKind::NoLocation));
    }

    #[tokio::test]
    async fn test_http_500_keeps_snapshot_and_files() {
        let rig = Rig::new();
        let mut sched = rig.scheduler(true, london());
        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;

        let before = sched.latest();
        let cache = std::fs::read(rig.dir.path().join("data.json")).unwrap();
        let position = std::fs::read(rig.dir.path().join("position.json")).unwrap();
        let log_path = SnapshotStore::new(&rig.storage())
            .daily_log_path(chrono::Local::now().date_naive())
            .unwrap();
        let log = std::fs::read(&log_path).unwrap();

        *rig.wx.fail_status.lock().unwrap() = Some(500);
        sched.maybe_update_at(t0 + HOUR).await;

        assert_eq!(rig.wx.calls().len(), 2);
        assert_eq!(sched.latest(), before);
        assert_eq!(std::fs::read(rig.dir.path().join("data.json")).unwrap(), cache);
        assert_eq!(std::fs::read(rig.dir.path().join("position.json")).unwrap(), position);
        assert_eq!(std::fs::read(&log_path).unwrap(), log);
        assert_eq!(sched.state.last_failure, Some(FailureKind::FetchStatus));

        // bookkeeping only moves on success
        assert_eq!(sched.drift_counter(), 1);
        assert_eq!(sched.state.last_fetch_time, Some(t0));
        assert!(!sched.is_ready_pending());

        sched.maybe_update_at(t0 + HOUR + Duration::from_secs(60)).await;
        assert_eq!(rig.wx.calls().len(), 3);
        assert_eq!(sched.drift_counter(), 2);
        assert_eq!(sched.state.last_fetch_time, Some(t0));
    }

    #[tokio::test]
    async fn test_failed_first_fetch_keeps_ready_flag() {
        let rig = Rig::new();
        *rig.wx.fail_status.lock().unwrap() = Some(503);
        let mut sched = rig.scheduler(true, london());

        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;

        assert!(sched.is_ready_pending());
        assert_eq!(sched.state.last_fetch_time, None);
        assert_eq!(sched.latest(), WeatherState::NoData);

        *rig.wx.fail_status.lock().unwrap() = None;
        sched.maybe_update_at(t0 + Duration::from_secs(60)).await;
        assert!(!sched.is_ready_pending());
        assert_eq!(sched.drift_counter(), 0);
        assert_eq!(sched.state.last_failure, None);
    }

    #[tokio::test]
    async fn test_fetch_replaces_future_dated_cache() {
        let rig = Rig::new();
        let far_future = WeatherSnapshot {
            place_name: "Old Town".to_string(),
            feels_like_celsius: 3.0,
            sky_condition: "Snow".to_string(),
            sky_description: "light snow".to_string(),
            origin_lat: 51.51,
            origin_lon: -0.13,
            source: SnapshotSource::Fixed,
            fetched_at: Utc.with_ymd_and_hms(2099, 6, 1, 0, 0, 0).unwrap(),
        };
        SnapshotStore::new(&rig.storage())
            .put(&far_future, LocationSample::new(51.51, -0.13))
            .unwrap();

        let mut sched = rig.scheduler(true, london());
        assert_eq!(sched.latest(), WeatherState::Ready(far_future));

        sched.maybe_update_at(Instant::now()).await;

        assert_eq!(rig.wx.calls().len(), 1);
        assert_eq!(sched.latest().snapshot().unwrap().place_name, "London");
        let cached = SnapshotStore::new(&rig.storage()).get().unwrap().unwrap();
        assert_eq!(cached.place_name, "London");
        assert!(!sched.is_ready_pending());
    }

    #[tokio::test]
    async fn test_store_failure_still_publishes() {
        let rig = Rig::new();
        let blocker = rig.dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let storage = StorageSettings {
            cache_path: blocker.join("data.json"),
            ..rig.storage()
        };
        let mut sched = rig.scheduler_with(storage, true, london());

        sched.maybe_update_at(Instant::now()).await;

        assert_eq!(rig.wx.calls().len(), 1);
        assert_eq!(sched.latest().snapshot().unwrap().place_name, "London");
        assert_eq!(sched.state.last_failure, Some(FailureKind::PersistenceFailed));
        assert!(!sched.is_ready_pending());
    }

    #[tokio::test]
    async fn test_offline_for_full_interval_shows_no_network() {
        let rig = Rig::new();
        rig.net.0.store(false, Ordering::SeqCst);
        let mut sched = rig.scheduler(true, london());

        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;
        assert!(rig.wx.calls().is_empty());
        assert_eq!(sched.latest(), WeatherState::NoData);

        sched.maybe_update_at(t0 + HOUR).await;
        assert_eq!(sched.latest(), WeatherState::NoNetwork);

        rig.net.0.store(true, Ordering::SeqCst);
        sched.maybe_update_at(t0 + HOUR + Duration::from_secs(60)).await;
        assert_eq!(rig.wx.calls().len(), 1);
        assert!(matches!(sched.latest(), WeatherState::Ready(_)));
    }

    #[tokio::test]
    async fn test_offline_clock_runs_between_fetches() {
        let rig = Rig::new();
        let mut sched = rig.scheduler(true, london());
        let t0 = Instant::now();
        sched.maybe_update_at(t0).await;

        rig.net.0.store(false, Ordering::SeqCst);
        let mut shown_at = None;
        for minute in 10..=130u64 {
            sched.maybe_update_at(t0 + Duration::from_secs(minute * 60)).await;
            if shown_at.is_none() && sched.latest() == WeatherState::NoNetwork {
                shown_at = Some(minute);
            }
        }

        assert_eq!(shown_at, Some(70));
        assert_eq!(rig.wx.calls().len(), 1);
        assert_eq!(sched.state.last_failure, Some(FailureKind::NetworkUnavailable));
    }

    #[tokio::test]
    async fn test_restart_serves_cache_and_still_fetches() {
        let rig = Rig::new();
        {
            let mut first = rig.scheduler(false, london());
            rig.gps.at(53.8, -1.55);
            first.maybe_update_at(Instant::now()).await;
        }
        let previous = SnapshotStore::new(&rig.storage()).get().unwrap().unwrap();

        let mut second = rig.scheduler(false, london());
        assert_eq!(second.latest(), WeatherState::Ready(previous.clone()));
        assert!(second.is_ready_pending());
        assert_eq!(second.state.last_known, LocationSample::new(53.8, -1.55));

        // same spot, no drift: the forced first pass uses the fixed location
        second.maybe_update_at(Instant::now()).await;
        assert_eq!(rig.wx.calls().last(), Some(&Call::Id("2643743".into())));
        assert_ne!(second.latest(), WeatherState::Ready(previous));
    }

    #[tokio::test]
    async fn test_idle_tick_throttles_until_first_snapshot() {
        let rig = Rig::new();
        let mut sched = rig.scheduler(true, london());
        let t0 = Instant::now();

        sched.on_idle_tick_at(HOUR / 8, t0).await;
        sched.on_idle_tick_at(HOUR / 16, t0).await;
        assert_eq!(sched.phase(), Phase::Idle);
        assert!(rig.wx.calls().is_empty());

        sched.on_idle_tick_at(HOUR / 16, t0).await;
        assert_eq!(rig.wx.calls().len(), 1);

        // snapshot in hand, idle ticks no longer drive passes
        sched.on_idle_tick_at(HOUR, t0 + HOUR).await;
        assert_eq!(rig.wx.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_run_without_start_does_first_pass() {
        let rig = Rig::new();
        let sched = rig.scheduler(true, london());
        let mut rx = sched.subscribe();
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(sched.run(stop_rx));

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| matches!(s, WeatherState::Ready(_))))
            .await
            .unwrap()
            .unwrap();
        stop_tx.send(()).await.unwrap();
        task.await.unwrap();

        assert_eq!(rig.wx.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_start_publishes_then_stops() {
        let rig = Rig::new();
        let sched = rig.scheduler(true, london());
        let (mut handle, mut rx) = sched.start();

        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| matches!(s, WeatherState::Ready(_))))
            .await
            .unwrap()
            .unwrap();
        handle.stop().await;

        assert_eq!(rig.wx.calls().len(), 1);
        assert!(handle.poll_handle.is_none());
    }
}
