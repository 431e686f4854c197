/*
 *  main.rs
 *
 *  wxfresh - weather that keeps up
 *	(c) 2020-26 Stuart Hunter
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

use anyhow::Context;
use env_logger::Env;
use log::info;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

mod config;
mod constants;
mod display;
mod error;
mod location;
mod netcheck;
mod scheduler;
mod snapshot;
mod store;
mod weather;

use display::WeatherDisplay;
use location::GpsdLocation;
use netcheck::TcpConnectivity;
use scheduler::FetchScheduler;
use snapshot::WeatherState;
use store::SnapshotStore;
use weather::OpenWeatherClient;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
async fn signal_handler() -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

/// Redraw cadence: picks up whatever the scheduler last published.
async fn display_loop(display: &mut WeatherDisplay, mut weather_rx: watch::Receiver<WeatherState>, refresh: Duration) {
    let mut ticker = tokio::time::interval(refresh);
    loop {
        ticker.tick().await;
        let state = weather_rx.borrow_and_update().clone();
        if !display.has_changed(&state) {
            continue;
        }
        display.update(&state);
        let line = display
            .labels()
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(" | ");
        info!("{}", line);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::load().context("unable to load configuration")?;

    env_logger::Builder::from_env(Env::default().default_filter_or(settings.log_level.as_str()))
        .format_timestamp_secs()
        .init();

    info!("{} - weather that keeps up", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let wx = &settings.weather;
    match (&wx.fixed_location, wx.use_fixed_location) {
        (Some(fixed), true) => info!("Fixed location mode, {}", fixed),
        (Some(fixed), false) => info!("GPS via {}:{}, falling back to {}", settings.gps.host, settings.gps.port, fixed),
        (None, _) => info!("GPS via {}:{}, no fallback location", settings.gps.host, settings.gps.port),
    }

    let gps = GpsdLocation::new(&settings.gps.host, settings.gps.port, settings.gps.timeout);
    let client = OpenWeatherClient::new(&wx.base_url, &wx.api_key, wx.http_timeout)
        .context("unable to build weather client")?;
    let network = TcpConnectivity::new(&settings.network.host, settings.network.port, settings.network.timeout);
    let store = SnapshotStore::new(&settings.storage);

    let scheduler = FetchScheduler::new(wx.clone(), gps, client, network, store);
    let (mut polling, weather_rx) = scheduler.start();

    let mut display = WeatherDisplay::new(settings.display.clone());
    let result = tokio::select! {
        r = signal_handler() => r,
        _ = display_loop(&mut display, weather_rx, settings.display.refresh) => Ok(()),
    };

    polling.stop().await;
    display.clear();
    info!("Display cleared. Goodbye.");

    result
}
