//! D-RATS repeater daemon
//!
//! Opens the configured outgoing paths, accepts network and GPS clients,
//! and relays frames until interrupted.
//!
//! Usage: `rats-repeaterd [SETTINGS_FILE]`

mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rats_repeater::{listen_on, Listeners, PathSpec, Repeater, Transport};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Settings;

/// Open every configured device; bad entries are logged and skipped
async fn add_outgoing_paths(repeater: &Repeater, devices: &[(String, String)]) {
    for (dev, param) in devices {
        let spec = match PathSpec::parse(dev, param) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Invalid path {}: {}", dev, e);
                continue;
            }
        };

        match spec.open(dev).await {
            Ok(link) => {
                info!("Opened path {}", dev);
                let link: Arc<dyn Transport> = link;
                repeater.add_new_transport(link);
            }
            Err(e) => warn!("Unable to open {}: {}", dev, e),
        }
    }
}

fn periodic(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn log_status(repeater: &Repeater) {
    let paths = repeater.paths();
    info!(
        "{} paths ({}), {} GPS clients",
        paths.len(),
        paths.join(", "),
        repeater.gps_clients()
    );
    for station in repeater.stations() {
        info!(
            "  {} heard {}s ago via {}",
            station.call,
            station.last_heard.as_secs(),
            station.path.as_deref().unwrap_or("(gone)")
        );
    }
}

fn settings_location() -> anyhow::Result<PathBuf> {
    match std::env::args_os().nth(1) {
        Some(path) => Ok(PathBuf::from(path)),
        None => Settings::settings_path().context("Could not determine settings path"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rats_repeaterd=info,rats_protocol=info,rats_repeater=info,rats_rpc=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting D-RATS repeater");

    let path = settings_location()?;
    let settings = Settings::load(&path)?;
    if !path.exists() {
        match settings.save(&path) {
            Ok(()) => info!("Wrote default settings to {}", path.display()),
            Err(e) => warn!("Unable to write default settings: {:#}", e),
        }
    }
    let config_dir = path.parent().unwrap_or(Path::new("."));

    info!("Repeater id is {}", settings.id);
    let repeater = Repeater::new(settings.id.as_str(), settings.repeater_config(config_dir));
    add_outgoing_paths(&repeater, &settings.devices).await;

    let listeners = if settings.acceptnet {
        Listeners {
            data: Some(
                listen_on(settings.netport)
                    .with_context(|| format!("Unable to listen on port {}", settings.netport))?,
            ),
            gps: Some(
                listen_on(settings.gpsport)
                    .with_context(|| format!("Unable to listen on port {}", settings.gpsport))?,
            ),
        }
    } else {
        Listeners::default()
    };
    repeater.repeat(listeners)?;

    let mut id_timer = periodic(Duration::from_secs(settings.idfreq * 60));
    let mut status_timer = periodic(Duration::from_secs(settings.status_interval_secs));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Unable to wait for interrupt: {}", e);
                }
                break;
            }
            _ = next_tick(&mut id_timer) => {
                repeater.announce(&settings.id);
            }
            _ = next_tick(&mut status_timer) => {
                log_status(&repeater);
            }
        }
    }

    info!("Shutting down");
    repeater.stop().await;
    Ok(())
}
