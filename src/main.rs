//! # Train Display Application Entry Point
//!
//! Wires the library components into the running board:
//!
//! 1. Load `train-config.toml` (or `--config <path>`) and set up logging
//! 2. Create the display and show "Connecting" until the WiFi link is up
//! 3. Show "Loading train departures..." (OLED only) and fetch the first
//!    snapshot synchronously
//! 4. Hand the display to the render thread
//! 5. Keep departures fresh on the tokio runtime until Ctrl-C or a fatal error
//!
//! A fatal update error ends the process with a non-zero status; the service
//! manager restarts it, which keeps memory use flat over long uptimes.

#[cfg(test)]
mod tests;

use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use train_display_lib::{
    clock::SystemClock,
    config::{self, Config},
    display::{self, Display, DisplayProfile},
    render::{RenderHandle, RenderScheduler, RenderSettings},
    store::DepartureStore,
    trains::{make_basic_auth, DepartureFetcher, DepartureSource},
    updater::UpdateScheduler,
    widgets::MessageWidget,
    wifi::{self, Link, WpaSupplicantLink, CONNECT_TIMEOUT},
};

const WIFI_CONNECT: &str = "Connecting";
const LOADING_DEPARTURES: &str = "Loading train departures...";

/// Config file path from the command line.
fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<PathBuf> {
    let mut args = args.into_iter();
    let mut path = PathBuf::from(config::DEFAULT_PATH);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                path = args
                    .next()
                    .map(PathBuf::from)
                    .context("--config needs a path")?;
            }
            other => return Err(anyhow!("unrecognized argument {other:?}")),
        }
    }
    Ok(path)
}

/// Install the global subscriber, appending to `log_file` when configured.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Show an animated "Connecting" screen until `link` is up.
async fn wait_for_link<D: Display, L: Link>(screen: &mut D, link: &L) -> anyhow::Result<()> {
    info!("Connecting to wifi");
    let widget = MessageWidget::new(WIFI_CONNECT);
    let mut flushed = Ok(());

    wifi::wait_connected(link, CONNECT_TIMEOUT, |poll| {
        let dots = ".".repeat(poll as usize % 4);
        widget.render(&mut *screen, Some(&format!("{WIFI_CONNECT}{dots}")));
        if flushed.is_ok() {
            flushed = screen.flush();
        }
    })
    .await?;
    flushed?;

    info!("Connected!");
    Ok(())
}

/// Everything before the render thread takes over the screen.
async fn startup<D, S, L>(
    screen: &mut D,
    profile: DisplayProfile,
    link: &L,
    updater: &mut UpdateScheduler<S, L>,
) -> anyhow::Result<()>
where
    D: Display,
    S: DepartureSource,
    L: Link,
{
    wait_for_link(screen, link).await?;

    info!("Get initial train departures");
    if profile.shows_loading() {
        MessageWidget::new(LOADING_DEPARTURES).render(screen, None);
        screen.flush()?;
    }
    updater.update().await.context("initial departure update")?;
    Ok(())
}

/// Resolves once the render loop has stopped by itself.
async fn render_stopped<D>(render: &RenderHandle<D>) {
    while !render.is_finished() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let config_path = parse_args(env::args().skip(1))?;
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    init_logging(config.debug.log_file.as_deref())?;
    info!(config = %config_path.display(), "Starting...");

    // Create Tokio runtime for the fetch context
    let rt = tokio::runtime::Runtime::new()?;

    let profile = config.display.kind;
    let mut screen = display::create(profile, config.display.flip);

    let link = WpaSupplicantLink::new(config.wifi.interface.clone());
    let fetcher = DepartureFetcher::new(
        &config.rtt.endpoint,
        &config.station,
        &config.destination,
        make_basic_auth(&config.rtt.username, &config.rtt.password),
        config.min_departure_time,
    )?
    .with_slow_station(config.slow_station.clone());
    let store = DepartureStore::new(config.station.clone());
    let mut updater = UpdateScheduler::new(fetcher, link.clone(), store.clone(), config.update_interval());

    if let Err(err) = rt.block_on(startup(&mut screen, profile, &link, &mut updater)) {
        if let Err(close_err) = screen.close() {
            warn!(error = %close_err, "Failed to close display");
        }
        return Err(err);
    }

    info!("Start render loop");
    let render = RenderScheduler::new(
        screen,
        store,
        SystemClock,
        RenderSettings {
            refresh: config.display.refresh,
            render_seconds: profile.renders_seconds(),
            active_time: config.display.active_time,
        },
    )
    .spawn()
    .context("spawning render thread")?;

    let outcome = rt.block_on(async {
        tokio::select! {
            result = updater.run() => result.context("departure updates failed"),
            _ = tokio::signal::ctrl_c() => {
                info!("Keyboard interrupt!");
                Ok(())
            }
            _ = render_stopped(&render) => Err(anyhow!("render loop stopped")),
        }
    });

    info!("Main thread closing...");
    let (mut screen, rendered) = render
        .shutdown()
        .map_err(|_| anyhow!("render thread panicked"))?;
    let closed = screen.close();

    if let Err(err) = &outcome {
        error!(error = %format!("{err:#}"), "Unhandled exception!");
    }
    outcome?;
    rendered?;
    closed?;
    info!("Shutdown");
    Ok(())
}
