//! # Render Loop
//!
//! Runs in the render context: a dedicated thread that owns the [`Display`],
//! redraws from the [`DepartureStore`] and manages panel power.
//!
//! ## Screen States
//! ```text
//!            out of active hours
//!   Active ───────────────────────▶ EnteringSleep
//!     ▲                                   │ message, pause, clear, sleep()
//!     │ back in range: awake()            ▼
//!     └─────────────────────────────── Sleeping (polls every 10 s)
//! ```
//!
//! ## Pacing
//! Each iteration targets one frame period (`1 / refresh` seconds, or 10 s while
//! sleeping) and waits only for whatever is left after the work. The run flag is
//! checked once per iteration; the display is handed back through the thread's
//! join handle, so it can only be closed after the loop has stopped.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::display::{Display, DisplayError};
use crate::store::DepartureStore;
use crate::time_range::ActiveTime;
use crate::widgets::{MainWidget, MessageWidget};

/// Poll cadence while the panel is asleep.
pub const SLEEPING_POLL: Duration = Duration::from_secs(10);

/// How long the "going to sleep" message stays up before the panel is blanked.
pub const SLEEP_MESSAGE_PAUSE: Duration = Duration::from_secs(3);

const DISPLAY_NOT_ACTIVE: &str = "Outside active hours, going to sleep...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenState {
    Active,
    EnteringSleep,
    Sleeping,
}

/// Render loop settings derived from the display configuration.
#[derive(Clone, Copy, Debug)]
pub struct RenderSettings {
    /// Target frames per second while active
    pub refresh: f64,
    pub render_seconds: bool,
    pub active_time: Option<ActiveTime>,
}

pub struct RenderScheduler<D, C> {
    display: D,
    store: DepartureStore,
    clock: C,
    active_time: Option<ActiveTime>,
    frame_period: Duration,
    sleep_pause: Duration,
    main: MainWidget,
    going_to_sleep: MessageWidget,
    state: ScreenState,
}

impl<D: Display, C: Clock> RenderScheduler<D, C> {
    pub fn new(mut display: D, store: DepartureStore, clock: C, settings: RenderSettings) -> Self {
        display.clear(BinaryColor::Off).ok();
        let main = MainWidget::new(display.size(), settings.render_seconds);
        let frame_period = Duration::try_from_secs_f64(1.0 / settings.refresh).unwrap_or_else(|_| {
            warn!(refresh = settings.refresh, "Unusable refresh rate, pacing at the sleeping poll");
            SLEEPING_POLL
        });
        Self {
            display,
            store,
            clock,
            active_time: settings.active_time,
            frame_period,
            sleep_pause: SLEEP_MESSAGE_PAUSE,
            main,
            going_to_sleep: MessageWidget::new(DISPLAY_NOT_ACTIVE),
            state: ScreenState::Active,
        }
    }

    pub fn with_sleep_pause(mut self, pause: Duration) -> Self {
        self.sleep_pause = pause;
        self
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Run one iteration of the state machine and return the period to pace it to.
    pub fn step(&mut self) -> Result<Duration, DisplayError> {
        let now = self.clock.local_now();

        match self.state {
            ScreenState::Active => {
                if let Some(window) = &self.active_time {
                    if !window.in_range(now) {
                        self.state = ScreenState::EnteringSleep;
                        return Ok(self.frame_period);
                    }
                }

                let station = self.store.read();
                if self.main.render(&mut self.display, &station, now) {
                    self.display.flush()?;
                }
                Ok(self.frame_period)
            }
            ScreenState::EnteringSleep => {
                info!(%now, "Detected non-active time, sleeping");
                self.going_to_sleep.render(&mut self.display, None);
                self.display.flush()?;
                thread::sleep(self.sleep_pause);

                self.display.clear(BinaryColor::Off).ok();
                self.display.flush()?;
                self.display.sleep()?;
                self.state = ScreenState::Sleeping;
                Ok(self.frame_period)
            }
            ScreenState::Sleeping => match &self.active_time {
                Some(window) if !window.in_range(now) => Ok(SLEEPING_POLL),
                _ => {
                    info!(%now, "Awake from non-active time");
                    self.display.awake()?;
                    self.display.clear(BinaryColor::Off).ok();
                    self.main.reset();
                    self.state = ScreenState::Active;
                    Ok(self.frame_period)
                }
            },
        }
    }

    /// Loop until `running` is cleared or the display fails, then hand the
    /// display back.
    pub fn run(mut self, running: &AtomicBool) -> (D, Result<(), DisplayError>) {
        info!(period_ms = self.frame_period.as_millis() as u64, "Render loop started");

        let mut result = Ok(());
        while running.load(Ordering::Acquire) {
            let started = Instant::now();
            match self.step() {
                Ok(period) => {
                    if let Some(remaining) = period.checked_sub(started.elapsed()) {
                        // Woken early by RenderHandle::shutdown
                        thread::park_timeout(remaining);
                    }
                }
                Err(err) => {
                    error!(error = %err, "Display error, stopping render loop");
                    result = Err(err);
                    break;
                }
            }
        }

        info!("Render thread closing");
        (self.display, result)
    }
}

impl<D, C> RenderScheduler<D, C>
where
    D: Display + 'static,
    C: Clock + 'static,
{
    /// Move the loop onto its own thread.
    pub fn spawn(self) -> io::Result<RenderHandle<D>> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || self.run(&flag))?;
        Ok(RenderHandle { running, thread })
    }
}

/// Owner's side of a spawned render loop.
pub struct RenderHandle<D> {
    running: Arc<AtomicBool>,
    thread: JoinHandle<(D, Result<(), DisplayError>)>,
}

impl<D> RenderHandle<D> {
    /// True once the loop has stopped on its own (display failure).
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the loop, wait for it and take the display back.
    pub fn shutdown(self) -> thread::Result<(D, Result<(), DisplayError>)> {
        self.running.store(false, Ordering::Release);
        self.thread.thread().unpark();
        self.thread.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::display::tests::RecordingDisplay;
    use crate::display::DisplayProfile;
    use crate::{Departure, Station};
    use chrono::{TimeZone, Utc};

    // 2025-01-07 is a Tuesday in GMT, so UTC equals UK time
    fn tuesday(hh: u32, mm: u32, ss: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 7, hh, mm, ss).unwrap()
    }

    fn store_with(destinations: &[&str]) -> DepartureStore {
        let store = DepartureStore::new("PAD");
        store.write(Station {
            name: "London Paddington".to_string(),
            departures: destinations
                .iter()
                .map(|d| Departure {
                    destination: d.to_string(),
                    scheduled: 1015,
                    actual: 1015,
                    cancelled: false,
                    fast_train: false,
                })
                .collect(),
        });
        store
    }

    fn scheduler(
        clock: &Arc<ManualClock>,
        store: DepartureStore,
        active_time: Option<&str>,
    ) -> RenderScheduler<RecordingDisplay, Arc<ManualClock>> {
        RenderScheduler::new(
            RecordingDisplay::new(DisplayProfile::Ssd1322),
            store,
            Arc::clone(clock),
            RenderSettings {
                refresh: 10.0,
                render_seconds: true,
                active_time: active_time.map(|s| s.parse().unwrap()),
            },
        )
        .with_sleep_pause(Duration::ZERO)
    }

    #[test]
    fn flushes_only_when_something_changed() {
        let clock = Arc::new(ManualClock::new(tuesday(10, 0, 0)));
        let store = store_with(&["Reading"]);
        let mut render = scheduler(&clock, store.clone(), None);

        assert_eq!(render.step().unwrap(), Duration::from_millis(100));
        assert_eq!(render.display().count("flush"), 1);

        render.step().unwrap();
        render.step().unwrap();
        assert_eq!(render.display().count("flush"), 1);

        clock.advance(chrono::Duration::seconds(1));
        render.step().unwrap();
        assert_eq!(render.display().count("flush"), 2);

        store.write(Station::empty("London Paddington"));
        render.step().unwrap();
        assert_eq!(render.display().count("flush"), 3);
    }

    #[test]
    fn leaving_active_hours_sleeps_exactly_once() {
        let clock = Arc::new(ManualClock::new(tuesday(16, 59, 0)));
        let mut render = scheduler(&clock, store_with(&["Reading"]), Some("weekdays:0900-1700"));

        render.step().unwrap();
        assert_eq!(render.state(), ScreenState::Active);

        clock.set(tuesday(17, 1, 0));
        render.step().unwrap();
        assert_eq!(render.state(), ScreenState::EnteringSleep);

        render.step().unwrap();
        assert_eq!(render.state(), ScreenState::Sleeping);
        assert_eq!(render.display().events, ["flush", "flush", "flush", "sleep"]);
        assert_eq!(render.display().buffer.lit_pixels(), 0);

        for _ in 0..5 {
            assert_eq!(render.step().unwrap(), SLEEPING_POLL);
            clock.advance(chrono::Duration::minutes(30));
        }
        assert_eq!(render.display().count("sleep"), 1);
        assert_eq!(render.state(), ScreenState::Sleeping);
    }

    #[test]
    fn wakes_and_redraws_when_back_in_range() {
        let clock = Arc::new(ManualClock::new(tuesday(8, 0, 0)));
        let mut render = scheduler(&clock, store_with(&["Reading"]), Some("weekdays:0900-1700"));

        render.step().unwrap();
        render.step().unwrap();
        assert_eq!(render.state(), ScreenState::Sleeping);

        clock.set(tuesday(9, 0, 0));
        render.step().unwrap();
        assert_eq!(render.state(), ScreenState::Active);
        assert_eq!(render.display().count("awake"), 1);

        let flushes = render.display().count("flush");
        render.step().unwrap();
        assert_eq!(render.display().count("flush"), flushes + 1);
        assert!(render.display().buffer.lit_pixels() > 0);
    }

    #[test]
    fn unusable_refresh_rate_falls_back_to_sleeping_poll() {
        let clock = Arc::new(ManualClock::new(tuesday(10, 0, 0)));
        for refresh in [1e-30, 0.0, f64::NAN] {
            let mut render = RenderScheduler::new(
                RecordingDisplay::new(DisplayProfile::Ssd1322),
                store_with(&["Reading"]),
                Arc::clone(&clock),
                RenderSettings {
                    refresh,
                    render_seconds: false,
                    active_time: None,
                },
            );
            assert_eq!(render.step().unwrap(), SLEEPING_POLL);
        }
    }

    #[test]
    fn display_error_stops_the_loop() {
        let clock = Arc::new(ManualClock::new(tuesday(10, 0, 0)));
        let mut render = scheduler(&clock, store_with(&["Reading"]), None);
        render.display.fail_flush = true;

        let running = AtomicBool::new(true);
        let (display, result) = render.run(&running);

        assert!(matches!(result, Err(DisplayError::Io(_))));
        assert_eq!(display.count("flush"), 0);
    }

    #[test]
    fn spawned_loop_returns_display_on_shutdown() {
        let clock = Arc::new(ManualClock::new(tuesday(10, 0, 0)));
        let handle = scheduler(&clock, store_with(&["Reading", "Oxford"]), None)
            .spawn()
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        let (mut display, result) = handle.shutdown().unwrap();

        result.unwrap();
        assert!(display.count("flush") >= 1);
        display.close().unwrap();
        assert_eq!(display.events.last(), Some(&"close"));
    }
}
