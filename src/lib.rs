//! # Train Display Core Library
//!
//! This library provides the data-acquisition and rendering engine for a small
//! live departure board: it fetches the next trains between two stations from the
//! Realtime Trains (RTT) API and keeps a bitmap display up to date with them.
//! It is designed for long uptimes on a small board (Raspberry Pi Zero class)
//! talking over an unreliable WiFi link.
//!
//! ## Design Philosophy
//!
//! ### Memory Efficiency
//! - **Pre-allocated receive buffer**: HTTP responses are read into a single 40 KiB
//!   buffer allocated once at startup and reused for every fetch
//! - **Bounded protocol parsing**: header lines and header blocks have hard size limits
//! - **Whole-snapshot replacement**: a fetch produces a new [`Station`]; readers swap
//!   an `Arc`, nothing is patched in place
//!
//! ### Execution Contexts
//! Two long-running loops share one value:
//! 1. **Fetch context** ([`updater::UpdateScheduler`]): async, runs on tokio, owns the
//!    network buffer, retries and reconnects, writes the [`store::DepartureStore`]
//! 2. **Render context** ([`render::RenderScheduler`]): a dedicated thread that owns
//!    the display, reads the store, redraws only when something changed and puts the
//!    panel to sleep outside the configured active hours
//!
//! ## Core Types
//!
//! - [`Departure`]: the display-relevant fields of one service
//! - [`Station`]: a named, ordered snapshot of departures

pub mod clock;
pub mod config;
pub mod display;
pub mod http;
pub mod render;
pub mod store;
pub mod time_range;
pub mod trains;
pub mod updater;
pub mod widgets;
pub mod wifi;

/// One train service as shown on a departure row.
///
/// Times are stored as `HHMM` integers (`0` to `2359`), exactly as the RTT API
/// reports them, which keeps a departure to a few dozen bytes plus its label.
///
/// # Example
/// ```
/// use train_display_lib::Departure;
///
/// let departure = Departure {
///     destination: "Reading".to_string(),
///     scheduled: 1012,
///     actual: 1015,
///     cancelled: false,
///     fast_train: false,
/// };
///
/// assert!(departure.is_delayed());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Departure {
    /// Destination label, comma-joined when a service splits
    pub destination: String,
    /// Booked departure time at the queried station (HHMM)
    pub scheduled: u16,
    /// Realtime estimate, or the booked time when no estimate exists (HHMM)
    pub actual: u16,
    /// Whether the service is cancelled at this station
    pub cancelled: bool,
    /// Whether the service skips the configured slow station
    pub fast_train: bool,
}

impl Departure {
    /// True when the realtime estimate differs from the booked time.
    pub fn is_delayed(&self) -> bool {
        self.scheduled != self.actual
    }
}

/// A complete departures snapshot for one station/destination pair.
///
/// Departures keep the order the API returned them in. An empty list is a valid
/// snapshot meaning "no suitable departures", which is different from a failed
/// fetch (that leaves the previous snapshot in place).
///
/// # Example
/// ```
/// use train_display_lib::Station;
///
/// let station = Station::empty("PAD");
/// assert_eq!(station.name, "PAD");
/// assert!(station.departures.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Station {
    /// Display name of the station
    pub name: String,
    /// Departures in API order
    pub departures: Vec<Departure>,
}

impl Station {
    /// A snapshot with no departures, used before the first successful fetch.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            departures: Vec::new(),
        }
    }
}

/// Format an `HHMM` integer as `HH:MM`.
///
/// ```
/// assert_eq!(train_display_lib::format_hhmm(905), "09:05");
/// ```
pub fn format_hhmm(hhmm: u16) -> String {
    format!("{:02}:{:02}", hhmm / 100, hhmm % 100)
}
