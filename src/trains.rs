//! # RTT Departure Fetching
//!
//! Turns one Realtime Trains search (`/search/{station}/to/{destination}`) into a
//! [`Station`] snapshot ready for the display.
//!
//! ## Data Processing Pipeline
//! 1. **Fetch**: GET through [`HttpClient`] into the caller's pre-allocated buffer
//! 2. **Decode**: `serde_json` straight from the borrowed body; `services: null`
//!    means "no services"
//! 3. **Map**: each service becomes a [`Departure`] (destinations comma-joined,
//!    realtime estimate when reported)
//! 4. **Filter**: with a minimum lead time, services leaving too soon are dropped
//!
//! ## Date Wrap
//! RTT only reports the date the service left its origin (`runDate`). A service
//! that leaves its origin at 23:50 and reaches this station at 00:10 therefore has
//! a station time that looks earlier than its origin time. When that happens the
//! departure is moved to the next day. Services are assumed to run for less than
//! 24 hours.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::IgnoredAny;
use serde::Deserialize;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::http::{HttpClient, HttpError};
use crate::{Departure, Station};

/// Public RTT JSON API.
pub const RTT_ENDPOINT: &str = "https://api.rtt.io/api/v1/json";

/// Timeout applied to each network step of a departures request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of the pre-allocated response buffer.
pub const MAX_RESPONSE_SIZE: usize = 40 * 1024;

/// Errors from a single departures fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport failure, passed through unchanged
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The API answered with something other than 200
    #[error("error getting departures: HTTP {0}")]
    Status(u16),

    /// Body was not valid JSON of the expected shape
    #[error("invalid departures JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// JSON decoded but a field held an unusable value
    #[error("unexpected departures data: {0}")]
    Shape(String),
}

impl FetchError {
    pub fn is_connection_aborted(&self) -> bool {
        matches!(self, FetchError::Http(e) if e.is_connection_aborted())
    }
}

/// Encode `username:password` for an `Authorization: Basic` header.
///
/// ```
/// use train_display_lib::trains::make_basic_auth;
///
/// assert_eq!(make_basic_auth("user", "pass"), "dXNlcjpwYXNz");
/// ```
pub fn make_basic_auth(username: &str, password: &str) -> String {
    STANDARD.encode(format!("{username}:{password}"))
}

/// Anything that can produce a fresh [`Station`] snapshot.
///
/// The update loop is written against this trait so its retry policy can be
/// exercised without a network.
#[allow(async_fn_in_trait)]
pub trait DepartureSource {
    /// Fetch a snapshot, using `buffer` for the response body.
    async fn fetch(&self, buffer: &mut [u8]) -> Result<Station, FetchError>;
}

impl<S: DepartureSource> DepartureSource for &S {
    async fn fetch(&self, buffer: &mut [u8]) -> Result<Station, FetchError> {
        (**self).fetch(buffer).await
    }
}

/// Fetches departures for one station/destination pair from RTT.
pub struct DepartureFetcher<C = SystemClock> {
    client: HttpClient,
    url: String,
    auth: String,
    min_departure_time: u32,
    slow_station: Option<String>,
    clock: C,
}

impl DepartureFetcher<SystemClock> {
    /// `auth` is the token from [`make_basic_auth`]; `min_departure_time` is the
    /// minimum lead time in minutes (0 disables the filter).
    pub fn new(
        endpoint: &str,
        station: &str,
        destination: &str,
        auth: String,
        min_departure_time: u32,
    ) -> Result<Self, HttpError> {
        Ok(Self {
            client: HttpClient::new()?,
            url: format!(
                "{}/search/{}/to/{}",
                endpoint.trim_end_matches('/'),
                station,
                destination
            ),
            auth,
            min_departure_time,
            slow_station: None,
            clock: SystemClock,
        })
    }
}

impl<C: Clock> DepartureFetcher<C> {
    /// Mark services that do not call at `station` as fast trains.
    pub fn with_slow_station(mut self, station: Option<String>) -> Self {
        self.slow_station = station;
        self
    }

    pub fn with_clock<C2: Clock>(self, clock: C2) -> DepartureFetcher<C2> {
        DepartureFetcher {
            client: self.client,
            url: self.url,
            auth: self.auth,
            min_departure_time: self.min_departure_time,
            slow_station: self.slow_station,
            clock,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl<C: Clock> DepartureSource for DepartureFetcher<C> {
    async fn fetch(&self, buffer: &mut [u8]) -> Result<Station, FetchError> {
        let response = self
            .client
            .get(&self.url, Some(&self.auth), REQUEST_TIMEOUT, Some(buffer))
            .await?;
        if response.status != 200 {
            return Err(FetchError::Status(response.status));
        }

        parse_departures(
            &response.body,
            self.min_departure_time,
            self.clock.local_now(),
            self.slow_station.as_deref(),
        )
    }
}

// -- RTT response shape (only the fields we use) --

#[derive(Deserialize)]
struct SearchResponse {
    location: LocationName,
    #[serde(default)]
    services: Option<Vec<Service>>,
}

#[derive(Deserialize)]
struct LocationName {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Service {
    location_detail: LocationDetail,
    run_date: String,
    /// Added by the companion proxy: CRS codes of every calling point
    #[serde(default)]
    calling_at: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationDetail {
    destination: Vec<Description>,
    gbtt_booked_departure: String,
    #[serde(default)]
    origin: Vec<OriginTime>,
    /// Any non-null value marks the service cancelled; the code itself is not inspected
    #[serde(default)]
    cancel_reason_code: Option<IgnoredAny>,
    #[serde(default)]
    realtime_departure: Option<String>,
}

#[derive(Deserialize)]
struct Description {
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OriginTime {
    public_time: Option<String>,
}

/// Decode an RTT search response into a [`Station`].
///
/// `now` is the current UK wall time, only consulted when
/// `min_departure_time > 0`. A service is kept when it departs at least
/// `min_departure_time` minutes after `now`.
pub fn parse_departures(
    body: &[u8],
    min_departure_time: u32,
    now: NaiveDateTime,
    slow_station: Option<&str>,
) -> Result<Station, FetchError> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    let services = response.services.unwrap_or_default();

    let mut departures = Vec::with_capacity(services.len());
    for service in services {
        let detail = &service.location_detail;

        let destination = detail
            .destination
            .iter()
            .map(|d| d.description.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let scheduled = parse_hhmm(&detail.gbtt_booked_departure)?;
        let realtime = detail
            .realtime_departure
            .as_deref()
            .map(parse_hhmm)
            .transpose()?;
        let cancelled = detail.cancel_reason_code.is_some();

        if min_departure_time > 0 {
            let departs = service_departure(&service, scheduled, realtime, cancelled)?;
            let earliest = now + chrono::Duration::minutes(i64::from(min_departure_time));
            if earliest > departs {
                continue;
            }
        }

        let fast_train = match (slow_station, &service.calling_at) {
            (Some(slow), Some(calls)) => !calls.iter().any(|crs| crs.eq_ignore_ascii_case(slow)),
            _ => false,
        };

        departures.push(Departure {
            destination,
            scheduled,
            actual: realtime.unwrap_or(scheduled),
            cancelled,
            fast_train,
        });
    }

    Ok(Station {
        name: response.location.name,
        departures,
    })
}

/// Full departure instant for a decoded service, corrected for date wrap.
///
/// Cancelled services are placed at their last realtime estimate when RTT
/// reports one.
fn service_departure(
    service: &Service,
    scheduled: u16,
    realtime: Option<u16>,
    cancelled: bool,
) -> Result<NaiveDateTime, FetchError> {
    let run_date = NaiveDate::parse_from_str(&service.run_date, "%Y-%m-%d")
        .map_err(|_| FetchError::Shape(format!("bad runDate {:?}", service.run_date)))?;

    let origin = service
        .location_detail
        .origin
        .first()
        .and_then(|o| o.public_time.as_deref())
        .ok_or_else(|| FetchError::Shape("service has no origin publicTime".to_string()))?;
    let origin = parse_hhmm(origin)?;

    let departure = match (cancelled, realtime) {
        (true, Some(realtime)) => realtime,
        _ => scheduled,
    };
    Ok(effective_departure(run_date, departure, origin))
}

/// Combine a run date and station time into a full instant.
///
/// If the station time is earlier than the origin time on the same run date the
/// service crossed midnight on the way, so the departure is the following day.
pub fn effective_departure(run_date: NaiveDate, departure_hhmm: u16, origin_hhmm: u16) -> NaiveDateTime {
    let at = |hhmm: u16| {
        run_date.and_time(NaiveTime::MIN)
            + chrono::Duration::hours(i64::from(hhmm / 100))
            + chrono::Duration::minutes(i64::from(hhmm % 100))
    };

    let departs = at(departure_hhmm);
    if departs < at(origin_hhmm) {
        departs + chrono::Duration::hours(24)
    } else {
        departs
    }
}

fn parse_hhmm(value: &str) -> Result<u16, FetchError> {
    let bad = || FetchError::Shape(format!("bad HHMM time {value:?}"));
    if value.len() != 4 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let hhmm: u16 = value.parse().map_err(|_| bad())?;
    if hhmm / 100 > 23 || hhmm % 100 > 59 {
        return Err(bad());
    }
    Ok(hhmm)
}
