//! # Departure Update Loop
//!
//! Runs in the fetch context. Every cycle it asks the [`DepartureSource`] for a
//! fresh snapshot and publishes it to the [`DepartureStore`].
//!
//! ## Failure Policy
//! - Up to [`MAX_ATTEMPTS`] attempts per cycle, back to back
//! - A connection-aborted error triggers a WiFi re-association before the next
//!   attempt; failing to get the link back is fatal straight away
//! - When every attempt fails the last error is returned. The caller treats this
//!   as fatal for the process: a clean restart keeps long-uptime memory use flat,
//!   while the display keeps showing the last good snapshot until then

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::store::DepartureStore;
use crate::trains::{DepartureSource, FetchError, MAX_RESPONSE_SIZE};
use crate::wifi::{self, Link, LinkError, CONNECT_TIMEOUT};

/// Fetch attempts per update cycle.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum UpdateError {
    /// Every attempt in the cycle failed; `source` is the last failure
    #[error("departure update failed after {attempts} attempts")]
    Fetch {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    /// WiFi could not be brought back after an aborted connection
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Periodically refreshes the shared departures snapshot.
///
/// Owns the response buffer, allocated once here and lent to every fetch.
pub struct UpdateScheduler<S, L> {
    source: S,
    link: L,
    store: DepartureStore,
    interval: Duration,
    buffer: Vec<u8>,
}

impl<S: DepartureSource, L: Link> UpdateScheduler<S, L> {
    pub fn new(source: S, link: L, store: DepartureStore, interval: Duration) -> Self {
        Self::with_buffer_size(source, link, store, interval, MAX_RESPONSE_SIZE)
    }

    pub fn with_buffer_size(
        source: S,
        link: L,
        store: DepartureStore,
        interval: Duration,
        buffer_size: usize,
    ) -> Self {
        Self {
            source,
            link,
            store,
            interval,
            buffer: vec![0; buffer_size],
        }
    }

    pub fn store(&self) -> &DepartureStore {
        &self.store
    }

    /// Run one update cycle.
    pub async fn update(&mut self) -> Result<(), UpdateError> {
        let mut attempt = 1;
        loop {
            match self.source.fetch(&mut self.buffer).await {
                Ok(station) => {
                    info!(
                        station = %station.name,
                        departures = station.departures.len(),
                        "Updated departures"
                    );
                    self.store.write(station);
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %err,
                        "Train update attempt failed"
                    );

                    if err.is_connection_aborted() {
                        warn!("Connection aborted, reconnecting wifi");
                        wifi::reconnect(&self.link, CONNECT_TIMEOUT).await?;
                    }

                    if attempt >= MAX_ATTEMPTS {
                        return Err(UpdateError::Fetch {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Update forever, sleeping `interval` after every successful cycle.
    ///
    /// Only returns on a fatal [`UpdateError`].
    pub async fn run(&mut self) -> Result<(), UpdateError> {
        info!(
            interval_secs = self.interval.as_secs(),
            "Start updating departures"
        );
        loop {
            self.update().await?;
            tokio::time::sleep(self.interval).await;
        }
    }
}
