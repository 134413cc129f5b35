//! # Shared Departures Snapshot
//!
//! The only value shared between the fetch and render contexts. Writers publish a
//! whole new [`Station`]; readers get an `Arc` to whichever snapshot was current,
//! so a reader never sees half of one update and half of another, and the lock is
//! held only for a pointer swap or clone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::Station;

/// Mutex-guarded holder of the latest [`Station`] snapshot.
///
/// Cloning the store clones the handle, not the data.
#[derive(Clone, Debug)]
pub struct DepartureStore {
    current: Arc<Mutex<Arc<Station>>>,
}

impl DepartureStore {
    /// A store holding an empty snapshot for `name` until the first fetch lands.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            current: Arc::new(Mutex::new(Arc::new(Station::empty(name)))),
        }
    }

    /// Replace the snapshot.
    pub fn write(&self, station: Station) {
        let station = Arc::new(station);
        *self.lock() = station;
    }

    /// The snapshot current at the time of the call.
    pub fn read(&self) -> Arc<Station> {
        Arc::clone(&self.lock())
    }

    // A panicking writer can only poison the lock between two complete
    // assignments, so the guarded value is always a whole snapshot.
    fn lock(&self) -> MutexGuard<'_, Arc<Station>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Departure;
    use std::thread;

    fn station(tag: u16, count: usize) -> Station {
        Station {
            name: format!("snapshot-{tag}"),
            departures: (0..count)
                .map(|i| Departure {
                    destination: format!("dest-{tag}"),
                    scheduled: tag,
                    actual: tag,
                    cancelled: false,
                    fast_train: i % 2 == 0,
                })
                .collect(),
        }
    }

    #[test]
    fn starts_empty_with_configured_name() {
        let store = DepartureStore::new("Paddington");
        let snapshot = store.read();
        assert_eq!(snapshot.name, "Paddington");
        assert!(snapshot.departures.is_empty());
    }

    #[test]
    fn write_replaces_whole_snapshot() {
        let store = DepartureStore::new("PAD");
        store.write(station(1, 3));
        let before = store.read();
        store.write(station(2, 1));

        assert_eq!(before.departures.len(), 3);
        assert_eq!(store.read().name, "snapshot-2");
        assert_eq!(store.read().departures.len(), 1);
    }

    #[test]
    fn concurrent_readers_never_see_mixed_snapshots() {
        let store = DepartureStore::new("PAD");
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for tag in 0..500u16 {
                    store.write(station(tag, usize::from(tag % 7)));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let snapshot = store.read();
                        if let Some(tag) = snapshot.name.strip_prefix("snapshot-") {
                            let tag: u16 = tag.parse().unwrap();
                            assert_eq!(snapshot.departures.len(), usize::from(tag % 7));
                            assert!(snapshot.departures.iter().all(|d| d.scheduled == tag));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn poisoned_lock_still_serves_last_snapshot() {
        let store = DepartureStore::new("PAD");
        store.write(station(7, 2));

        let poisoner = store.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.current.lock().unwrap();
            panic!("poison the store");
        })
        .join();

        assert_eq!(store.read().name, "snapshot-7");
        store.write(station(8, 0));
        assert_eq!(store.read().name, "snapshot-8");
    }
}
