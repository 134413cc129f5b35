//! # Startup Sequence Tests
//!
//! Command line handling and the screens shown before the render thread starts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use train_display_lib::display::{ConsoleDisplay, DisplayProfile};
use train_display_lib::store::DepartureStore;
use train_display_lib::trains::{DepartureSource, FetchError};
use train_display_lib::updater::UpdateScheduler;
use train_display_lib::wifi::{Link, LinkError};
use train_display_lib::Station;

use crate::{parse_args, startup, wait_for_link};

/// Link that reports connected after `up_after` status checks.
struct SlowLink {
    up_after: u32,
    checks: AtomicU32,
}

impl SlowLink {
    fn new(up_after: u32) -> Self {
        Self {
            up_after,
            checks: AtomicU32::new(0),
        }
    }
}

impl Link for SlowLink {
    async fn is_connected(&self) -> Result<bool, LinkError> {
        Ok(self.checks.fetch_add(1, Ordering::SeqCst) >= self.up_after)
    }

    async fn reassociate(&self) -> Result<(), LinkError> {
        Ok(())
    }
}

/// Source that always returns the same station.
struct FixedSource(Station);

impl DepartureSource for FixedSource {
    async fn fetch(&self, _buffer: &mut [u8]) -> Result<Station, FetchError> {
        Ok(self.0.clone())
    }
}

fn frames(output: &[u8]) -> usize {
    // Each flushed frame is wrapped in two border lines
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| line.starts_with('+'))
        .count()
        / 2
}

/// No arguments means the default config file next to the binary.
#[test]
fn default_config_path() {
    assert_eq!(parse_args(Vec::new()).unwrap(), PathBuf::from("train-config.toml"));
}

/// `--config` overrides the path; a dangling flag or stray argument is rejected.
#[test]
fn config_flag_overrides_path() {
    let args = vec!["--config".to_string(), "/etc/train.toml".to_string()];
    assert_eq!(parse_args(args).unwrap(), PathBuf::from("/etc/train.toml"));

    assert!(parse_args(vec!["--config".to_string()]).is_err());
    assert!(parse_args(vec!["--stdout".to_string()]).is_err());
}

/// One "Connecting" frame is flushed per second spent waiting for the link.
#[tokio::test(start_paused = true)]
async fn connecting_screen_animates_until_link_is_up() {
    let mut screen = ConsoleDisplay::with_writer(DisplayProfile::Ssd1322, false, Vec::new());
    let link = SlowLink::new(2);

    wait_for_link(&mut screen, &link).await.unwrap();

    assert_eq!(frames(&screen.into_writer()), 2);
}

/// Startup gives up when the link never comes up.
#[tokio::test(start_paused = true)]
async fn startup_fails_without_a_link() {
    let mut screen = ConsoleDisplay::with_writer(DisplayProfile::Ssd1322, false, Vec::new());
    let link = SlowLink::new(u32::MAX);

    assert!(wait_for_link(&mut screen, &link).await.is_err());
}

/// The OLED shows a loading screen before the first fetch; e-paper skips it.
#[tokio::test]
async fn loading_screen_only_on_oled() {
    for (profile, expected_frames) in [(DisplayProfile::Ssd1322, 1), (DisplayProfile::Epd29b, 0)] {
        let mut screen = ConsoleDisplay::with_writer(profile, false, Vec::new());
        let link = SlowLink::new(0);
        let store = DepartureStore::new("PAD");
        let mut updater = UpdateScheduler::new(
            FixedSource(Station::empty("London Paddington")),
            &link,
            store.clone(),
            Duration::from_secs(60),
        );

        startup(&mut screen, profile, &&link, &mut updater).await.unwrap();

        assert_eq!(frames(&screen.into_writer()), expected_frames, "{profile}");
        assert_eq!(store.read().name, "London Paddington");
    }
}
