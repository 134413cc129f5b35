//! # Configuration Management
//!
//! Loads the board's settings from `train-config.toml`: which journey to show,
//! RTT credentials, the WiFi interface and the display options.
//!
//! Unlike most settings files there is no useful fallback: without credentials
//! and a station pair the board cannot show anything, so a missing or invalid
//! file is an error.
//!
//! ## Example
//! ```toml
//! station = "PAD"
//! destination = "RDG"
//! min_departure_time = 5
//!
//! [rtt]
//! username = "rttapi_user"
//! password = "secret"
//! update_interval = 60
//!
//! [display]
//! kind = "ssd1322"
//! refresh = 10
//! active_time = "weekdays:0600-2300"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::display::DisplayProfile;
use crate::time_range::ActiveTime;
use crate::trains::RTT_ENDPOINT;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_PATH: &str = "train-config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    /// File missing or unreadable
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML, or a field has the wrong type or format
    #[error("invalid config file format: {0}")]
    Parse(#[from] toml::de::Error),

    /// Well-formed but out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration loaded from `train-config.toml`
#[derive(Debug, Deserialize)]
pub struct Config {
    /// CRS code of the station to show departures from (e.g. "PAD")
    pub station: String,
    /// CRS code the services must call at
    pub destination: String,
    /// Hide services leaving sooner than this many minutes from now
    #[serde(default)]
    pub min_departure_time: u32,
    /// Services that skip this CRS are marked as fast trains
    #[serde(default)]
    pub slow_station: Option<String>,
    pub rtt: RttConfig,
    #[serde(default)]
    pub wifi: WifiConfig,
    pub display: DisplayConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Realtime Trains API access
#[derive(Debug, Deserialize)]
pub struct RttConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Seconds between departure updates
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct WifiConfig {
    /// Interface managed by wpa_supplicant
    #[serde(default = "default_interface")]
    pub interface: String,
}

#[derive(Debug, Deserialize)]
pub struct DisplayConfig {
    pub kind: DisplayProfile,
    /// Target frames per second
    #[serde(default = "default_refresh")]
    pub refresh: f64,
    /// Rotate the picture 180°
    #[serde(default)]
    pub flip: bool,
    /// When set, the display sleeps outside this window
    #[serde(default)]
    pub active_time: Option<ActiveTime>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DebugConfig {
    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_endpoint() -> String {
    RTT_ENDPOINT.to_string()
}

fn default_update_interval() -> u64 {
    60
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_refresh() -> f64 {
    10.0
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
        }
    }
}

impl Config {
    /// Load configuration from `train-config.toml`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_PATH)
    }

    /// Load and validate configuration from `path`
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = contents.parse()?;
        info!(
            path = %path.display(),
            station = %config.station,
            destination = %config.destination,
            display = %config.display.kind,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.rtt.update_interval)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let crs = |name: &str, value: &str| {
            if value.len() == 3 && value.chars().all(|c| c.is_ascii_alphanumeric()) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be a 3-letter CRS code, got {value:?}")))
            }
        };
        crs("station", &self.station)?;
        crs("destination", &self.destination)?;
        if let Some(slow) = &self.slow_station {
            crs("slow_station", slow)?;
        }

        if self.rtt.update_interval == 0 {
            return Err(ConfigError::Invalid("rtt.update_interval must be > 0".to_string()));
        }
        let refresh = self.display.refresh;
        if !(refresh.is_finite() && refresh > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "display.refresh must be > 0, got {refresh}"
            )));
        }
        if Duration::try_from_secs_f64(1.0 / refresh).is_err() {
            return Err(ConfigError::Invalid(format!(
                "display.refresh {refresh} is too small for a frame period"
            )));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_range::Days;
    use std::io::Write;

    const MINIMAL: &str = r#"
station = "PAD"
destination = "RDG"

[rtt]
username = "user"
password = "pass"

[display]
kind = "epd29b"
"#;

    fn with_minimal(replace: &str, by: &str) -> String {
        assert!(MINIMAL.contains(replace));
        MINIMAL.replace(replace, by)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = MINIMAL.parse().unwrap();
        assert_eq!(config.station, "PAD");
        assert_eq!(config.min_departure_time, 0);
        assert_eq!(config.slow_station, None);
        assert_eq!(config.rtt.endpoint, RTT_ENDPOINT);
        assert_eq!(config.update_interval(), Duration::from_secs(60));
        assert_eq!(config.wifi.interface, "wlan0");
        assert_eq!(config.display.kind, DisplayProfile::Epd29b);
        assert_eq!(config.display.refresh, 10.0);
        assert!(!config.display.flip);
        assert!(config.display.active_time.is_none());
        assert!(config.debug.log_file.is_none());
    }

    #[test]
    fn test_full_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
station = "PAD"
destination = "RDG"
min_departure_time = 5
slow_station = "TWY"

[rtt]
endpoint = "http://proxy.local:8080/json"
username = "user"
password = "pass"
update_interval = 30

[wifi]
interface = "wlan1"

[display]
kind = "ssd1322"
refresh = 0.5
flip = true
active_time = "weekdays:0600-2300"

[debug]
log_file = "debug.txt"
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.min_departure_time, 5);
        assert_eq!(config.slow_station.as_deref(), Some("TWY"));
        assert_eq!(config.rtt.endpoint, "http://proxy.local:8080/json");
        assert_eq!(config.update_interval(), Duration::from_secs(30));
        assert_eq!(config.wifi.interface, "wlan1");
        assert_eq!(config.display.kind, DisplayProfile::Ssd1322);
        assert_eq!(config.display.refresh, 0.5);
        assert!(config.display.flip);
        assert_eq!(config.display.active_time.unwrap().days(), Days::Weekdays);
        assert_eq!(config.debug.log_file, Some(PathBuf::from("debug.txt")));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let err = Config::load_from_path("/nonexistent/train-config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_rejects_bad_station_codes() {
        let err = with_minimal(r#"station = "PAD""#, r#"station = "PADD""#)
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = with_minimal(r#"destination = "RDG""#, r#"destination = """#)
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_out_of_range_numbers() {
        let err = with_minimal(r#"password = "pass""#, "password = \"pass\"\nupdate_interval = 0")
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = with_minimal(r#"kind = "epd29b""#, "kind = \"epd29b\"\nrefresh = 0")
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = with_minimal(r#"destination = "RDG""#, "destination = \"RDG\"\nmin_departure_time = -1")
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_refresh_must_give_a_representable_frame_period() {
        let err = with_minimal(r#"kind = "epd29b""#, "kind = \"epd29b\"\nrefresh = 1e-30")
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = with_minimal(r#"kind = "epd29b""#, "kind = \"epd29b\"\nrefresh = 0.001")
            .parse::<Config>()
            .unwrap();
        assert_eq!(config.display.refresh, 0.001);
    }

    #[test]
    fn test_rejects_unknown_display_and_bad_active_time() {
        let err = with_minimal(r#"kind = "epd29b""#, r#"kind = "st7789""#)
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = with_minimal(r#"kind = "epd29b""#, "kind = \"epd29b\"\nactive_time = \"often\"")
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_credentials_fail_to_parse() {
        let err = with_minimal("username = \"user\"\n", "")
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
