//! # WiFi Link Control
//!
//! The board talks to the network over a single WiFi interface managed by
//! `wpa_supplicant`. Two things are needed from it: knowing whether the link is
//! up, and forcing a re-association when a request dies with a connection-aborted
//! error (the usual symptom of a silently dropped association).

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// How long to wait for the link to come up, at startup and after a reconnect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum LinkError {
    /// Link did not report connected within the allowed time
    #[error("failed to connect to wifi in {} secs", .0.as_secs())]
    Timeout(Duration),

    /// Could not run the link control tool
    #[error("failed to run wpa_cli: {0}")]
    Io(#[from] io::Error),

    /// Link control tool ran but reported failure
    #[error("wpa_cli {command} failed: {output}")]
    Command { command: String, output: String },
}

/// A network link that can be queried and re-associated.
#[allow(async_fn_in_trait)]
pub trait Link {
    async fn is_connected(&self) -> Result<bool, LinkError>;

    /// Drop and re-establish the association. Returns once the request is issued;
    /// use [`wait_connected`] to wait for the link to come back.
    async fn reassociate(&self) -> Result<(), LinkError>;
}

impl<L: Link> Link for &L {
    async fn is_connected(&self) -> Result<bool, LinkError> {
        (**self).is_connected().await
    }

    async fn reassociate(&self) -> Result<(), LinkError> {
        (**self).reassociate().await
    }
}

/// Poll `link` once a second until it is connected or `timeout` elapses.
///
/// `on_poll` is called with the poll index after every unsuccessful check, which
/// the startup screen uses to animate its "Connecting" dots.
pub async fn wait_connected<L: Link + ?Sized>(
    link: &L,
    timeout: Duration,
    mut on_poll: impl FnMut(u32),
) -> Result<(), LinkError> {
    let polls = timeout.as_secs().max(1);
    for poll in 0..polls {
        if link.is_connected().await? {
            return Ok(());
        }
        on_poll(poll as u32);
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if link.is_connected().await? {
        return Ok(());
    }
    Err(LinkError::Timeout(timeout))
}

/// Re-associate and wait up to `timeout` for the link to return.
pub async fn reconnect<L: Link + ?Sized>(link: &L, timeout: Duration) -> Result<(), LinkError> {
    link.reassociate().await?;
    wait_connected(link, timeout, |_| {}).await?;
    info!("Reconnected to wifi");
    Ok(())
}

/// [`Link`] backed by `wpa_cli` talking to the local `wpa_supplicant`.
#[derive(Clone, Debug)]
pub struct WpaSupplicantLink {
    interface: String,
}

impl WpaSupplicantLink {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    async fn wpa_cli(&self, command: &str) -> Result<String, LinkError> {
        let output = Command::new("wpa_cli")
            .arg("-i")
            .arg(&self.interface)
            .arg(command)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() || stdout.trim_start().starts_with("FAIL") {
            return Err(LinkError::Command {
                command: command.to_string(),
                output: stdout.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

impl Link for WpaSupplicantLink {
    async fn is_connected(&self) -> Result<bool, LinkError> {
        let status = self.wpa_cli("status").await?;
        let state = wpa_state(&status);
        debug!(interface = %self.interface, state = ?state, "wifi status");
        Ok(state == Some("COMPLETED"))
    }

    async fn reassociate(&self) -> Result<(), LinkError> {
        info!(interface = %self.interface, "Re-associating wifi");
        self.wpa_cli("reassociate").await.map(|_| ())
    }
}

/// Extract `wpa_state` from `wpa_cli status` output.
fn wpa_state(status: &str) -> Option<&str> {
    status
        .lines()
        .find_map(|line| line.trim().strip_prefix("wpa_state="))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Link that comes up after a fixed number of status checks.
    #[derive(Default)]
    pub(crate) struct FakeLink {
        pub up_after: u32,
        pub checks: AtomicU32,
        pub reassociations: AtomicU32,
    }

    impl FakeLink {
        pub(crate) fn up_after(checks: u32) -> Self {
            Self {
                up_after: checks,
                ..Self::default()
            }
        }

        pub(crate) fn never_up() -> Self {
            Self::up_after(u32::MAX)
        }
    }

    impl Link for FakeLink {
        async fn is_connected(&self) -> Result<bool, LinkError> {
            let seen = self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(seen >= self.up_after)
        }

        async fn reassociate(&self) -> Result<(), LinkError> {
            self.reassociations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn parses_wpa_state_from_status() {
        let status = "bssid=aa:bb:cc:dd:ee:ff\nssid=home\nwpa_state=COMPLETED\nip_address=10.0.0.5\n";
        assert_eq!(wpa_state(status), Some("COMPLETED"));
        assert_eq!(wpa_state("wpa_state=SCANNING"), Some("SCANNING"));
        assert_eq!(wpa_state("Failed to connect to non-global ctrl_ifname"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connected_reports_each_failed_poll() {
        let link = FakeLink::up_after(3);
        let mut polls = Vec::new();

        wait_connected(&link, CONNECT_TIMEOUT, |i| polls.push(i))
            .await
            .unwrap();

        assert_eq!(polls, [0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connected_times_out() {
        let link = FakeLink::never_up();
        let err = wait_connected(&link, Duration::from_secs(5), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Timeout(t) if t == Duration::from_secs(5)));
        assert_eq!(link.checks.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_reassociates_then_waits() {
        let link = FakeLink::up_after(1);
        reconnect(&link, CONNECT_TIMEOUT).await.unwrap();
        assert_eq!(link.reassociations.load(Ordering::SeqCst), 1);
        assert_eq!(link.checks.load(Ordering::SeqCst), 2);
    }
}
