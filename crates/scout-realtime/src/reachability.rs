//! Network reachability probe.
//!
//! Periodically opens a TCP connection to the stream endpoint's host and
//! publishes the result into a `watch` channel that the supervisor observes.

use std::time::Duration;

use scout_core::errors::TransportError;
use scout_settings::ReachabilitySettings;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// TCP probe against one `host:port`.
#[derive(Clone, Debug)]
pub struct ReachabilityProbe {
    address: String,
    interval: Duration,
    timeout: Duration,
}

impl ReachabilityProbe {
    /// Probe `address` (`host:port`) every `interval`.
    pub fn new(address: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            interval,
            timeout,
        }
    }

    /// Probe the host serving `endpoint`, using the scheme's default port
    /// when none is given.
    pub fn for_endpoint(
        endpoint: &str,
        settings: &ReachabilitySettings,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(endpoint)?;
        let host = url
            .host_str()
            .ok_or(TransportError::InvalidUrl(url::ParseError::EmptyHost))?;
        let port = url
            .port_or_known_default()
            .ok_or(TransportError::InvalidUrl(url::ParseError::InvalidPort))?;
        let address = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        Ok(Self::new(
            address,
            Duration::from_millis(settings.probe_interval_ms),
            Duration::from_millis(settings.probe_timeout_ms),
        ))
    }

    /// Address being probed.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether a TCP connection succeeds within the timeout.
    pub async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(address = %self.address, error = %e, "reachability probe failed");
                false
            }
            Err(_) => {
                debug!(
                    address = %self.address,
                    timeout_ms = self.timeout.as_millis(),
                    "reachability probe timed out"
                );
                false
            }
        }
    }

    /// Probe until `cancel` fires, publishing changes into `tx`.
    ///
    /// Only transitions are sent, so receivers wake on change only.
    pub async fn run(self, tx: watch::Sender<bool>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(address = %self.address, interval_ms = self.interval.as_millis(), "reachability probe started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let reachable = tokio::select! {
                () = cancel.cancelled() => break,
                reachable = self.check() => reachable,
            };
            let changed = tx.send_if_modified(|current| {
                if *current == reachable {
                    false
                } else {
                    *current = reachable;
                    true
                }
            });
            if changed {
                if reachable {
                    info!(address = %self.address, "network reachable");
                } else {
                    warn!(address = %self.address, "network unreachable");
                }
            }
        }
        debug!("reachability probe stopped");
    }
}
