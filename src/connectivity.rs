//! ==============================================================================
//! connectivity.rs - link driver seam, connect loop, and retry policy
//! ==============================================================================
//!
//! purpose:
//!     the agent is an always-on device: losing the link must never kill it,
//!     only pause reporting. this module owns the connect/maintain/watchdog
//!     logic over an abstract link driver (the real radio internals live
//!     outside the crate, behind `LinkDriver`).
//!
//! relationships:
//!     - used by: report.rs (watchdog check each tick, reconnect on loss)
//!     - implemented by: sim.rs (SimulatedLink, for local dev and tests)
//!
//! ==============================================================================

use std::time::Duration;

use log::{info, warn};

/// link-layer state as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// external radio/WiFi driver seam
pub trait LinkDriver: Send {
    /// bring the interface up (idempotent)
    fn activate(&mut self);
    /// issue an asynchronous connect request
    fn request_connect(&mut self, ssid: &str, psk: &str);
    /// non-blocking status query
    fn status(&mut self) -> LinkStatus;
}

/// bounded-backoff policy: how long to wait between attempts and whether
/// the attempt count is capped. `max_attempts: None` means retry forever,
/// which is intentional for the connect loop on an always-on device.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn bounded(attempts: u32, interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: Some(attempts),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// is attempt number `attempt` (zero-based) still within budget?
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// owns the link driver plus the credentials, and runs the connect loop
pub struct ConnectivityManager<D: LinkDriver> {
    driver: D,
    ssid: String,
    psk: String,
}

impl<D: LinkDriver> ConnectivityManager<D> {
    pub fn new(driver: D, ssid: impl Into<String>, psk: impl Into<String>) -> Self {
        Self {
            driver,
            ssid: ssid.into(),
            psk: psk.into(),
        }
    }

    /// connect and wait until the link is up.
    ///
    /// each inner attempt polls status once per second for up to
    /// `timeout_secs`; the outer loop repeats whole attempts until the link
    /// comes up. there is deliberately no total bound: an always-on device
    /// has nothing better to do than keep trying.
    pub async fn connect(&mut self, timeout_secs: u32) {
        loop {
            info!("[LINK] connecting to '{}'...", self.ssid);
            self.driver.activate();
            self.driver.request_connect(&self.ssid, &self.psk);

            let mut remaining = timeout_secs;
            while remaining > 0 {
                match self.driver.status() {
                    LinkStatus::Connected => {
                        info!("[LINK] connected");
                        return;
                    }
                    LinkStatus::Failed => {
                        warn!("[LINK] connect attempt failed, retrying");
                        break;
                    }
                    LinkStatus::Idle | LinkStatus::Connecting => {}
                }
                remaining -= 1;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            if self.driver.status() == LinkStatus::Connected {
                info!("[LINK] connected");
                return;
            }
            warn!("[LINK] no link after {timeout_secs}s, starting over");
        }
    }

    /// watchdog query used by the reporting loop before every tick
    pub fn is_connected(&mut self) -> bool {
        self.driver.status() == LinkStatus::Connected
    }
}
