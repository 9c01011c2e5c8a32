//! ==============================================================================
//! report.rs - the main reporting loop
//! ==============================================================================
//!
//! purpose:
//!     the network-side half of the agent. on a fixed cadence it:
//!     1. checks the link (watchdog) - reconnects and skips the tick if down
//!     2. refreshes the bearer token when the proactive margin has elapsed
//!     3. snapshots the shared reading (abs, 2 decimal places)
//!     4. sends it through every sink if it moved by at least the tolerance
//!
//! ```text
//!     change suppression means a steady rotor costs no network traffic;
//!     `last_reading` only advances after a fully successful send, so a
//!     failed push is retried next tick with whatever the current value is.
//! ```
//!
//! failure policy:
//!     - link down          -> reconnect + fixed delay, skip the tick
//!     - auth soft failures -> logged, previous token kept, retried on the
//!                             next scheduled refresh
//!     - send failures      -> logged, last_reading NOT advanced
//!     - configuration errors surfacing mid-flight are fatal: they cannot
//!       heal on retry, so the loop stops the sampler and returns
//!
//! relationships:
//!     - reads: shared.rs (SharedReading snapshot)
//!     - uses: connectivity.rs, auth/, telemetry.rs
//!     - owns: the StopSignal trigger on fatal failure
//!
//! ==============================================================================

use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::auth::{AuthTokenManager, RefreshSchedule};
use crate::connectivity::{ConnectivityManager, LinkDriver};
use crate::error::AgentError;
use crate::shared::{SharedReading, StopSignal};
use crate::telemetry::{format_timestamp, round2, SinkSet, TelemetryMessage};

/// stop-signal poll granularity between reporting ticks
const POLL_GRANULARITY: Duration = Duration::from_millis(100);

/// reporting-side knobs, lifted out of the full config
#[derive(Debug, Clone, Copy)]
pub struct ReportSettings {
    /// minimum change (Hz) that is worth a network round trip
    pub tolerance: f64,
    /// cadence of reporting ticks
    pub report_interval: Duration,
    /// pause after a reconnect before resuming ticks
    pub reconnect_delay: Duration,
    /// per-attempt budget for the connect loop, in seconds
    pub connect_timeout_secs: u32,
}

/// what a single tick did; drives logging and `last_reading` advancement
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// link was down; reconnected and skipped the tick
    LinkDown,
    /// reading within tolerance of the last reported value
    Suppressed,
    /// all sinks accepted the reading
    Reported,
    /// at least one sink refused; reading will be retried next tick
    SendFailed,
}

/// does a new reading justify a send?
pub fn should_report(last_reading: f64, current: f64, tolerance: f64) -> bool {
    (current - last_reading).abs() >= tolerance
}

/// carries the cross-tick state the loop needs
pub struct ReportingTask<D: LinkDriver> {
    connectivity: ConnectivityManager<D>,
    auth: AuthTokenManager,
    sinks: SinkSet,
    shared: SharedReading,
    settings: ReportSettings,
    last_reading: f64,
    refresh: RefreshSchedule,
    started: Instant,
}

impl<D: LinkDriver> ReportingTask<D> {
    pub fn new(
        connectivity: ConnectivityManager<D>,
        auth: AuthTokenManager,
        sinks: SinkSet,
        shared: SharedReading,
        settings: ReportSettings,
    ) -> Self {
        // the refresh schedule exists before the first iteration so the
        // initial tick authenticates instead of reading an unset TTL
        let refresh = RefreshSchedule::new(auth.token_ttl());
        Self {
            connectivity,
            auth,
            sinks,
            shared,
            settings,
            last_reading: 0.0,
            refresh,
            started: Instant::now(),
        }
    }

    pub fn last_reading(&self) -> f64 {
        self.last_reading
    }

    /// one reporting tick. recoverable failures are absorbed here; only
    /// errors that cannot heal on retry propagate.
    pub async fn tick(&mut self) -> Result<TickOutcome, AgentError> {
        // 1. watchdog
        if !self.connectivity.is_connected() {
            warn!("[REPORT] link down, reconnecting");
            self.connectivity
                .connect(self.settings.connect_timeout_secs)
                .await;
            tokio::time::sleep(self.settings.reconnect_delay).await;
            return Ok(TickOutcome::LinkDown);
        }

        // 2. proactive token refresh, damped on failure
        let now_ms = self.started.elapsed().as_millis() as u64;
        if self.refresh.due(now_ms) {
            self.refresh.stamp(now_ms);
            match self.auth.authenticate().await {
                Ok(()) => {}
                // a broken key or malformed config never heals on retry
                Err(e @ AgentError::Config(_)) => return Err(e),
                Err(e) => warn!("[REPORT] token refresh failed, keeping previous token: {e}"),
            }
        }

        // 3. snapshot
        let snapshot = round2(self.shared.load().abs());

        // 4. change-suppressed send
        if !should_report(self.last_reading, snapshot, self.settings.tolerance) {
            return Ok(TickOutcome::Suppressed);
        }
        let message = TelemetryMessage::new(
            snapshot,
            format_timestamp(self.auth.clock().now_unix()),
        );
        match self.sinks.send_all(&message, self.auth.bearer()).await {
            Ok(()) => {
                info!("[REPORT] sent wind_speed={snapshot} at {}", message.timestamp);
                self.last_reading = snapshot;
                Ok(TickOutcome::Reported)
            }
            Err(e) => {
                warn!("[REPORT] {e}; will retry next tick");
                Ok(TickOutcome::SendFailed)
            }
        }
    }

    /// run until a fatal error. triggers the stop signal on the way out so
    /// the sampling thread can unwind; external supervision restarts us.
    pub async fn run(mut self, stop: StopSignal) -> Result<(), AgentError> {
        info!(
            "[REPORT] starting reporting loop ({} ms interval, tolerance {} Hz)",
            self.settings.report_interval.as_millis(),
            self.settings.tolerance
        );
        let mut next_tick = Instant::now();
        loop {
            if stop.is_triggered() {
                info!("[REPORT] stop signal observed, exiting");
                return Ok(());
            }
            if Instant::now() >= next_tick {
                next_tick += self.settings.report_interval;
                if let Err(e) = self.tick().await {
                    error!("[REPORT] fatal: {e}");
                    stop.trigger();
                    return Err(e);
                }
            }
            tokio::time::sleep(POLL_GRANULARITY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtSigner;
    use crate::config::AuthSettings;
    use crate::sim::SimulatedLink;
    use crate::telemetry::FirebaseSink;

    struct FixedSigner;
    impl JwtSigner for FixedSigner {
        fn sign(&self, _digest: &[u8; 32]) -> Result<Vec<u8>, AgentError> {
            Ok(vec![1; 8])
        }
    }

    fn offline_auth() -> AuthTokenManager {
        // zero retry budgets and lenient clock keep every auth path local
        AuthTokenManager::new(
            &AuthSettings {
                lenient_clock: true,
                ntp_attempts: 0,
                exchange_attempts: 0,
                ..AuthSettings::default()
            },
            Box::new(FixedSigner),
        )
    }

    fn task(link: SimulatedLink) -> ReportingTask<SimulatedLink> {
        ReportingTask::new(
            ConnectivityManager::new(link, "ssid", "psk"),
            offline_auth(),
            SinkSet {
                // closed port: any send attempt fails fast at the transport
                firebase: FirebaseSink::from_url("http://127.0.0.1:9/wind.json".into()),
                pubsub: None,
            },
            SharedReading::new(),
            ReportSettings {
                tolerance: 0.05,
                report_interval: Duration::from_millis(10),
                reconnect_delay: Duration::from_millis(1),
                connect_timeout_secs: 1,
            },
        )
    }

    #[test]
    fn suppression_threshold_matches_the_tolerance() {
        assert!(!should_report(10.00, 10.03, 0.05));
        assert!(should_report(10.00, 10.06, 0.05));
        assert!(should_report(10.00, 10.05, 0.05)); // boundary counts
        assert!(should_report(10.06, 10.0, 0.05)); // works in both directions
    }

    #[tokio::test(start_paused = true)]
    async fn down_link_skips_the_tick_and_reconnects() {
        let mut link = SimulatedLink::up_after(0);
        link.force_down();
        let mut t = task(link);
        assert_eq!(t.tick().await.unwrap(), TickOutcome::LinkDown);
        // next tick proceeds past the watchdog
        t.shared.store(0.0);
        assert_eq!(t.tick().await.unwrap(), TickOutcome::Suppressed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_does_not_advance_the_baseline() {
        let mut t = task(SimulatedLink::up_after(0));
        t.shared.store(5.0);
        assert_eq!(t.tick().await.unwrap(), TickOutcome::SendFailed);
        assert_eq!(t.last_reading(), 0.0, "baseline must not move on failure");
        // the same value is attempted again next tick
        assert_eq!(t.tick().await.unwrap(), TickOutcome::SendFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_reading_is_suppressed() {
        let mut t = task(SimulatedLink::up_after(0));
        t.shared.store(0.02); // within 0.05 of the 0.0 baseline
        assert_eq!(t.tick().await.unwrap(), TickOutcome::Suppressed);
    }
}
