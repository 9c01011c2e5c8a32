//! ==============================================================================
//! main.rs - agent entry point
//! ==============================================================================
//!
//! purpose:
//!     wires config -> shared context -> sampling thread -> reporting loop.
//!
//! responsibilities:
//!     - load agent.toml and initialize logging
//!     - auto-tune the hysteresis thresholds when config leaves them unset
//!     - spawn the sampling loop on a blocking thread
//!     - bring the link up, then run the reporting loop on this task
//!     - on fatal failure: trigger the stop signal, wait for the sampler
//!       to unwind, exit nonzero (external supervision restarts us)
//!
//! hardware note:
//!     this binary wires the simulated sensor and link from sim.rs so the
//!     full pipeline runs on a desk. a device build supplies its own
//!     SampleSource and LinkDriver implementations at the same two seams.
//!
//! ==============================================================================

use std::time::Duration;

use anyhow::Result;
use env_logger::Env;
use log::{error, info, warn};

use anemo_agent::auth::jwt::{JwtSigner, RsaComponentsSigner};
use anemo_agent::auth::AuthTokenManager;
use anemo_agent::config::AgentConfig;
use anemo_agent::connectivity::ConnectivityManager;
use anemo_agent::freq::FrequencyEstimator;
use anemo_agent::report::{ReportSettings, ReportingTask};
use anemo_agent::sampling::{self, Thresholds};
use anemo_agent::sensor::SampleSource;
use anemo_agent::sim::{SimulatedAnemometer, SimulatedLink};
use anemo_agent::smoothing::WindowSmoother;
use anemo_agent::telemetry::{FirebaseSink, PubSubSink, SinkSet};
use anemo_agent::AgentContext;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load_or_default();
    env_logger::Builder::from_env(Env::default().default_filter_or(&config.logging.level)).init();

    info!("===========================================================");
    info!("  anemo-agent - anemometer telemetry agent");
    info!("===========================================================");
    config.log_summary();

    let ctx = AgentContext::new();

    // ==========================================================================
    // sensor side
    // ==========================================================================

    let mut source: Box<dyn SampleSource> =
        Box::new(SimulatedAnemometer::new(config.sim.start_frequency_hz));

    let thresholds = match (config.sensor.high_threshold, config.sensor.low_threshold) {
        (Some(high), Some(low)) => Thresholds { high, low },
        _ => {
            info!("[STARTUP] auto-tuning thresholds from ambient noise...");
            let duration = Duration::from_millis(config.sensor.calibration_ms);
            let period = Duration::from_millis(config.sensor.sample_period_ms);
            let margin = config.sensor.calibration_margin;
            let (returned, tuned) = tokio::task::spawn_blocking(move || {
                let mut s = source;
                let t = sampling::calibrate_thresholds(s.as_mut(), duration, period, margin);
                (s, t)
            })
            .await?;
            source = returned;
            tuned
        }
    };

    let estimator =
        FrequencyEstimator::new(thresholds.high, thresholds.low, config.sensor.timeout_ms)?;
    let smoother = WindowSmoother::new(config.sensor.smoothing_window)?;

    let sampler = {
        let shared = ctx.shared.clone();
        let stop = ctx.stop.clone();
        let period = Duration::from_millis(config.sensor.sample_period_ms);
        tokio::task::spawn_blocking(move || {
            sampling::run_sampling_loop(source, estimator, smoother, shared, stop, period)
        })
    };
    info!("[STARTUP] sampling task running");

    // ==========================================================================
    // network side
    // ==========================================================================

    let mut connectivity = ConnectivityManager::new(
        SimulatedLink::up_after(1),
        config.network.ssid.clone(),
        config.network.psk.clone(),
    );
    connectivity.connect(config.network.connect_timeout_secs).await;

    let signer: Box<dyn JwtSigner> = if config.auth.rsa_n_hex.is_empty() {
        warn!("[STARTUP] no RSA key components configured - using a throwaway dev key");
        Box::new(RsaComponentsSigner::ephemeral()?)
    } else {
        Box::new(RsaComponentsSigner::from_hex_components(
            &config.auth.rsa_n_hex,
            &config.auth.rsa_e_hex,
            &config.auth.rsa_d_hex,
            &config.auth.rsa_p_hex,
            &config.auth.rsa_q_hex,
        )?)
    };
    let auth = AuthTokenManager::new(&config.auth, signer);

    let firebase = match &config.telemetry.firebase_url {
        Some(url) => FirebaseSink::from_url(url.clone()),
        None => FirebaseSink::new(&config.telemetry.firebase_db, &config.telemetry.firebase_path),
    };
    let sinks = SinkSet {
        firebase,
        pubsub: config
            .telemetry
            .pubsub_topic_url
            .clone()
            .map(PubSubSink::new),
    };

    let reporting = ReportingTask::new(
        connectivity,
        auth,
        sinks,
        ctx.shared.clone(),
        ReportSettings {
            tolerance: config.telemetry.tolerance,
            report_interval: Duration::from_millis(config.telemetry.report_interval_ms),
            reconnect_delay: Duration::from_millis(config.network.reconnect_delay_ms),
            connect_timeout_secs: config.network.connect_timeout_secs,
        },
    );

    // ==========================================================================
    // run until fatal failure
    // ==========================================================================

    let outcome = reporting.run(ctx.stop.clone()).await;

    // the stop signal is set by now (run triggers it on the way out);
    // wait for the sampler's final iteration before exiting
    ctx.stop.trigger();
    if let Err(e) = sampler.await {
        error!("[SHUTDOWN] sampling thread panicked: {e}");
    }

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("[SHUTDOWN] reporting loop ended fatally: {e}");
            Err(e.into())
        }
    }
}
