//! ==============================================================================
//! sampling.rs - the tight sensor-side loop
//! ==============================================================================
//!
//! purpose:
//!     runs on its own blocking thread (spawned via spawn_blocking from
//!     main): read one sample, update the estimator, push the frequency
//!     into the smoother, publish the average into SharedReading, check the
//!     stop signal, sleep one period. no network, no crypto, no blocking
//!     call other than the sleep itself ever happens here.
//!
//! relationships:
//!     - reads: sensor.rs (SampleSource)
//!     - drives: freq.rs, smoothing.rs
//!     - publishes to: shared.rs (SharedReading)
//!     - stopped by: report.rs via StopSignal
//!
//! ==============================================================================

use std::time::{Duration, Instant};

use log::info;

use crate::freq::FrequencyEstimator;
use crate::sensor::SampleSource;
use crate::shared::{SharedReading, StopSignal};
use crate::smoothing::WindowSmoother;

/// thresholds derived from an ambient-noise calibration pass
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub high: f64,
    pub low: f64,
}

/// sample ambient noise for `duration` at the sampling period and derive
/// the hysteresis band from the observed ceiling: high = ceiling + margin,
/// low = ceiling. used at startup when config leaves thresholds unset.
pub fn calibrate_thresholds(
    source: &mut dyn SampleSource,
    duration: Duration,
    period: Duration,
    margin: f64,
) -> Thresholds {
    let start = Instant::now();
    let mut ceiling = f64::MIN;
    while start.elapsed() < duration {
        let now_ms = start.elapsed().as_millis() as u64;
        let sample = source.read(now_ms);
        if sample.raw_value > ceiling {
            ceiling = sample.raw_value;
        }
        std::thread::sleep(period);
    }
    info!(
        "[SAMPLER] auto-tune: noise ceiling {ceiling:.0}, high {:.0}, low {ceiling:.0}",
        ceiling + margin
    );
    Thresholds {
        high: ceiling + margin,
        low: ceiling,
    }
}

/// the sampling loop proper. returns when the stop signal fires; the check
/// happens once per iteration, so at most one more sample is taken after
/// the signal is set.
pub fn run_sampling_loop(
    mut source: Box<dyn SampleSource>,
    mut estimator: FrequencyEstimator,
    mut smoother: WindowSmoother,
    shared: SharedReading,
    stop: StopSignal,
    period: Duration,
) {
    info!("[SAMPLER] starting sensor loop ({} ms period)", period.as_millis());
    let start = Instant::now();
    loop {
        let now_ms = start.elapsed().as_millis() as u64;
        let sample = source.read(now_ms);

        estimator.update(now_ms, sample.raw_value);
        smoother.add(estimator.frequency_hz());

        // critical section: one assignment, nothing else
        shared.store(smoother.average());

        if stop.is_triggered() {
            info!("[SAMPLER] stop signal observed, exiting");
            return;
        }
        std::thread::sleep(period);
    }
}
