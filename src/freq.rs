//! ==============================================================================
//! freq.rs - hysteresis pulse-to-frequency converter
//! ==============================================================================
//!
//! purpose:
//!     turns a noisy analog pulse stream (anemometer reed switch / hall sensor
//!     through an ADC) into a rotation frequency in Hz.
//!
//! how it works:
//!     a rising edge only counts once the signal has dipped below the LOW
//!     threshold since the previous count (the trigger is "armed"). this
//!     hysteresis rejects noise that wobbles around a single threshold and
//!     would otherwise double-count one transition.
//!
//! relationships:
//!     - used by: sampling.rs (fed one sample per tick)
//!     - feeds: smoothing.rs (frequency goes into the moving average)
//!
//! ==============================================================================

use crate::error::AgentError;

/// hysteresis-based frequency estimator over a millisecond-stamped sample stream
#[derive(Debug)]
pub struct FrequencyEstimator {
    high_threshold: f64,
    low_threshold: f64,
    timeout_ms: u64,

    is_armed: bool,
    has_started: bool,
    last_event_time: u64,
    current_frequency_hz: f64,
}

impl FrequencyEstimator {
    /// thresholds come from config or the startup auto-tune pass.
    /// `high` must sit strictly above `low` or the hysteresis band is empty.
    pub fn new(high_threshold: f64, low_threshold: f64, timeout_ms: u64) -> Result<Self, AgentError> {
        if high_threshold <= low_threshold {
            return Err(AgentError::Config(format!(
                "high threshold {high_threshold} must exceed low threshold {low_threshold}"
            )));
        }
        Ok(Self {
            high_threshold,
            low_threshold,
            timeout_ms,
            is_armed: false,
            has_started: false,
            last_event_time: 0,
            current_frequency_hz: 0.0,
        })
    }

    /// feed one sample. `now_ms` is a monotonic millisecond stamp.
    pub fn update(&mut self, now_ms: u64, sample: f64) {
        // dipping below the low threshold re-arms the trigger
        if sample < self.low_threshold {
            self.is_armed = true;
        }

        // qualifying rising edge: armed AND above the high threshold
        if self.is_armed && sample > self.high_threshold {
            if self.has_started {
                let period = now_ms - self.last_event_time;
                self.current_frequency_hz = if period == 0 {
                    0.0
                } else {
                    1000.0 / period as f64
                };
            }
            self.last_event_time = now_ms;
            self.is_armed = false;
            self.has_started = true;
        }

        // no pulse within the timeout window: the rotor has stopped
        if self.has_started && now_ms - self.last_event_time > self.timeout_ms {
            self.current_frequency_hz = 0.0;
            self.has_started = false;
        }
    }

    pub fn frequency_hz(&self) -> f64 {
        self.current_frequency_hz
    }
}
