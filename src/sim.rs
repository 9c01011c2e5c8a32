//! ==============================================================================
//! sim.rs - simulated sensor and link for local development
//! ==============================================================================
//!
//! purpose:
//!     the agent's hardware seams (`SampleSource`, `LinkDriver`) are
//!     implemented here in software so the full pipeline runs on a desktop:
//!     a sine-wave "anemometer" with injected noise stands in for the ADC,
//!     and a scriptable link stands in for the radio.
//!
//! relationships:
//!     - implements: sensor.rs (SampleSource), connectivity.rs (LinkDriver)
//!     - used by: main.rs (local-dev wiring), unit + integration tests
//!
//! ==============================================================================

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::connectivity::{LinkDriver, LinkStatus};
use crate::sensor::{SampleSource, SensorSample};

/// maximum value of the 16-bit ADC the simulator mimics
const ADC_MAX: f64 = 65_535.0;

// ==============================================================================
// sine-wave generator
// ==============================================================================

/// generates a sine wave point by point, carrying the phase angle across
/// calls so the wave stays continuous when the frequency changes.
#[derive(Debug)]
pub struct SineWave {
    amplitude: f64,
    offset: f64,
    sampling_rate: f64,
    angle: f64,
}

impl SineWave {
    pub fn new(amplitude: f64, offset: f64, sampling_rate: f64) -> Self {
        Self {
            amplitude,
            offset,
            sampling_rate,
            angle: 0.0,
        }
    }

    /// next point of a wave at `frequency_hz`, assuming this is called once
    /// per sample period.
    pub fn next_point(&mut self, frequency_hz: f64) -> f64 {
        let value = self.offset + self.amplitude * self.angle.sin();
        // the phase step divides the sampling rate by 10; the simulator's
        // rates are chosen around that scaling.
        let increment = (2.0 * std::f64::consts::PI * frequency_hz) / (self.sampling_rate / 10.0);
        self.angle = (self.angle + increment) % (2.0 * std::f64::consts::PI);
        value
    }

    pub fn reset(&mut self) {
        self.angle = 0.0;
    }
}

// ==============================================================================
// simulated anemometer
// ==============================================================================

/// sine wave centered in the ADC range with uniform noise on top.
/// when inactive only the noise floor is emitted, which is what a real
/// stationary anemometer looks like.
pub struct SimulatedAnemometer {
    wave: SineWave,
    noise_level: f64,
    frequency_hz: f64,
    active: bool,
    rng: StdRng,
}

impl SimulatedAnemometer {
    pub fn new(frequency_hz: f64) -> Self {
        Self {
            // amplitude 5000 around a 32000 offset, 100 samples/s loop
            wave: SineWave::new(5_000.0, 32_000.0, 1_000.0),
            noise_level: 300.0,
            frequency_hz,
            active: true,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn set_frequency(&mut self, frequency_hz: f64) {
        self.frequency_hz = frequency_hz;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

impl SampleSource for SimulatedAnemometer {
    fn read(&mut self, now_ms: u64) -> SensorSample {
        let noise = self.rng.gen_range(-self.noise_level..=self.noise_level);
        let raw_value = if self.active {
            (self.wave.next_point(self.frequency_hz) + noise).clamp(0.0, ADC_MAX)
        } else {
            noise.abs()
        };
        SensorSample {
            timestamp_ms: now_ms,
            raw_value,
        }
    }
}

// ==============================================================================
// deterministic pulse train (tests)
// ==============================================================================

/// clean square pulses with a fixed period, satisfying the hysteresis
/// margins every cycle. used to verify estimator convergence.
pub struct PulseTrain {
    period_ms: u64,
    pulse_width_ms: u64,
    high: f64,
    low: f64,
}

impl PulseTrain {
    pub fn new(period_ms: u64, pulse_width_ms: u64, high: f64, low: f64) -> Self {
        Self {
            period_ms,
            pulse_width_ms,
            high,
            low,
        }
    }
}

impl SampleSource for PulseTrain {
    fn read(&mut self, now_ms: u64) -> SensorSample {
        let phase = now_ms % self.period_ms;
        let raw_value = if phase < self.pulse_width_ms {
            self.high
        } else {
            self.low
        };
        SensorSample {
            timestamp_ms: now_ms,
            raw_value,
        }
    }
}

// ==============================================================================
// simulated link
// ==============================================================================

/// scriptable link driver: comes up after a configurable number of status
/// polls, optionally failing a number of whole connect attempts first.
pub struct SimulatedLink {
    connected: bool,
    in_attempt: bool,
    fail_this_attempt: bool,
    failed_attempts_left: u32,
    polls_until_up: u32,
    polls_left: u32,
}

impl SimulatedLink {
    /// connected after `polls` status polls following a connect request;
    /// `polls == 0` means the link is already up.
    pub fn up_after(polls: u32) -> Self {
        Self {
            connected: polls == 0,
            in_attempt: false,
            fail_this_attempt: false,
            failed_attempts_left: 0,
            polls_until_up: polls,
            polls_left: 0,
        }
    }

    /// the first `failed_attempts` connect requests report Failed, after
    /// which the link comes up after `polls` status polls.
    pub fn fail_then_connect(failed_attempts: u32, polls: u32) -> Self {
        Self {
            connected: false,
            in_attempt: false,
            fail_this_attempt: false,
            failed_attempts_left: failed_attempts,
            polls_until_up: polls,
            polls_left: 0,
        }
    }

    /// drop the link (simulated outage); a later connect brings it back
    pub fn force_down(&mut self) {
        self.connected = false;
        self.in_attempt = false;
    }
}

impl LinkDriver for SimulatedLink {
    fn activate(&mut self) {}

    fn request_connect(&mut self, _ssid: &str, _psk: &str) {
        self.in_attempt = true;
        if self.failed_attempts_left > 0 {
            self.failed_attempts_left -= 1;
            self.fail_this_attempt = true;
        } else {
            self.fail_this_attempt = false;
            self.polls_left = self.polls_until_up;
            if self.polls_until_up == 0 {
                self.connected = true;
            }
        }
    }

    fn status(&mut self) -> LinkStatus {
        if self.connected {
            return LinkStatus::Connected;
        }
        if !self.in_attempt {
            return LinkStatus::Idle;
        }
        if self.fail_this_attempt {
            self.in_attempt = false;
            return LinkStatus::Failed;
        }
        if self.polls_left > 1 {
            self.polls_left -= 1;
            LinkStatus::Connecting
        } else {
            self.connected = true;
            LinkStatus::Connected
        }
    }
}
