//! fixed-window moving average over the raw frequency stream.
//!
//! the anemometer signal is noisy even after hysteresis; a short ring-buffer
//! average is enough to stabilize the reported value. the running sum is
//! maintained incrementally so `add` is O(1) regardless of window size.

use crate::error::AgentError;

#[derive(Debug)]
pub struct WindowSmoother {
    readings: Vec<f64>,
    sum: f64,
    cursor: usize,
    full: bool,
}

impl WindowSmoother {
    pub fn new(window_size: usize) -> Result<Self, AgentError> {
        if window_size == 0 {
            return Err(AgentError::Config(
                "smoothing window size must be positive".into(),
            ));
        }
        Ok(Self {
            readings: vec![0.0; window_size],
            sum: 0.0,
            cursor: 0,
            full: false,
        })
    }

    /// push one value, evicting the oldest once the window is full
    pub fn add(&mut self, value: f64) {
        self.sum -= self.readings[self.cursor];
        self.readings[self.cursor] = value;
        self.sum += value;

        self.cursor += 1;
        if self.cursor >= self.readings.len() {
            self.cursor = 0;
            self.full = true;
        }
    }

    /// mean of the resident values; 0.0 before anything was added
    pub fn average(&self) -> f64 {
        if self.full {
            self.sum / self.readings.len() as f64
        } else if self.cursor == 0 {
            0.0
        } else {
            self.sum / self.cursor as f64
        }
    }

    pub fn reset(&mut self) {
        self.readings.fill(0.0);
        self.sum = 0.0;
        self.cursor = 0;
        self.full = false;
    }
}
