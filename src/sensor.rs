//! the raw sensor seam. the real read primitive (GPIO/ADC) lives outside
//! this crate; the agent only sees `SampleSource`. `sim.rs` provides the
//! in-tree implementation used for local development and tests.

/// one raw ADC reading with its monotonic millisecond stamp
#[derive(Debug, Clone, Copy)]
pub struct SensorSample {
    pub timestamp_ms: u64,
    pub raw_value: f64,
}

/// external sensor read primitive
pub trait SampleSource: Send {
    /// produce the sample for the current tick. `now_ms` is monotonic,
    /// supplied by the sampling loop so sources never need their own clock.
    fn read(&mut self, now_ms: u64) -> SensorSample;
}
