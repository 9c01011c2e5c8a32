//! ==============================================================================
//! anemo-agent - always-on anemometer telemetry agent
//! ==============================================================================
//!
//! purpose:
//!     estimates rotation frequency from a noisy pulse stream, smooths it,
//!     and reports it to cloud time-series endpoints, signing its own
//!     service-account bearer tokens along the way.
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                      agent process                           │
//!     │  ┌───────────────────┐          ┌────────────────────────┐   │
//!     │  │ SamplingTask      │          │ ReportingTask (main)   │   │
//!     │  │ (blocking thread, │          │ (async, ~1s cadence)   │   │
//!     │  │  ~10ms period)    │          │ watchdog / auth / send │   │
//!     │  └───────┬───────────┘          └──────────┬─────────────┘   │
//!     │          │ store latest             load   │                 │
//!     │          └───────►  SharedReading  ◄───────┘                 │
//!     │                   (one mutex, one f64)                       │
//!     └──────────────────────────────────────────────────────────────┘
//!                                                  │ HTTPS
//!                                   ┌──────────────┴──────────────┐
//!                                   ▼                             ▼
//!                            token endpoint                telemetry sinks
//!                            (JWT-bearer grant)            (Firebase, Pub/Sub)
//! ```
//!
//! the only state crossing the task boundary is one smoothed float behind
//! one mutex; everything else (link handle, token, timers) is owned by
//! exactly one task.
//!
//! ==============================================================================

pub mod auth;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod freq;
pub mod report;
pub mod sampling;
pub mod sensor;
pub mod shared;
pub mod sim;
pub mod smoothing;
pub mod telemetry;

use shared::{SharedReading, StopSignal};

/// the resources both tasks share, constructed once in main and handed to
/// each side. replaces module-level globals with an explicit value.
#[derive(Clone, Default)]
pub struct AgentContext {
    pub shared: SharedReading,
    pub stop: StopSignal,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }
}
