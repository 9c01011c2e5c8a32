//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `agent.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - NetworkSettings:   link credentials and reconnect behavior
//!     - SensorSettings:    sampling period, hysteresis band, smoothing
//!     - AuthSettings:      service account, endpoints, RSA components,
//!                          retry budgets (consumed opaquely, presence only)
//!     - TelemetrySettings: sink locations, tolerance, reporting cadence
//!     - LoggingSettings:   default log filter
//!     - SimSettings:       simulated-hardware knobs for local dev
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;

use log::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub sensor: SensorSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub sim: SimSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkSettings {
    pub ssid: String,
    pub psk: String,
    /// per-attempt budget of the connect loop, seconds
    pub connect_timeout_secs: u32,
    /// pause after a watchdog reconnect before reporting resumes
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorSettings {
    pub sample_period_ms: u64,
    /// hysteresis band; leave unset to auto-tune at startup
    pub high_threshold: Option<f64>,
    pub low_threshold: Option<f64>,
    /// no pulse for this long means the rotor has stopped
    pub timeout_ms: u64,
    pub smoothing_window: usize,
    /// ambient-noise calibration pass length (auto-tune only)
    pub calibration_ms: u64,
    /// headroom added above the observed noise ceiling (auto-tune only)
    pub calibration_margin: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthSettings {
    pub client_email: String,
    pub token_uri: String,
    pub scope: String,
    pub expiry_secs: u64,
    /// proceed on a skewed clock when NTP is unreachable
    pub lenient_clock: bool,
    pub ntp_host: String,
    pub ntp_attempts: u32,
    pub ntp_backoff_ms: u64,
    pub exchange_attempts: u32,
    pub exchange_backoff_ms: u64,
    /// raw RSA components as hex, extracted offline from the service
    /// account key. opaque here: never generated, never validated.
    pub rsa_n_hex: String,
    pub rsa_e_hex: String,
    pub rsa_d_hex: String,
    pub rsa_p_hex: String,
    pub rsa_q_hex: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetrySettings {
    pub firebase_db: String,
    pub firebase_path: String,
    /// full endpoint override (local dev / tests); wins over db + path
    pub firebase_url: Option<String>,
    /// optional pub/sub publish endpoint
    pub pubsub_topic_url: Option<String>,
    /// minimum change in Hz worth reporting
    pub tolerance: f64,
    pub report_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimSettings {
    /// rotation frequency the simulated anemometer starts at
    pub start_frequency_hz: f64,
}

impl AgentConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("agent.toml"),
            std::path::PathBuf::from("config").join("agent.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!("[CONFIG] loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("[CONFIG] failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        warn!("[CONFIG] no config file found - using defaults");
        Self::default()
    }

    /// Log a summary of the effective configuration (no key material)
    pub fn log_summary(&self) {
        info!("[CONFIG] ssid: {}", self.network.ssid);
        info!(
            "[CONFIG] sampling: {} ms period, window {}, pulse timeout {} ms",
            self.sensor.sample_period_ms, self.sensor.smoothing_window, self.sensor.timeout_ms
        );
        match (self.sensor.high_threshold, self.sensor.low_threshold) {
            (Some(high), Some(low)) => info!("[CONFIG] thresholds: high {high}, low {low}"),
            _ => info!("[CONFIG] thresholds: auto-tune at startup"),
        }
        info!(
            "[CONFIG] reporting: every {} ms, tolerance {} Hz",
            self.telemetry.report_interval_ms, self.telemetry.tolerance
        );
        info!(
            "[CONFIG] auth: {} via {} (TTL {} s, lenient clock: {})",
            self.auth.client_email,
            self.auth.token_uri,
            self.auth.expiry_secs,
            self.auth.lenient_clock
        );
        if self.telemetry.pubsub_topic_url.is_some() {
            info!("[CONFIG] pub/sub sink enabled");
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            psk: String::new(),
            connect_timeout_secs: 15,
            reconnect_delay_ms: 5_000,
        }
    }
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            sample_period_ms: 10,
            high_threshold: None,
            low_threshold: None,
            timeout_ms: 1_000,
            smoothing_window: 20,
            calibration_ms: 3_000,
            calibration_margin: 2_000.0,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            client_email: String::new(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            scope: "https://www.googleapis.com/auth/firebase.database".to_string(),
            expiry_secs: 3_600,
            lenient_clock: false,
            ntp_host: "pool.ntp.org".to_string(),
            ntp_attempts: 5,
            ntp_backoff_ms: 2_000,
            exchange_attempts: 3,
            exchange_backoff_ms: 1_000,
            rsa_n_hex: String::new(),
            rsa_e_hex: String::new(),
            rsa_d_hex: String::new(),
            rsa_p_hex: String::new(),
            rsa_q_hex: String::new(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            firebase_db: String::new(),
            firebase_path: "sensors.json".to_string(),
            firebase_url: None,
            pubsub_topic_url: None,
            tolerance: 0.05,
            report_interval_ms: 1_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            start_frequency_hz: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: AgentConfig = toml::from_str(
            r#"
            [network]
            ssid = "shed"
            psk = "hunter2"

            [telemetry]
            tolerance = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network.ssid, "shed");
        assert_eq!(cfg.network.connect_timeout_secs, 15);
        assert_eq!(cfg.telemetry.tolerance, 0.1);
        assert_eq!(cfg.sensor.sample_period_ms, 10);
        assert_eq!(cfg.auth.expiry_secs, 3_600);
    }

    #[test]
    fn thresholds_default_to_auto_tune() {
        let cfg = AgentConfig::default();
        assert!(cfg.sensor.high_threshold.is_none());
        assert!(cfg.sensor.low_threshold.is_none());
    }
}
