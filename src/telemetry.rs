//! ==============================================================================
//! telemetry.rs - outbound message shape and the HTTP push targets
//! ==============================================================================
//!
//! purpose:
//!     one wind-speed reading becomes one `TelemetryMessage`, built fresh
//!     per send and pushed to every configured sink:
//!     - Firebase RTDB: PATCH {"wind_speed": <2dp>, "timestamp": "..."}
//!     - optional Pub/Sub: the same JSON, base64-wrapped in a publish
//!       envelope with an ordering key
//!
//! relationships:
//!     - used by: report.rs (SinkSet::send_all each reporting tick)
//!     - auth: bearer token supplied per call by AuthTokenManager
//!
//! ==============================================================================

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;
use serde::Serialize;

use crate::error::AgentError;

/// round to 2 decimal places, the resolution the sinks store
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `YYYY-MM-DD HH:MM:SS` in UTC from offset-corrected unix seconds
pub fn format_timestamp(unix_secs: u64) -> String {
    chrono::DateTime::from_timestamp(unix_secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| String::from("1970-01-01 00:00:00"))
}

/// the wire payload, constructed fresh per send and never reused
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMessage {
    pub wind_speed: f64,
    pub timestamp: String,
}

impl TelemetryMessage {
    pub fn new(wind_speed_2dp: f64, timestamp: String) -> Self {
        Self {
            wind_speed: wind_speed_2dp,
            timestamp,
        }
    }
}

// ==============================================================================
// firebase sink
// ==============================================================================

pub struct FirebaseSink {
    client: reqwest::Client,
    url: String,
}

impl FirebaseSink {
    /// standard RTDB location: https://<db>.firebaseio.com/<path>
    pub fn new(db_name: &str, data_path: &str) -> Self {
        Self::from_url(format!("https://{db_name}.firebaseio.com/{data_path}"))
    }

    /// explicit endpoint, used by local-dev config and tests
    pub fn from_url(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub async fn send(
        &self,
        msg: &TelemetryMessage,
        bearer: Option<&str>,
    ) -> Result<(), AgentError> {
        debug!("[SINK] PATCH {} <- {msg:?}", self.url);
        let mut request = self.client.patch(&self.url).json(msg);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| AgentError::Send {
            sink: "firebase",
            detail: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(AgentError::Send {
                sink: "firebase",
                detail: format!("HTTP {}", response.status().as_u16()),
            });
        }
        Ok(())
    }
}

// ==============================================================================
// pub/sub sink (optional)
// ==============================================================================

pub struct PubSubSink {
    client: reqwest::Client,
    topic_url: String,
}

/// publish envelope: the payload rides base64-encoded, ordered by timestamp
pub fn pubsub_envelope(msg: &TelemetryMessage) -> Result<serde_json::Value, AgentError> {
    let payload = serde_json::to_vec(msg).map_err(|e| AgentError::Send {
        sink: "pubsub",
        detail: e.to_string(),
    })?;
    Ok(serde_json::json!({
        "messages": [{
            "data": STANDARD.encode(&payload),
            "ordering_key": "timestamp",
        }]
    }))
}

impl PubSubSink {
    pub fn new(topic_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            topic_url,
        }
    }

    pub async fn send(
        &self,
        msg: &TelemetryMessage,
        bearer: Option<&str>,
    ) -> Result<(), AgentError> {
        let envelope = pubsub_envelope(msg)?;
        debug!("[SINK] POST {} <- ordering_key=timestamp", self.topic_url);
        let mut request = self.client.post(&self.topic_url).json(&envelope);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| AgentError::Send {
            sink: "pubsub",
            detail: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(AgentError::Send {
                sink: "pubsub",
                detail: format!("HTTP {}", response.status().as_u16()),
            });
        }
        Ok(())
    }
}

// ==============================================================================
// fan-out
// ==============================================================================

/// every configured push target. a reading only counts as reported when
/// all sinks accepted it; any failure leaves it to be retried next tick.
pub struct SinkSet {
    pub firebase: FirebaseSink,
    pub pubsub: Option<PubSubSink>,
}

impl SinkSet {
    pub async fn send_all(
        &self,
        msg: &TelemetryMessage,
        bearer: Option<&str>,
    ) -> Result<(), AgentError> {
        self.firebase.send(msg, bearer).await?;
        if let Some(pubsub) = &self.pubsub {
            pubsub.send(msg, bearer).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_to_two_decimals() {
        assert_eq!(round2(5.004), 5.0);
        assert_eq!(round2(5.128), 5.13);
        assert_eq!(round2(10.034_9), 10.03);
    }

    #[test]
    fn timestamp_is_utc_second_resolution() {
        assert_eq!(format_timestamp(1_704_067_200), "2024-01-01 00:00:00");
        assert_eq!(format_timestamp(1_704_153_599), "2024-01-01 23:59:59");
    }

    #[test]
    fn message_serializes_with_expected_keys() {
        let msg = TelemetryMessage::new(5.25, "2024-01-01 00:00:00".into());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["wind_speed"], 5.25);
        assert_eq!(value["timestamp"], "2024-01-01 00:00:00");
    }

    #[test]
    fn pubsub_envelope_wraps_the_payload_in_base64() {
        let msg = TelemetryMessage::new(3.5, "2024-01-01 00:00:00".into());
        let envelope = pubsub_envelope(&msg).unwrap();

        let messages = envelope["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["ordering_key"], "timestamp");

        let decoded = STANDARD
            .decode(messages[0]["data"].as_str().unwrap())
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(payload["wind_speed"], 3.5);
    }
}
