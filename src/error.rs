//! errors for the telemetry agent, one variant per failure kind so
//! callers branch on kind rather than inspecting message text.

use std::fmt;

/// every way the agent can fail, classified per subsystem
#[derive(Debug)]
pub enum AgentError {
    /// NTP sync exhausted its retry budget
    ClockSync { attempts: u32, last_error: String },
    /// the RSA primitive rejected the digest or the key components
    Signing(String),
    /// token endpoint returned non-200, unparseable JSON, or the
    /// transport failed outright
    TokenExchange {
        status: Option<u16>,
        detail: String,
    },
    /// link-layer connect/status failure
    Connectivity(String),
    /// a telemetry push failed; the reading is retried next tick
    Send { sink: &'static str, detail: String },
    /// bad configuration caught at construction time
    Config(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClockSync {
                attempts,
                last_error,
            } => {
                write!(f, "NTP sync failed after {attempts} attempts: {last_error}")
            }
            Self::Signing(detail) => write!(f, "RS256 signing failed: {detail}"),
            Self::TokenExchange {
                status: Some(code),
                detail,
            } => {
                write!(f, "token exchange rejected (HTTP {code}): {detail}")
            }
            Self::TokenExchange {
                status: None,
                detail,
            } => {
                write!(f, "token exchange transport failure: {detail}")
            }
            Self::Connectivity(detail) => write!(f, "connectivity failure: {detail}"),
            Self::Send { sink, detail } => {
                write!(f, "send to {sink} failed: {detail}")
            }
            Self::Config(detail) => write!(f, "invalid configuration: {detail}"),
        }
    }
}

impl std::error::Error for AgentError {}
