//! minimal SNTP v4 client used to sync the clock before signing JWTs.
//!
//! the device's system clock may be arbitrarily skewed at boot; a wrong
//! `iat` gets the assertion rejected outright. a userspace agent cannot
//! slam the RTC the way firmware does, so the sync result is carried as an
//! offset and applied wherever wall-clock time is stamped.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;

use crate::error::AgentError;

/// seconds between the NTP era (1900) and the unix epoch (1970)
const NTP_UNIX_DELTA: u64 = 2_208_988_800;

/// LI = 0, version 4, mode 3 (client)
const CLIENT_REQUEST_HEADER: u8 = 0x23;

/// signed correction to apply to the system clock, in whole seconds
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockOffset {
    offset_secs: i64,
}

impl ClockOffset {
    pub fn from_server_time(server_unix_secs: u64) -> Self {
        Self {
            offset_secs: server_unix_secs as i64 - system_unix_secs() as i64,
        }
    }

    /// corrected unix time in seconds
    pub fn now_unix(&self) -> u64 {
        (system_unix_secs() as i64 + self.offset_secs).max(0) as u64
    }

    pub fn offset_secs(&self) -> i64 {
        self.offset_secs
    }
}

fn system_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// one SNTP query: send the 48-byte client packet, read the server's
/// transmit timestamp, return it as unix seconds.
pub async fn query(host: &str, timeout: Duration) -> Result<u64, AgentError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| clock_err(format!("bind: {e}")))?;
    socket
        .connect((host, 123))
        .await
        .map_err(|e| clock_err(format!("connect {host}: {e}")))?;

    let mut packet = [0u8; 48];
    packet[0] = CLIENT_REQUEST_HEADER;
    socket
        .send(&packet)
        .await
        .map_err(|e| clock_err(format!("send: {e}")))?;

    let mut response = [0u8; 48];
    let len = tokio::time::timeout(timeout, socket.recv(&mut response))
        .await
        .map_err(|_| clock_err(format!("no response from {host} within {timeout:?}")))?
        .map_err(|e| clock_err(format!("recv: {e}")))?;

    parse_transmit_seconds(&response[..len])
}

/// transmit timestamp lives at bytes 40..44 (seconds since 1900, big-endian)
pub fn parse_transmit_seconds(packet: &[u8]) -> Result<u64, AgentError> {
    if packet.len() < 44 {
        return Err(clock_err(format!("short packet ({} bytes)", packet.len())));
    }
    let ntp_secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]) as u64;
    if ntp_secs < NTP_UNIX_DELTA {
        return Err(clock_err(format!("implausible NTP timestamp {ntp_secs}")));
    }
    Ok(ntp_secs - NTP_UNIX_DELTA)
}

fn clock_err(detail: String) -> AgentError {
    AgentError::ClockSync {
        attempts: 1,
        last_error: detail,
    }
}
