//! ==============================================================================
//! auth - service-account token lifecycle
//! ==============================================================================
//!
//! purpose:
//!     owns everything between "we have raw RSA key components" and "we
//!     have a bearer token for the telemetry sinks":
//!
//! ```text
//!     Unauthenticated -> (NTP ok) -> ClaimsBuilt -> Signed -> TokenExchanged
//!
//!     every arrow can fail back; there is no terminal failure state. a
//!     failed run keeps the previous (possibly stale) token and the next
//!     scheduled refresh tries again.
//! ```
//!
//! policy:
//!     - clock sync failure is fatal to the attempt unless leniency is
//!       configured, in which case the current (possibly skewed) clock is
//!       used with a warning
//!     - signing/exchange failures are retried up to a bounded count with
//!       fixed backoff; exhaustion is a soft failure
//!     - refresh is proactive: due once 0.9 x TTL has elapsed since the
//!       last successful exchange, checked on the reporting cadence
//!
//! relationships:
//!     - used by: report.rs (refresh scheduling, bearer for sends)
//!     - uses: jwt.rs (claims/signing), sntp.rs (clock sync)
//!     - config: config.rs [auth] section
//!
//! ==============================================================================

pub mod jwt;
pub mod sntp;

use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;

use crate::config::AuthSettings;
use crate::connectivity::RetryPolicy;
use crate::error::AgentError;
use jwt::{Claims, JwtSigner};
use sntp::ClockOffset;

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// fraction of the TTL after which a refresh becomes due
const REFRESH_MARGIN: f64 = 0.9;

/// a successfully exchanged bearer token. never mutated; replaced whole
/// by the next successful exchange.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub bearer: String,
}

/// proactive refresh scheduling over monotonic millisecond stamps.
/// `stamp` is called after every attempt, successful or not, so a
/// persistently failing endpoint cannot cause a refresh storm.
#[derive(Debug, Clone, Copy)]
pub struct RefreshSchedule {
    ttl_ms: u64,
    last_attempt_ms: Option<u64>,
}

impl RefreshSchedule {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as u64,
            last_attempt_ms: None,
        }
    }

    /// due immediately on the first tick, then once the margin elapses
    pub fn due(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            None => true,
            Some(last) => now_ms - last >= (self.ttl_ms as f64 * REFRESH_MARGIN) as u64,
        }
    }

    pub fn stamp(&mut self, now_ms: u64) {
        self.last_attempt_ms = Some(now_ms);
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// builds, signs, and exchanges the service-account assertion
pub struct AuthTokenManager {
    client: reqwest::Client,
    client_email: String,
    token_uri: String,
    scope: String,
    expiry_secs: u64,
    ntp_host: String,
    lenient_clock: bool,
    ntp_retry: RetryPolicy,
    exchange_retry: RetryPolicy,
    signer: Box<dyn JwtSigner>,
    clock: ClockOffset,
    token: Option<AuthToken>,
}

impl AuthTokenManager {
    pub fn new(settings: &AuthSettings, signer: Box<dyn JwtSigner>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_email: settings.client_email.clone(),
            token_uri: settings.token_uri.clone(),
            scope: settings.scope.clone(),
            expiry_secs: settings.expiry_secs,
            ntp_host: settings.ntp_host.clone(),
            lenient_clock: settings.lenient_clock,
            ntp_retry: RetryPolicy::bounded(
                settings.ntp_attempts,
                Duration::from_millis(settings.ntp_backoff_ms),
            ),
            exchange_retry: RetryPolicy::bounded(
                settings.exchange_attempts,
                Duration::from_millis(settings.exchange_backoff_ms),
            ),
            signer,
            clock: ClockOffset::default(),
            token: None,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    /// the current bearer, possibly stale if refreshes have been failing
    pub fn bearer(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.bearer.as_str())
    }

    /// offset-corrected clock, shared with telemetry timestamping
    pub fn clock(&self) -> ClockOffset {
        self.clock
    }

    /// run the full flow: clock sync, then bounded sign+exchange retries.
    /// on failure the previous token (if any) is retained untouched.
    pub async fn authenticate(&mut self) -> Result<(), AgentError> {
        info!("[AUTH] starting authentication");

        if let Err(e) = self.sync_clock().await {
            if self.lenient_clock {
                warn!("[AUTH] {e}; proceeding with the current clock (lenient mode)");
            } else {
                return Err(e);
            }
        }

        let mut attempt = 0;
        let mut last_error = None;
        while self.exchange_retry.allows(attempt) {
            attempt += 1;
            match self.try_once().await {
                Ok(bearer) => {
                    info!("[AUTH] obtained access token (attempt {attempt})");
                    self.token = Some(AuthToken { bearer });
                    return Ok(());
                }
                Err(e) => {
                    warn!("[AUTH] attempt {attempt} failed: {e}");
                    last_error = Some(e);
                    tokio::time::sleep(self.exchange_retry.interval).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::TokenExchange {
            status: None,
            detail: "no exchange attempts were allowed by the retry policy".into(),
        }))
    }

    /// one pass of claims -> sign -> assemble -> exchange
    async fn try_once(&self) -> Result<String, AgentError> {
        let claims = self.build_claims();
        let input = jwt::signing_input(&claims)?;
        let signature = self.signer.sign(&jwt::sha256_digest(input.as_bytes()))?;
        let assertion = jwt::compact(&input, &signature);
        self.exchange(&assertion).await
    }

    fn build_claims(&self) -> Claims {
        let iat = self.clock.now_unix();
        Claims {
            iss: self.client_email.clone(),
            sub: self.client_email.clone(),
            aud: self.token_uri.clone(),
            iat,
            exp: iat + self.expiry_secs,
            scope: self.scope.clone(),
        }
    }

    async fn sync_clock(&mut self) -> Result<(), AgentError> {
        let mut attempt = 0;
        let mut last_error = String::from("no attempts allowed by the retry policy");
        while self.ntp_retry.allows(attempt) {
            attempt += 1;
            info!("[AUTH] NTP sync attempt {attempt} against {}", self.ntp_host);
            match sntp::query(&self.ntp_host, Duration::from_secs(5)).await {
                Ok(server_secs) => {
                    self.clock = ClockOffset::from_server_time(server_secs);
                    let utc = chrono::DateTime::from_timestamp(self.clock.now_unix() as i64, 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "?".into());
                    info!(
                        "[AUTH] clock synced, offset {:+}s, UTC now {utc}",
                        self.clock.offset_secs()
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!("[AUTH] NTP sync attempt failed: {e}");
                    last_error = e.to_string();
                    tokio::time::sleep(self.ntp_retry.interval).await;
                }
            }
        }
        Err(AgentError::ClockSync {
            attempts: attempt,
            last_error,
        })
    }

    async fn exchange(&self, assertion: &str) -> Result<String, AgentError> {
        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion)])
            .send()
            .await
            .map_err(|e| AgentError::TokenExchange {
                status: None,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_else(|_| String::new());
            return Err(AgentError::TokenExchange {
                status: Some(status.as_u16()),
                detail: body,
            });
        }

        let parsed: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| AgentError::TokenExchange {
                    status: Some(200),
                    detail: format!("unparseable token response: {e}"),
                })?;
        Ok(parsed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct FixedSigner;
    impl JwtSigner for FixedSigner {
        fn sign(&self, _digest: &[u8; 32]) -> Result<Vec<u8>, AgentError> {
            Ok(vec![0xAB; 16])
        }
    }

    struct BrokenSigner;
    impl JwtSigner for BrokenSigner {
        fn sign(&self, _digest: &[u8; 32]) -> Result<Vec<u8>, AgentError> {
            Err(AgentError::Signing("hardware unavailable".into()))
        }
    }

    fn settings(token_uri: String) -> AuthSettings {
        AuthSettings {
            client_email: "svc@example.iam.gserviceaccount.com".into(),
            token_uri,
            scope: "https://www.googleapis.com/auth/firebase.database".into(),
            expiry_secs: 3600,
            lenient_clock: true,
            ntp_host: "pool.ntp.org".into(),
            // zero NTP attempts: lenient mode proceeds on the local clock,
            // keeping tests off the network
            ntp_attempts: 0,
            ntp_backoff_ms: 0,
            exchange_attempts: 2,
            exchange_backoff_ms: 0,
            ..AuthSettings::default()
        }
    }

    /// one-shot HTTP server returning a canned status + body
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // drain the request headers before answering
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
                if n == 0 || seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{addr}/token")
    }

    #[test]
    fn refresh_not_due_before_ninety_percent_of_ttl() {
        let mut schedule = RefreshSchedule::new(Duration::from_secs(3600));
        assert!(schedule.due(0), "first tick must refresh immediately");
        schedule.stamp(0);
        assert!(!schedule.due(3_239_999));
        assert!(schedule.due(3_240_000));
    }

    #[test]
    fn failed_attempts_still_damp_the_schedule() {
        let mut schedule = RefreshSchedule::new(Duration::from_secs(3600));
        schedule.stamp(1_000); // attempt happened, outcome irrelevant
        assert!(!schedule.due(2_000));
    }

    #[tokio::test]
    async fn successful_exchange_installs_the_token() {
        let uri = serve_once("200 OK", r#"{"access_token":"tok-123"}"#).await;
        let mut mgr = AuthTokenManager::new(&settings(uri), Box::new(FixedSigner));
        mgr.authenticate().await.unwrap();
        assert_eq!(mgr.bearer(), Some("tok-123"));
    }

    #[tokio::test]
    async fn rejected_exchange_keeps_the_previous_token() {
        let ok_uri = serve_once("200 OK", r#"{"access_token":"first"}"#).await;
        let mut mgr = AuthTokenManager::new(&settings(ok_uri), Box::new(FixedSigner));
        mgr.authenticate().await.unwrap();

        // point at an endpoint that rejects the assertion; the second retry
        // hits the closed listener and fails at the transport layer
        mgr.token_uri = serve_once("403 Forbidden", r#"{"error":"invalid_grant"}"#).await;
        assert!(mgr.authenticate().await.is_err());
        assert_eq!(mgr.bearer(), Some("first"), "stale token must be retained");
    }

    #[tokio::test]
    async fn signing_failure_is_soft_and_classified() {
        let mut mgr = AuthTokenManager::new(
            &settings("http://127.0.0.1:9/token".into()),
            Box::new(BrokenSigner),
        );
        match mgr.authenticate().await {
            Err(AgentError::Signing(_)) => {}
            other => panic!("expected Signing error, got {other:?}"),
        }
        assert!(mgr.bearer().is_none());
    }
}
