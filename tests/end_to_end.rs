//! full-pipeline scenarios: pulse train to smoothed reading, cooperative
//! shutdown, and a reporting tick cycle against a local HTTP sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use anemo_agent::auth::jwt::JwtSigner;
use anemo_agent::auth::AuthTokenManager;
use anemo_agent::config::AuthSettings;
use anemo_agent::connectivity::ConnectivityManager;
use anemo_agent::error::AgentError;
use anemo_agent::freq::FrequencyEstimator;
use anemo_agent::report::{ReportSettings, ReportingTask, TickOutcome};
use anemo_agent::sampling;
use anemo_agent::sensor::SampleSource;
use anemo_agent::shared::{SharedReading, StopSignal};
use anemo_agent::sim::{PulseTrain, SimulatedAnemometer, SimulatedLink};
use anemo_agent::smoothing::WindowSmoother;
use anemo_agent::telemetry::{round2, FirebaseSink, SinkSet};

/// a clean 5 Hz pulse train (200 ms period) sampled at 10 ms converges to
/// a smoothed 5.00 within one window of the first full period measurement.
#[test]
fn five_hertz_pulse_train_converges_to_five() {
    let mut train = PulseTrain::new(200, 50, 10_000.0, 0.0);
    let mut estimator = FrequencyEstimator::new(8_000.0, 800.0, 1_000).unwrap();
    let mut smoother = WindowSmoother::new(20).unwrap();

    let step = |t_ms: u64,
                train: &mut PulseTrain,
                estimator: &mut FrequencyEstimator,
                smoother: &mut WindowSmoother| {
        let sample = train.read(t_ms);
        estimator.update(t_ms, sample.raw_value);
        smoother.add(estimator.frequency_hz());
    };

    // the first full period ends at t=400 ms; one 20-sample window later
    // (200 ms of 10 ms ticks) the average must have settled
    for t in (0..=600).step_by(10) {
        step(t, &mut train, &mut estimator, &mut smoother);
    }
    assert_eq!(round2(smoother.average()), 5.00);

    // and it stays settled
    for t in (610..=3_000).step_by(10) {
        step(t, &mut train, &mut estimator, &mut smoother);
    }
    assert_eq!(round2(smoother.average()), 5.00);
}

/// the sampling thread exits at most one iteration after the stop signal.
#[test]
fn sampling_thread_shuts_down_cooperatively() {
    let shared = SharedReading::new();
    let stop = StopSignal::new();

    let handle = {
        let shared = shared.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let source: Box<dyn SampleSource> = Box::new(SimulatedAnemometer::new(5.0));
            sampling::run_sampling_loop(
                source,
                FrequencyEstimator::new(8_000.0, 800.0, 1_000).unwrap(),
                WindowSmoother::new(20).unwrap(),
                shared,
                stop,
                Duration::from_millis(1),
            )
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    stop.trigger();
    handle.join().expect("sampler must unwind cleanly");
    assert!(shared.load().is_finite());
}

struct FixedSigner;
impl JwtSigner for FixedSigner {
    fn sign(&self, _digest: &[u8; 32]) -> Result<Vec<u8>, AgentError> {
        Ok(vec![7; 8])
    }
}

/// accept-loop HTTP server that answers every request with 200 and counts
/// how many it saw
async fn counting_sink() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_srv = hits.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let hits = hits_srv.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut seen = Vec::new();
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                    if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                hits.fetch_add(1, Ordering::SeqCst);
                let body = "{}";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.ok();
                stream.shutdown().await.ok();
            });
        }
    });
    (format!("http://{addr}/wind.json"), hits)
}

/// change suppression over real sends: a move below tolerance costs no
/// request; a move at or above it is sent and becomes the new baseline.
#[tokio::test]
async fn reporting_ticks_suppress_and_send() {
    let (url, hits) = counting_sink().await;

    let auth = AuthTokenManager::new(
        &AuthSettings {
            lenient_clock: true,
            ntp_attempts: 0,
            exchange_attempts: 0,
            ..AuthSettings::default()
        },
        Box::new(FixedSigner),
    );

    let shared = SharedReading::new();
    let mut task = ReportingTask::new(
        ConnectivityManager::new(SimulatedLink::up_after(0), "ssid", "psk"),
        auth,
        SinkSet {
            firebase: FirebaseSink::from_url(url),
            pubsub: None,
        },
        shared.clone(),
        ReportSettings {
            tolerance: 0.05,
            report_interval: Duration::from_millis(10),
            reconnect_delay: Duration::from_millis(1),
            connect_timeout_secs: 1,
        },
    );

    shared.store(10.0);
    assert_eq!(task.tick().await.unwrap(), TickOutcome::Reported);
    assert_eq!(task.last_reading(), 10.0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // within tolerance of the new baseline: no request goes out
    shared.store(10.03);
    assert_eq!(task.tick().await.unwrap(), TickOutcome::Suppressed);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // at tolerance: sent, baseline advances
    shared.store(10.06);
    assert_eq!(task.tick().await.unwrap(), TickOutcome::Reported);
    assert_eq!(task.last_reading(), 10.06);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // negative readings report their magnitude
    shared.store(-9.5);
    assert_eq!(task.tick().await.unwrap(), TickOutcome::Reported);
    assert_eq!(task.last_reading(), 9.5);
}
