//! InfluxDB storage sink.
//!
//! Every engine refresh produces one batch of [`SinkRecord`]s. [`InfluxSink`]
//! queues batches on a bounded channel and an [`InfluxWriter`] task posts
//! them as line protocol to the InfluxDB v2 write API. A full queue or a
//! failed write loses that batch; neither is reported back to the engine.
//!
//! # Example Configuration
//!
//! ```toml
//! [influxdb]
//! enabled = true
//! url = "http://localhost:8086"
//! org = "iotctd"
//! bucket = "smart_greenhouse"
//! # token = "..."  # or GREENHOUSE_INFLUX_TOKEN
//! ```
//!
//! # Measurements
//!
//! - `sensor_data,metric=<metric>,mode=<mode> value=<f64>`
//! - `device_status,device=<device>,mode=<mode> status=<0|1>i`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use greenhouse_core::{SinkRecord, TelemetrySink};
use reqwest::Client;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::InfluxDbConfig;

/// Format one record as an InfluxDB line with a nanosecond timestamp.
pub fn to_line(record: &SinkRecord) -> String {
    match record {
        SinkRecord::Sensor {
            metric,
            value,
            mode,
            timestamp,
        } => format!(
            "sensor_data,metric={},mode={} value={} {}",
            escape_tag(metric.as_str()),
            escape_tag(mode.as_str()),
            value,
            timestamp.unix_timestamp_nanos()
        ),
        SinkRecord::Device {
            device,
            on,
            mode,
            timestamp,
        } => format!(
            "device_status,device={},mode={} status={}i {}",
            escape_tag(device.as_str()),
            escape_tag(mode.as_str()),
            u8::from(*on),
            timestamp.unix_timestamp_nanos()
        ),
    }
}

/// Format a batch as a newline-separated line protocol body.
pub fn to_body(records: &[SinkRecord]) -> String {
    records.iter().map(to_line).collect::<Vec<_>>().join("\n")
}

/// Escape commas, spaces and equals signs in a tag value.
fn escape_tag(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
        .replace('=', "\\=")
}

/// Counters shared by the sink and its writer.
#[derive(Debug)]
pub struct StorageStats {
    url: String,
    bucket: String,
    written_points: AtomicU64,
    dropped_batches: AtomicU64,
    failed_writes: AtomicU64,
    last: Mutex<LastWrite>,
}

#[derive(Debug, Default)]
struct LastWrite {
    success: Option<OffsetDateTime>,
    error: Option<String>,
}

/// Snapshot of [`StorageStats`] for the API.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    pub enabled: bool,
    pub url: Option<String>,
    pub bucket: Option<String>,
    pub written_points: u64,
    pub dropped_batches: u64,
    pub failed_writes: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_write: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl StorageStatus {
    /// Status reported when no sink is configured.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            url: None,
            bucket: None,
            written_points: 0,
            dropped_batches: 0,
            failed_writes: 0,
            last_write: None,
            last_error: None,
        }
    }
}

impl StorageStats {
    fn new(config: &InfluxDbConfig) -> Self {
        Self {
            url: config.url.clone(),
            bucket: config.bucket.clone(),
            written_points: AtomicU64::new(0),
            dropped_batches: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
            last: Mutex::new(LastWrite::default()),
        }
    }

    fn record_success(&self, points: usize) {
        self.written_points
            .fetch_add(points as u64, Ordering::Relaxed);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.success = Some(OffsetDateTime::now_utc());
        last.error = None;
    }

    fn record_failure(&self, error: String) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .error = Some(error);
    }

    pub fn status(&self) -> StorageStatus {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        StorageStatus {
            enabled: true,
            url: Some(self.url.clone()),
            bucket: Some(self.bucket.clone()),
            written_points: self.written_points.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            last_write: last.success,
            last_error: last.error.clone(),
        }
    }
}

/// [`TelemetrySink`] that hands batches to an [`InfluxWriter`].
pub struct InfluxSink {
    tx: mpsc::Sender<Vec<SinkRecord>>,
    stats: Arc<StorageStats>,
}

impl InfluxSink {
    /// Create the sink and the writer that drains it.
    ///
    /// The writer does nothing until [`InfluxWriter::spawn`] is called.
    pub fn new(config: &InfluxDbConfig) -> Result<(Self, InfluxWriter), reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        let stats = Arc::new(StorageStats::new(config));

        let writer = InfluxWriter {
            client,
            endpoint: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
            rx,
            stats: Arc::clone(&stats),
        };
        Ok((Self { tx, stats }, writer))
    }

    pub fn stats(&self) -> Arc<StorageStats> {
        Arc::clone(&self.stats)
    }
}

impl TelemetrySink for InfluxSink {
    fn submit(&self, records: Vec<SinkRecord>) {
        if records.is_empty() {
            return;
        }
        match self.tx.try_send(records) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                self.stats.dropped_batches.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "InfluxDB buffer full; dropping {} record(s)",
                    batch.len()
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped_batches.fetch_add(1, Ordering::Relaxed);
                debug!("InfluxDB writer stopped; dropping batch");
            }
        }
    }
}

/// Background task posting queued batches to InfluxDB.
pub struct InfluxWriter {
    client: Client,
    endpoint: String,
    org: String,
    bucket: String,
    token: Option<String>,
    rx: mpsc::Receiver<Vec<SinkRecord>>,
    stats: Arc<StorageStats>,
}

impl InfluxWriter {
    /// Run the writer until `shutdown` fires or the sink is dropped.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Starting InfluxDB writer to {} (bucket: {})",
            self.endpoint, self.bucket
        );

        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("InfluxDB writer received stop signal");
                    break;
                }
                batch = self.rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            match self.write(&batch).await {
                Ok(()) => {
                    debug!("Wrote {} point(s) to InfluxDB", batch.len());
                    self.stats.record_success(batch.len());
                }
                Err(e) => {
                    warn!("Failed to write to InfluxDB: {}", e);
                    self.stats.record_failure(e.to_string());
                }
            }
        }
    }

    async fn write(&self, records: &[SinkRecord]) -> Result<(), WriteError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(to_body(records));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| WriteError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WriteError::Response {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Errors that can occur when writing to InfluxDB.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("InfluxDB returned error {status}: {body}")]
    Response { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use greenhouse_types::{Actuator, DeviceState, Metric, Mode, Reading};
    use std::collections::HashMap;
    use time::macros::datetime;

    const TS: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    #[test]
    fn test_sensor_line() {
        let record = SinkRecord::Sensor {
            metric: Metric::Temperature,
            value: 23.5,
            mode: Mode::Hardware,
            timestamp: TS,
        };
        assert_eq!(
            to_line(&record),
            format!(
                "sensor_data,metric=temperature,mode=hardware value=23.5 {}",
                TS.unix_timestamp_nanos()
            )
        );
    }

    #[test]
    fn test_device_line() {
        let on = SinkRecord::Device {
            device: Actuator::Water,
            on: true,
            mode: Mode::Simulation,
            timestamp: TS,
        };
        let off = SinkRecord::Device {
            device: Actuator::Fan,
            on: false,
            mode: Mode::Simulation,
            timestamp: TS,
        };
        assert!(to_line(&on).starts_with("device_status,device=water,mode=simulation status=1i "));
        assert!(to_line(&off).starts_with("device_status,device=fan,mode=simulation status=0i "));
    }

    #[test]
    fn test_whole_values_have_no_fraction() {
        let record = SinkRecord::Sensor {
            metric: Metric::Power,
            value: 135.0,
            mode: Mode::Simulation,
            timestamp: TS,
        };
        assert!(to_line(&record).contains(" value=135 "));
    }

    #[test]
    fn test_escape_tag() {
        assert_eq!(escape_tag("plain"), "plain");
        assert_eq!(escape_tag("a b"), "a\\ b");
        assert_eq!(escape_tag("a,b=c"), "a\\,b\\=c");
    }

    #[test]
    fn test_body_joins_lines() {
        let records =
            SinkRecord::batch(&Reading::default(), &DeviceState::default(), Mode::Simulation, TS);
        let body = to_body(&records);
        assert_eq!(body.lines().count(), 8);
        assert!(body.lines().take(4).all(|l| l.starts_with("sensor_data,")));
        assert!(body.lines().skip(4).all(|l| l.starts_with("device_status,")));
    }

    #[test]
    fn test_disabled_status() {
        let status = StorageStatus::disabled();
        assert!(!status.enabled);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["last_write"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_batches() {
        let config = InfluxDbConfig {
            enabled: true,
            buffer: 1,
            ..Default::default()
        };
        let (sink, _writer) = InfluxSink::new(&config).unwrap();
        let batch =
            SinkRecord::batch(&Reading::default(), &DeviceState::default(), Mode::Simulation, TS);

        sink.submit(batch.clone());
        sink.submit(batch.clone());
        sink.submit(batch);
        sink.submit(Vec::new());

        let status = sink.stats().status();
        assert_eq!(status.dropped_batches, 2);
        assert_eq!(status.written_points, 0);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(HashMap<String, String>, Option<String>, String)>>>);

    async fn capture(
        State(captured): State<Captured>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        captured.0.lock().unwrap().push((query, auth, body));
        StatusCode::NO_CONTENT
    }

    #[tokio::test]
    async fn test_writer_posts_line_protocol() {
        let captured = Captured::default();
        let app = Router::new()
            .route("/api/v2/write", post(capture))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = InfluxDbConfig {
            enabled: true,
            url: format!("http://{}/", addr),
            org: "iotctd".to_string(),
            bucket: "smart_greenhouse".to_string(),
            token: Some("secret".to_string()),
            ..Default::default()
        };
        let (sink, writer) = InfluxSink::new(&config).unwrap();
        let shutdown = CancellationToken::new();
        let task = writer.spawn(shutdown.clone());

        let mut devices = DeviceState::default();
        devices.set(Actuator::Light, true);
        sink.submit(SinkRecord::batch(&Reading::default(), &devices, Mode::Hardware, TS));

        let stats = sink.stats();
        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.status().written_points == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let requests = captured.0.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let (query, auth, body) = &requests[0];
        assert_eq!(query["org"], "iotctd");
        assert_eq!(query["bucket"], "smart_greenhouse");
        assert_eq!(query["precision"], "ns");
        assert_eq!(auth.as_deref(), Some("Token secret"));
        assert!(body.contains("device_status,device=light,mode=hardware status=1i"));

        let status = stats.status();
        assert_eq!(status.written_points, 8);
        assert!(status.last_write.is_some());
        assert!(status.last_error.is_none());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_records_failures() {
        let app = Router::new().route(
            "/api/v2/write",
            post(|| async { (StatusCode::UNAUTHORIZED, "unauthorized") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = InfluxDbConfig {
            enabled: true,
            url: format!("http://{}", addr),
            ..Default::default()
        };
        let (sink, writer) = InfluxSink::new(&config).unwrap();
        let _task = writer.spawn(CancellationToken::new());
        sink.submit(SinkRecord::batch(
            &Reading::default(),
            &DeviceState::default(),
            Mode::Simulation,
            TS,
        ));

        let stats = sink.stats();
        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.status().failed_writes == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let status = stats.status();
        assert_eq!(status.written_points, 0);
        assert!(status.last_error.unwrap().contains("401"));
    }
}
