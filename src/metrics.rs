//! Prometheus-compatible metrics endpoint
//!
//! Exposes viewer health counters in Prometheus format, plus the
//! last-snapshot timestamp the view uses to mark its scene as stale.
//! `/status` reports what the view is currently showing: lifecycle
//! state, last surfaced fault and snapshot age.
//! Endpoint is only started when `METRICS_PORT` is set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, info};

/// Scene older than this is reported as stale on `/status`
const STALE_AFTER: Duration = Duration::from_secs(5);

/// Last state published by the arena view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewReport {
    pub arena_id: String,
    pub state: &'static str,
    pub connection: &'static str,
    pub last_error: Option<String>,
    pub has_snapshot: bool,
    pub effects: usize,
}

/// Body of the `/status` route
#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    view: Option<&'a ViewReport>,
    snapshot_age_seconds: Option<f64>,
    stale: bool,
    entities: u64,
    transport_errors: u64,
    parse_errors: u64,
    uptime_seconds: u64,
}

/// Metrics registry for one viewer process
#[derive(Debug)]
pub struct ViewerMetrics {
    // Transport
    pub connection_attempts: AtomicU64,
    pub connections_opened: AtomicU64,
    pub transport_errors: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub update_requests_sent: AtomicU64,

    // Reconciliation
    pub snapshots_applied: AtomicU64,
    pub lasers_received: AtomicU64,
    pub server_notices: AtomicU64,
    pub parse_errors: AtomicU64,

    // Entities
    pub entities_created: AtomicU64,
    pub entities_updated: AtomicU64,
    pub entities_removed: AtomicU64,
    pub entities_live: AtomicU64,

    // Effects
    pub effects_live: AtomicU64,
    pub effects_invalidated: AtomicU64,
    pub effects_faded: AtomicU64,
    pub effects_expired: AtomicU64,
    pub stale_timers: AtomicU64,

    // Rendering
    pub frames_rendered: AtomicU64,
    pub render_errors: AtomicU64,
    pub scene_rebuilds: AtomicU64,

    start_time: Instant,
    last_snapshot: RwLock<Option<Instant>>,
    view: RwLock<Option<ViewReport>>,
}

impl ViewerMetrics {
    pub fn new() -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            update_requests_sent: AtomicU64::new(0),
            snapshots_applied: AtomicU64::new(0),
            lasers_received: AtomicU64::new(0),
            server_notices: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            entities_created: AtomicU64::new(0),
            entities_updated: AtomicU64::new(0),
            entities_removed: AtomicU64::new(0),
            entities_live: AtomicU64::new(0),
            effects_live: AtomicU64::new(0),
            effects_invalidated: AtomicU64::new(0),
            effects_faded: AtomicU64::new(0),
            effects_expired: AtomicU64::new(0),
            stale_timers: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            render_errors: AtomicU64::new(0),
            scene_rebuilds: AtomicU64::new(0),
            start_time: Instant::now(),
            last_snapshot: RwLock::new(None),
            view: RwLock::new(None),
        }
    }

    /// Count one raw inbound frame
    pub fn record_message(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Mark a successful snapshot ingest at `at`
    pub fn record_snapshot(&self, at: Instant) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
        *self.last_snapshot.write() = Some(at);
    }

    pub fn last_snapshot_at(&self) -> Option<Instant> {
        *self.last_snapshot.read()
    }

    /// Time since the last applied snapshot, `None` if there never was one
    pub fn since_last_snapshot(&self, now: Instant) -> Option<Duration> {
        self.last_snapshot_at()
            .map(|at| now.saturating_duration_since(at))
    }

    pub fn seconds_since_last_snapshot(&self) -> Option<f64> {
        self.since_last_snapshot(Instant::now())
            .map(|d| d.as_secs_f64())
    }

    pub fn publish_view(&self, report: ViewReport) {
        *self.view.write() = Some(report);
    }

    pub fn view_report(&self) -> Option<ViewReport> {
        self.view.read().clone()
    }

    /// JSON for `/status`
    pub fn status_json(&self, now: Instant) -> String {
        let view = self.view.read();
        let age = self.since_last_snapshot(now);
        let body = StatusBody {
            view: view.as_ref(),
            snapshot_age_seconds: age.map(|d| d.as_secs_f64()),
            stale: age.map_or(true, |d| d > STALE_AFTER),
            entities: self.entities_live.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
        };
        serde_json::to_string_pretty(&body).unwrap_or_else(|_| "{}".to_string())
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Transport
        metric!("arena_viewer_connection_attempts_total", "Connection attempts", "counter",
            self.connection_attempts.load(Ordering::Relaxed));
        metric!("arena_viewer_connections_opened_total", "Connections successfully opened", "counter",
            self.connections_opened.load(Ordering::Relaxed));
        metric!("arena_viewer_transport_errors_total", "Connect or mid-session transport errors", "counter",
            self.transport_errors.load(Ordering::Relaxed));
        metric!("arena_viewer_messages_received_total", "Inbound frames received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("arena_viewer_bytes_received_total", "Inbound bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("arena_viewer_update_requests_total", "Update requests sent", "counter",
            self.update_requests_sent.load(Ordering::Relaxed));

        // Reconciliation
        metric!("arena_viewer_snapshots_applied_total", "Snapshots applied", "counter",
            self.snapshots_applied.load(Ordering::Relaxed));
        metric!("arena_viewer_lasers_received_total", "Laser effects received", "counter",
            self.lasers_received.load(Ordering::Relaxed));
        metric!("arena_viewer_server_notices_total", "Server error notices", "counter",
            self.server_notices.load(Ordering::Relaxed));
        metric!("arena_viewer_parse_errors_total", "Inbound payloads rejected", "counter",
            self.parse_errors.load(Ordering::Relaxed));

        // Entities
        metric!("arena_viewer_entities_created_total", "Entities created", "counter",
            self.entities_created.load(Ordering::Relaxed));
        metric!("arena_viewer_entities_updated_total", "Entity updates", "counter",
            self.entities_updated.load(Ordering::Relaxed));
        metric!("arena_viewer_entities_removed_total", "Entities removed", "counter",
            self.entities_removed.load(Ordering::Relaxed));
        metric!("arena_viewer_entities", "Entities currently tracked", "gauge",
            self.entities_live.load(Ordering::Relaxed));

        // Effects
        metric!("arena_viewer_effects", "Effects currently visible", "gauge",
            self.effects_live.load(Ordering::Relaxed));
        metric!("arena_viewer_effects_invalidated_total", "Effects dropped because their origin moved", "counter",
            self.effects_invalidated.load(Ordering::Relaxed));
        metric!("arena_viewer_effects_faded_total", "Effects demoted to the faded phase", "counter",
            self.effects_faded.load(Ordering::Relaxed));
        metric!("arena_viewer_effects_expired_total", "Effects discarded by their timers", "counter",
            self.effects_expired.load(Ordering::Relaxed));
        metric!("arena_viewer_stale_timers_total", "Timers that fired for already-removed effects", "counter",
            self.stale_timers.load(Ordering::Relaxed));

        // Rendering
        metric!("arena_viewer_frames_rendered_total", "Frames rendered", "counter",
            self.frames_rendered.load(Ordering::Relaxed));
        metric!("arena_viewer_render_errors_total", "Frame output failures", "counter",
            self.render_errors.load(Ordering::Relaxed));
        metric!("arena_viewer_scene_rebuilds_total", "Scene rebuilds after dimension changes", "counter",
            self.scene_rebuilds.load(Ordering::Relaxed));

        // -1 means no snapshot yet
        let age = self.seconds_since_last_snapshot().unwrap_or(-1.0);
        metric!("arena_viewer_snapshot_age_seconds", "Seconds since the last snapshot", "gauge",
            format!("{:.3}", age));
        metric!("arena_viewer_uptime_seconds", "Viewer uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let age = match self.seconds_since_last_snapshot() {
            Some(s) => format!("{:.3}", s),
            None => "null".to_string(),
        };
        format!(r#"{{
  "transport": {{
    "connection_attempts": {},
    "connections_opened": {},
    "errors": {},
    "messages_received": {},
    "bytes_received": {},
    "update_requests": {}
  }},
  "reconcile": {{
    "snapshots": {},
    "lasers": {},
    "server_notices": {},
    "parse_errors": {},
    "snapshot_age_seconds": {}
  }},
  "entities": {{
    "live": {},
    "created": {},
    "updated": {},
    "removed": {}
  }},
  "effects": {{
    "live": {},
    "invalidated": {},
    "faded": {},
    "expired": {},
    "stale_timers": {}
  }},
  "render": {{
    "frames": {},
    "errors": {},
    "rebuilds": {},
    "uptime_seconds": {}
  }}
}}"#,
            self.connection_attempts.load(Ordering::Relaxed),
            self.connections_opened.load(Ordering::Relaxed),
            self.transport_errors.load(Ordering::Relaxed),
            self.messages_received.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.update_requests_sent.load(Ordering::Relaxed),
            self.snapshots_applied.load(Ordering::Relaxed),
            self.lasers_received.load(Ordering::Relaxed),
            self.server_notices.load(Ordering::Relaxed),
            self.parse_errors.load(Ordering::Relaxed),
            age,
            self.entities_live.load(Ordering::Relaxed),
            self.entities_created.load(Ordering::Relaxed),
            self.entities_updated.load(Ordering::Relaxed),
            self.entities_removed.load(Ordering::Relaxed),
            self.effects_live.load(Ordering::Relaxed),
            self.effects_invalidated.load(Ordering::Relaxed),
            self.effects_faded.load(Ordering::Relaxed),
            self.effects_expired.load(Ordering::Relaxed),
            self.stale_timers.load(Ordering::Relaxed),
            self.frames_rendered.load(Ordering::Relaxed),
            self.render_errors.load(Ordering::Relaxed),
            self.scene_rebuilds.load(Ordering::Relaxed),
            self.uptime_seconds(),
        )
    }
}

impl Default for ViewerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
}

/// Map one request to a full HTTP response
fn respond(metrics: &ViewerMetrics, request: &str) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("GET "))
        .and_then(|rest| rest.split_whitespace().next());

    match path {
        Some("/metrics/json") => http_response("200 OK", "application/json", &metrics.to_json()),
        Some("/metrics") => {
            http_response("200 OK", "text/plain; version=0.0.4", &metrics.to_prometheus())
        }
        Some("/status") => {
            http_response("200 OK", "application/json", &metrics.status_json(Instant::now()))
        }
        // Unhealthy only once the view has given up on its connection
        Some("/health") => match metrics.view_report() {
            Some(report) if report.state == "errored" => {
                http_response("503 Service Unavailable", "text/plain", "ERRORED")
            }
            _ => http_response("200 OK", "text/plain", "OK"),
        },
        _ => http_response("404 Not Found", "text/plain", ""),
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<ViewerMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Viewer status on http://{}/status, metrics on /metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            let n = match socket.read(&mut buffer).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                    return;
                }
            };
            let response = match std::str::from_utf8(&buffer[..n]) {
                Ok(request) => respond(&metrics, request),
                Err(_) => http_response("400 Bad Request", "text/plain", ""),
            };
            if let Err(e) = socket.write_all(response.as_bytes()).await {
                debug!("Failed to write metrics response to {}: {}", peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = ViewerMetrics::new();
        assert_eq!(metrics.snapshots_applied.load(Ordering::Relaxed), 0);
        assert!(metrics.last_snapshot_at().is_none());
    }

    #[test]
    fn test_record_message() {
        let metrics = ViewerMetrics::new();
        metrics.record_message(120);
        metrics.record_message(30);
        assert_eq!(metrics.messages_received.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.bytes_received.load(Ordering::Relaxed), 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_age() {
        let metrics = ViewerMetrics::new();
        assert!(metrics.since_last_snapshot(Instant::now()).is_none());

        metrics.record_snapshot(Instant::now());
        tokio::time::advance(Duration::from_secs(4)).await;

        let age = metrics.since_last_snapshot(Instant::now()).unwrap();
        assert_eq!(age, Duration::from_secs(4));
        assert_eq!(metrics.snapshots_applied.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = ViewerMetrics::new();
        metrics.parse_errors.store(3, Ordering::Relaxed);
        metrics.entities_live.store(2, Ordering::Relaxed);

        let output = metrics.to_prometheus();

        assert!(output.contains("arena_viewer_parse_errors_total 3"));
        assert!(output.contains("arena_viewer_entities 2"));
        assert!(output.contains("arena_viewer_snapshot_age_seconds -1.000"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = ViewerMetrics::new();
        metrics.lasers_received.store(7, Ordering::Relaxed);

        let output = metrics.to_json();

        assert!(output.contains("\"lasers\": 7"));
        assert!(output.contains("\"snapshot_age_seconds\": null"));
        assert!(output.contains("\"effects\":"));
    }

    fn report(state: &'static str, last_error: Option<&str>) -> ViewReport {
        ViewReport {
            arena_id: "7".to_string(),
            state,
            connection: "closed",
            last_error: last_error.map(str::to_string),
            has_snapshot: true,
            effects: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_json() {
        let metrics = ViewerMetrics::new();
        let body: serde_json::Value =
            serde_json::from_str(&metrics.status_json(Instant::now())).unwrap();
        assert!(body["view"].is_null());
        assert!(body["snapshot_age_seconds"].is_null());
        assert_eq!(body["stale"], true);

        metrics.record_snapshot(Instant::now());
        metrics.publish_view(report("errored", Some("Connection error: reset")));
        tokio::time::advance(Duration::from_secs(2)).await;

        let body: serde_json::Value =
            serde_json::from_str(&metrics.status_json(Instant::now())).unwrap();
        assert_eq!(body["view"]["arena_id"], "7");
        assert_eq!(body["view"]["state"], "errored");
        assert_eq!(body["view"]["last_error"], "Connection error: reset");
        assert_eq!(body["snapshot_age_seconds"], 2.0);
        assert_eq!(body["stale"], false);

        tokio::time::advance(Duration::from_secs(10)).await;
        let body: serde_json::Value =
            serde_json::from_str(&metrics.status_json(Instant::now())).unwrap();
        assert_eq!(body["stale"], true);
    }

    #[test]
    fn test_routes() {
        let metrics = ViewerMetrics::new();
        let get = |path: &str| respond(&metrics, &format!("GET {} HTTP/1.1\r\nHost: x\r\n\r\n", path));

        assert!(get("/metrics").contains("text/plain; version=0.0.4"));
        assert!(get("/metrics/json").contains("\"transport\""));
        assert!(get("/status").contains("\"stale\": true"));
        assert!(get("/health").ends_with("OK"));
        assert!(get("/metricsx").starts_with("HTTP/1.1 404"));
        assert!(respond(&metrics, "POST /status HTTP/1.1\r\n\r\n").starts_with("HTTP/1.1 404"));

        metrics.publish_view(report("errored", Some("Connection error: reset")));
        assert!(get("/health").starts_with("HTTP/1.1 503"));
        metrics.publish_view(report("connected", None));
        assert!(get("/health").starts_with("HTTP/1.1 200"));
    }
}
