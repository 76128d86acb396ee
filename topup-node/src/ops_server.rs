#![forbid(unsafe_code)]

use crate::metrics::TopupMetrics;
use crate::readiness::ReadinessState;
use fpc_core::now_unix_millis;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Response, Server};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json<T: Serialize>(status: u16, v: &T) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: serde_json::to_vec(v).unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct OpsState {
    pub readiness: Arc<ReadinessState>,
    pub metrics: Arc<TopupMetrics>,
    pub metrics_enabled: bool,
}

impl OpsState {
    fn refresh_ready_gauge(&self, now_ms: u64) {
        self.metrics
            .set_ready(self.readiness.evaluate(now_ms).is_ok());
    }
}

pub fn route(state: &OpsState, method: &str, url: &str, now_ms: u64) -> Reply {
    let path = url.split_once('?').map_or(url, |(p, _)| p);
    match (method, path) {
        ("GET", "/health") => Reply::json(200, &HealthResponse { status: "ok" }),
        ("GET", "/ready") => {
            state.refresh_ready_gauge(now_ms);
            let snap = state.readiness.snapshot(now_ms);
            Reply::json(if snap.ready { 200 } else { 503 }, &snap)
        }
        ("GET", "/metrics") if state.metrics_enabled => {
            state.refresh_ready_gauge(now_ms);
            Reply {
                status: 200,
                content_type: "text/plain; version=0.0.4",
                body: state.metrics.gather_text().into_bytes(),
            }
        }
        _ => Reply::json(
            404,
            &serde_json::json!({"error": {"code": "NOT_FOUND", "message": "not found"}}),
        ),
    }
}

pub fn bind(addr: &str) -> Result<Server, String> {
    Server::http(addr).map_err(|e| format!("failed to bind ops server on {addr}: {e}"))
}

/// Serve `/health`, `/ready` and `/metrics` on the calling thread until `stop` is set.
pub fn serve(server: Server, state: OpsState, stop: Arc<AtomicBool>) {
    info!(metrics_enabled = state.metrics_enabled, "ops server started");

    while !stop.load(Ordering::Relaxed) {
        let req = match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "ops accept failed");
                continue;
            }
        };
        let reply = route(
            &state,
            req.method().as_str(),
            req.url(),
            now_unix_millis(),
        );
        let mut resp = Response::from_data(reply.body).with_status_code(reply.status);
        if let Ok(h) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
            resp = resp.with_header(h);
        }
        if let Err(e) = req.respond(resp) {
            warn!(error = %e, "failed to write ops response");
        }
    }
    info!("ops server stopped");
}
