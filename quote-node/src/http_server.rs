#![forbid(unsafe_code)]

use crate::access::{Credentials, API_KEY_HEADER};
use crate::quote_api::{ApiError, QuoteApi};
use fpc_core::signing::QuoteSigner;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

/// A transport-independent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub retry_after_secs: Option<u64>,
}

impl Reply {
    fn json<T: Serialize>(status: u16, v: &T) -> Self {
        let body = serde_json::to_vec(v).unwrap_or_else(|_| {
            b"{\"error\":{\"code\":\"INTERNAL_ERROR\",\"message\":\"encode\"}}".to_vec()
        });
        Self {
            status,
            content_type: "application/json",
            body,
            retry_after_secs: None,
        }
    }

    fn text(status: u16, content_type: &'static str, body: String) -> Self {
        Self {
            status,
            content_type,
            body: body.into_bytes(),
            retry_after_secs: None,
        }
    }
}

/// Request parts the router needs, borrowed from the transport.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub creds: Credentials<'a>,
}

pub fn route<S: QuoteSigner>(api: &QuoteApi<S>, metrics_enabled: bool, req: Inbound<'_>) -> Reply {
    let (path, query) = req.url.split_once('?').unwrap_or((req.url, ""));
    match (req.method, path) {
        ("GET", "/health") => Reply::json(200, &HealthResponse { status: "ok" }),
        ("GET", "/asset") => Reply::json(200, &api.asset()),
        ("GET", "/quote") => match api.quote(&req.creds, &parse_query(query)) {
            Ok(q) => Reply::json(200, &q),
            Err(e) => {
                let mut r = Reply::json(e.status(), &e.body());
                if let ApiError::RateLimited { retry_after_secs } = e {
                    r.retry_after_secs = Some(retry_after_secs);
                }
                r
            }
        },
        ("GET", "/metrics") if metrics_enabled => Reply::text(
            200,
            "text/plain; version=0.0.4",
            api.metrics().gather_text(),
        ),
        ("GET", "/metrics") => Reply::text(404, "text/plain", "metrics disabled\n".to_string()),
        _ => Reply::json(
            404,
            &serde_json::json!({"error": {"code": "NOT_FOUND", "message": "not found"}}),
        ),
    }
}

fn header_value<'r>(req: &'r Request, name: &str) -> Option<&'r str> {
    req.headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn to_response(reply: Reply) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut resp = Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(h) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        resp = resp.with_header(h);
    }
    if let Some(secs) = reply.retry_after_secs {
        if let Ok(h) = Header::from_bytes(&b"Retry-After"[..], secs.to_string().as_bytes()) {
            resp = resp.with_header(h);
        }
    }
    resp
}

fn handle<S: QuoteSigner>(api: &QuoteApi<S>, metrics_enabled: bool, req: Request) {
    let url = req.url().to_string();
    let method = req.method().as_str().to_string();
    let remote = req
        .remote_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_default();
    let reply = route(
        api,
        metrics_enabled,
        Inbound {
            method: &method,
            url: &url,
            creds: Credentials {
                api_key: header_value(&req, API_KEY_HEADER),
                trusted_header: header_value(&req, api.gate().trusted_header_name()),
                remote_addr: &remote,
            },
        },
    );
    if let Err(e) = req.respond(to_response(reply)) {
        warn!(error = %e, "failed to write http response");
    }
}

/// Serve until `stop` is set. Each worker polls the listener so shutdown is
/// noticed within one poll interval.
pub fn serve<S: QuoteSigner + 'static>(
    bind: &str,
    workers: usize,
    api: Arc<QuoteApi<S>>,
    metrics_enabled: bool,
    stop: Arc<AtomicBool>,
) -> Result<(), String> {
    let server = Arc::new(
        Server::http(bind).map_err(|e| format!("failed to bind http server on {bind}: {e}"))?,
    );
    info!(bind, workers, "quote-node http server started");

    let handles = (0..workers.max(1))
        .map(|i| {
            let server = server.clone();
            let api = api.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(format!("quote-http-{i}"))
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        match server.recv_timeout(POLL_INTERVAL) {
                            Ok(Some(req)) => handle(&api, metrics_enabled, req),
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "http accept failed"),
                        }
                    }
                })
                .map_err(|e| format!("failed to spawn http worker: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for h in handles {
        let _ = h.join();
    }
    info!("quote-node http server stopped");
    Ok(())
}

fn parse_query(q: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for part in q.split('&') {
        if part.trim().is_empty() {
            continue;
        }
        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        out.insert(url_decode(k), url_decode(v));
    }
    out
}

fn url_decode(s: &str) -> String {
    // Minimal query decoding: '+' as space and %XX.
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (from_hex(bytes[i + 1]), from_hex(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn from_hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
