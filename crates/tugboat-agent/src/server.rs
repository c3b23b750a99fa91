//! The Agent Server (C4): HTTP endpoints mirroring the Host Client
//! operations, signature-verified and dispatched onto a bounded worker
//! pool because engine calls are blocking.

use std::io::Read;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tiny_http::{Method, Response, Server};
use tugboat_types::{CreateContainerBody, ErrorKind, TugboatError};

use crate::adapter::EngineAdapter;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const HEAVY_TIMEOUT: Duration = Duration::from_secs(600);

/// Whether a route is heavy enough to warrant the 600s timeout tier
/// instead of the default 15s one (§4.3): container create/start/stop/
/// restart/kill/remove, and command run.
fn is_heavy(method: &Method, segments: &[&str]) -> bool {
    match (method, segments) {
        (Method::Post, ["container", "create"]) => true,
        (Method::Post, ["container", action, _]) => matches!(*action, "start" | "stop" | "restart" | "kill"),
        (Method::Delete, ["container", "remove", _]) => true,
        (Method::Post, ["command", "run"]) => true,
        _ => false,
    }
}

/// The agent's HTTP surface, bound to one listen address and one engine.
pub struct AgentServer {
    server: Arc<Server>,
    engine: Arc<dyn EngineAdapter>,
    secret: Option<String>,
    ttl_secs: i64,
    workers: usize,
}

impl AgentServer {
    /// Bind `addr` (e.g. `"0.0.0.0:9443"`) and prepare the worker pool.
    pub fn bind(addr: &str, engine: Arc<dyn EngineAdapter>, secret: Option<String>, ttl_secs: i64, workers: usize) -> anyhow::Result<Self> {
        let server = Server::http(addr).map_err(|e| anyhow::anyhow!("failed to bind agent server on {addr}: {e}"))?;
        Ok(Self { server: Arc::new(server), engine, secret, ttl_secs, workers: workers.max(1) })
    }

    /// Run the worker pool until the process is killed. Each worker loops
    /// on `Server::recv`, which `tiny_http` permits calling concurrently
    /// from multiple threads — this is the bounded pool from §4.3.
    pub fn run(self) {
        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let server = self.server.clone();
            let engine = self.engine.clone();
            let secret = self.secret.clone();
            let ttl_secs = self.ttl_secs;
            handles.push(thread::spawn(move || {
                worker_loop(&server, &engine, secret.as_deref(), ttl_secs);
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(server: &Server, engine: &Arc<dyn EngineAdapter>, secret: Option<&str>, ttl_secs: i64) {
    loop {
        let request = match server.recv() {
            Ok(r) => r,
            Err(_) => return,
        };
        handle_request(request, engine, secret, ttl_secs);
    }
}

fn handle_request(mut request: tiny_http::Request, engine: &Arc<dyn EngineAdapter>, secret: Option<&str>, ttl_secs: i64) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let (raw_path, query) = split_query(&url);
    let path = raw_path.strip_prefix("/api").unwrap_or(&raw_path).to_string();

    let mut body = Vec::new();
    let _ = request.as_reader().read_to_end(&mut body);

    if path != "/public/health" {
        if let Err(e) = verify_signature(&request, secret, ttl_secs, method_str(&method), &path, &body) {
            respond(request, 401, json!({ "error": e.message }));
            return;
        }
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let timeout = if is_heavy(&method, &segments) { HEAVY_TIMEOUT } else { DEFAULT_TIMEOUT };

    let outcome = dispatch(&method, &segments, &query, &body, engine.clone(), timeout);

    match outcome {
        Ok(value) => respond(request, 200, value),
        Err(e) => {
            let status = status_for(&e);
            if status == 500 {
                respond(request, 500, json!({ "error": "operation exceeded its configured deadline" }));
            } else {
                respond(request, status, json!({ "error": e.message }));
            }
        }
    }
}

fn status_for(e: &TugboatError) -> u16 {
    match e.kind {
        ErrorKind::Unauthorized => 401,
        ErrorKind::NotFound => 404,
        ErrorKind::EngineError => 424,
        ErrorKind::Timeout => 500,
        _ => 500,
    }
}

fn method_str(method: &Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Post => "POST",
        Method::Delete => "DELETE",
        Method::Put => "PUT",
        Method::Patch => "PATCH",
        Method::Head => "HEAD",
        Method::Options => "OPTIONS",
        Method::Connect => "CONNECT",
        Method::Trace => "TRACE",
        Method::NonStandard(_) => "GET",
    }
}

fn verify_signature(request: &tiny_http::Request, secret: Option<&str>, ttl_secs: i64, method: &str, path: &str, body: &[u8]) -> Result<(), TugboatError> {
    let timestamp = header_value(request, "X-Timestamp").and_then(|v| v.parse::<i64>().ok()).ok_or_else(|| TugboatError::new(ErrorKind::Unauthorized, "missing or malformed X-Timestamp header"))?;
    let signature = header_value(request, "X-Signature");

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;

    tugboat_signing::verify(secret, ttl_secs, now, timestamp, signature.as_deref(), method, path, body).map_err(|e| TugboatError::new(ErrorKind::Unauthorized, e.to_string()))
}

fn header_value(request: &tiny_http::Request, name: &str) -> Option<String> {
    request.headers().iter().find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name)).map(|h| h.value.as_str().to_string())
}

fn respond(request: tiny_http::Request, status: u16, body: Value) {
    let payload = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
    let response = Response::from_string(payload).with_status_code(status).with_header(tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).expect("valid header"));
    let _ = request.respond(response);
}

fn split_query(url: &str) -> (String, std::collections::HashMap<String, String>) {
    let mut map = std::collections::HashMap::new();
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, q),
        None => (url, ""),
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        if let Some((k, v)) = pair.split_once('=') {
            map.insert(percent_decode(k), percent_decode(v));
        }
    }
    (path.to_string(), map)
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn run_with_timeout<F, T>(timeout: Duration, f: F) -> Result<T, TugboatError>
where
    F: FnOnce() -> Result<T, TugboatError> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(TugboatError::new(ErrorKind::Timeout, "operation exceeded its configured deadline")),
    }
}

fn dispatch(method: &Method, segments: &[&str], query: &std::collections::HashMap<String, String>, body: &[u8], engine: Arc<dyn EngineAdapter>, timeout: Duration) -> Result<Value, TugboatError> {
    let body_json: Value = if body.is_empty() { Value::Null } else { serde_json::from_slice(body).map_err(|e| TugboatError::with_source(ErrorKind::ValidationError, "invalid JSON request body", e))? };

    match (method, segments) {
        (Method::Get, ["public", "health"]) => Ok(json!("OK")),
        (Method::Get, ["public", "access"]) => Ok(json!("OK")),

        (Method::Post, ["container", "list"]) => {
            let all = body_json.get("all").and_then(Value::as_bool).unwrap_or(false);
            run_with_timeout(timeout, move || engine.container_list(all).and_then(to_value))
        }
        (Method::Get, ["container", "exists", container_ref]) => {
            let container_ref = container_ref.to_string();
            run_with_timeout(timeout, move || engine.container_exists(&container_ref).and_then(to_value))
        }
        (Method::Get, ["container", "inspect", container_ref]) => {
            let container_ref = container_ref.to_string();
            run_with_timeout(timeout, move || engine.container_inspect(&container_ref).and_then(to_value))
        }
        (Method::Post, ["container", "create"]) => {
            let body: CreateContainerBody = serde_json::from_value(body_json).map_err(|e| TugboatError::with_source(ErrorKind::ValidationError, "invalid container create body", e))?;
            run_with_timeout(timeout, move || engine.container_create(&body).and_then(to_value))
        }
        (Method::Post, ["container", action, container_ref]) if matches!(*action, "start" | "stop" | "restart" | "kill" | "pause" | "unpause") => {
            let container_ref = container_ref.to_string();
            let action = action.to_string();
            run_with_timeout(timeout, move || {
                let result = match action.as_str() {
                    "start" => engine.container_start(&container_ref),
                    "stop" => engine.container_stop(&container_ref),
                    "restart" => engine.container_restart(&container_ref),
                    "kill" => engine.container_kill(&container_ref),
                    "pause" => engine.container_pause(&container_ref),
                    _ => engine.container_unpause(&container_ref),
                };
                result.and_then(to_value)
            })
        }
        (Method::Delete, ["container", "remove", container_ref]) => {
            let container_ref = container_ref.to_string();
            run_with_timeout(timeout, move || engine.container_remove(&container_ref).and_then(to_value))
        }

        (Method::Post, ["image", "list"]) => {
            let filters = body_json.get("filters").cloned();
            run_with_timeout(timeout, move || engine.image_list(filters).and_then(to_value))
        }
        (Method::Get, ["image", "inspect"]) => {
            let spec = query.get("spec_or_id").cloned().ok_or_else(|| TugboatError::new(ErrorKind::ValidationError, "missing spec_or_id query parameter"))?;
            run_with_timeout(timeout, move || engine.image_inspect(&spec).and_then(to_value))
        }
        (Method::Post, ["image", "pull"]) => {
            let image = body_json.get("image").and_then(Value::as_str).ok_or_else(|| TugboatError::new(ErrorKind::ValidationError, "missing image field"))?.to_string();
            run_with_timeout(timeout, move || engine.image_pull(&image).and_then(to_value))
        }
        (Method::Post, ["image", "tag"]) => {
            let spec = body_json.get("spec_or_id").and_then(Value::as_str).ok_or_else(|| TugboatError::new(ErrorKind::ValidationError, "missing spec_or_id field"))?.to_string();
            let tag = body_json.get("tag").and_then(Value::as_str).ok_or_else(|| TugboatError::new(ErrorKind::ValidationError, "missing tag field"))?.to_string();
            run_with_timeout(timeout, move || engine.image_tag(&spec, &tag).map(|_| json!({})))
        }
        (Method::Post, ["image", "prune"]) => {
            let all = body_json.get("all").and_then(Value::as_bool).unwrap_or(false);
            run_with_timeout(timeout, move || engine.image_prune(all).and_then(to_value))
        }
        (Method::Get, ["manifest", "inspect"]) => {
            let spec = query.get("spec_or_digest").cloned().ok_or_else(|| TugboatError::new(ErrorKind::ValidationError, "missing spec_or_digest query parameter"))?;
            run_with_timeout(timeout, move || engine.manifest_inspect(&spec).and_then(to_value))
        }
        (Method::Post, ["command", "run"]) => {
            let argv: Vec<String> = body_json.get("command").and_then(|v| serde_json::from_value(v.clone()).ok()).ok_or_else(|| TugboatError::new(ErrorKind::ValidationError, "missing command array"))?;
            run_with_timeout(timeout, move || engine.command_run(&argv).map(|(stdout, stderr)| json!([stdout, stderr])))
        }

        _ => Err(TugboatError::new(ErrorKind::NotFound, format!("no route for {} {}", method_str(method), segments.join("/")))),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, TugboatError> {
    serde_json::to_value(value).map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to serialize response", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_handles_escaped_colon() {
        assert_eq!(percent_decode("app%3Alatest"), "app:latest");
    }

    #[test]
    fn split_query_extracts_path_and_params() {
        let (path, query) = split_query("/manifest/inspect?spec_or_digest=app%3Alatest");
        assert_eq!(path, "/manifest/inspect");
        assert_eq!(query.get("spec_or_digest"), Some(&"app:latest".to_string()));
    }

    #[test]
    fn status_for_maps_error_kinds_per_table() {
        assert_eq!(status_for(&TugboatError::new(ErrorKind::Unauthorized, "x")), 401);
        assert_eq!(status_for(&TugboatError::new(ErrorKind::NotFound, "x")), 404);
        assert_eq!(status_for(&TugboatError::new(ErrorKind::EngineError, "x")), 424);
        assert_eq!(status_for(&TugboatError::new(ErrorKind::Timeout, "x")), 500);
    }

    #[test]
    fn is_heavy_looks_at_the_action_segment_not_the_last_one() {
        assert!(is_heavy(&Method::Post, &["container", "start", "abc123"]));
        assert!(is_heavy(&Method::Post, &["container", "create"]));
        assert!(is_heavy(&Method::Delete, &["container", "remove", "abc123"]));
        assert!(is_heavy(&Method::Post, &["command", "run"]));
        assert!(!is_heavy(&Method::Get, &["container", "inspect", "start"]));
        assert!(!is_heavy(&Method::Post, &["image", "pull"]));
    }
}
