//! Typed remote operations against one agent (C2).
//!
//! Every operation wraps one signed HTTP round-trip. Errors are categorized
//! into transport failures (connect/read/timeout), protocol failures
//! (non-2xx with the body echoed), and typed engine errors translated from
//! specific status codes, matching the agent's error-mapping table (§6).
//! Retryable and ambiguous failures (transport errors, timeouts, and
//! agent-reported engine errors) are retried per the client's
//! [`RetryPolicy`] before giving up.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tugboat_retry::{ErrorClass, RetryPolicy, RetryStrategyConfig, calculate_delay};

use tugboat_types::{ContainerInspect, CreateContainerBody, ErrorKind, Host, ImageInspect, ManifestDescriptor, TugboatError};

/// A synchronous client bound to one host's agent.
///
/// Stateless apart from its base URL, secret, timeout, and retry config —
/// safe to hold for the lifetime of the `enabled` host (see
/// [`crate::host_registry`]).
#[derive(Debug, Clone)]
pub struct HostClient {
    base_url: String,
    secret: Option<String>,
    timeout: Duration,
    heavy_timeout: Duration,
    retry: RetryStrategyConfig,
    http: Client,
}

/// Operations taking longer than the default per-call timeout (§4.3).
const HEAVY_TIMEOUT: Duration = Duration::from_secs(600);

/// Which [`ErrorKind`]s are worth retrying: transport errors and timeouts
/// are `Retryable`, an agent-reported engine error is `Ambiguous` since the
/// operation may have partially applied, everything else is `Permanent`.
fn classify(kind: ErrorKind) -> ErrorClass {
    match kind {
        ErrorKind::TransportError | ErrorKind::Timeout => ErrorClass::Retryable,
        ErrorKind::EngineError => ErrorClass::Ambiguous,
        ErrorKind::Unauthorized | ErrorKind::NotFound | ErrorKind::ValidationError | ErrorKind::InvariantViolation | ErrorKind::Internal => ErrorClass::Permanent,
    }
}

impl HostClient {
    /// Build a client for a host row. Fails only if the HTTP client itself
    /// cannot be constructed (e.g. TLS backend init failure).
    pub fn new(host: &Host) -> Result<Self, TugboatError> {
        Self::with_retry_policy(host, RetryPolicy::Default)
    }

    /// Build a client for a host row using a specific [`RetryPolicy`].
    pub fn with_retry_policy(host: &Host, retry: RetryPolicy) -> Result<Self, TugboatError> {
        let http = Client::builder()
            .user_agent(format!("tugboat-agent-client/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to build HTTP client", e))?;

        Ok(Self {
            base_url: host.url.trim_end_matches('/').to_string(),
            secret: host.secret.clone(),
            timeout: host.timeout,
            heavy_timeout: HEAVY_TIMEOUT,
            retry: retry.to_config(),
            http,
        })
    }

    /// `GET /public/health` — liveness probe.
    pub fn public_health(&self) -> Result<(), TugboatError> {
        self.call_no_body::<Value>(reqwest::Method::GET, "/public/health", false)?;
        Ok(())
    }

    /// `GET /public/access` — signature verification probe.
    pub fn public_access(&self) -> Result<(), TugboatError> {
        self.call_no_body::<Value>(reqwest::Method::GET, "/public/access", false)?;
        Ok(())
    }

    /// `POST /container/list`.
    pub fn container_list(&self, all: bool) -> Result<Vec<ContainerInspect>, TugboatError> {
        self.call(reqwest::Method::POST, "/container/list", &serde_json::json!({ "all": all }), false)
    }

    /// `GET /container/exists/{ref}`.
    pub fn container_exists(&self, container_ref: &str) -> Result<bool, TugboatError> {
        let path = format!("/container/exists/{container_ref}");
        self.call_no_body(reqwest::Method::GET, &path, false)
    }

    /// `GET /container/inspect/{ref}`.
    pub fn container_inspect(&self, container_ref: &str) -> Result<ContainerInspect, TugboatError> {
        let path = format!("/container/inspect/{container_ref}");
        self.call_no_body(reqwest::Method::GET, &path, false)
    }

    /// `POST /container/create`.
    pub fn container_create(&self, body: &CreateContainerBody) -> Result<ContainerInspect, TugboatError> {
        self.call(reqwest::Method::POST, "/container/create", body, true)
    }

    /// `POST /container/start/{ref}`.
    pub fn container_start(&self, container_ref: &str) -> Result<String, TugboatError> {
        self.lifecycle_call("start", container_ref, true)
    }

    /// `POST /container/stop/{ref}`.
    pub fn container_stop(&self, container_ref: &str) -> Result<String, TugboatError> {
        self.lifecycle_call("stop", container_ref, true)
    }

    /// `POST /container/restart/{ref}`.
    pub fn container_restart(&self, container_ref: &str) -> Result<String, TugboatError> {
        self.lifecycle_call("restart", container_ref, true)
    }

    /// `POST /container/kill/{ref}`.
    pub fn container_kill(&self, container_ref: &str) -> Result<String, TugboatError> {
        self.lifecycle_call("kill", container_ref, true)
    }

    /// `POST /container/pause/{ref}`.
    pub fn container_pause(&self, container_ref: &str) -> Result<String, TugboatError> {
        self.lifecycle_call("pause", container_ref, false)
    }

    /// `POST /container/unpause/{ref}`.
    pub fn container_unpause(&self, container_ref: &str) -> Result<String, TugboatError> {
        self.lifecycle_call("unpause", container_ref, false)
    }

    /// `DELETE /container/remove/{ref}`.
    pub fn container_remove(&self, container_ref: &str) -> Result<String, TugboatError> {
        let path = format!("/container/remove/{container_ref}");
        self.call_no_body(reqwest::Method::DELETE, &path, true)
    }

    /// `POST /image/list`.
    pub fn image_list(&self, filters: Option<Value>) -> Result<Vec<ImageInspect>, TugboatError> {
        self.call(reqwest::Method::POST, "/image/list", &serde_json::json!({ "filters": filters }), false)
    }

    /// `GET /image/inspect`.
    pub fn image_inspect(&self, spec_or_id: &str) -> Result<ImageInspect, TugboatError> {
        self.call(reqwest::Method::GET, "/image/inspect", &serde_json::json!({ "spec_or_id": spec_or_id }), false)
    }

    /// `POST /image/pull`.
    pub fn image_pull(&self, image: &str) -> Result<ImageInspect, TugboatError> {
        self.call(reqwest::Method::POST, "/image/pull", &serde_json::json!({ "image": image }), true)
    }

    /// `POST /image/tag`.
    pub fn image_tag(&self, spec_or_id: &str, tag: &str) -> Result<(), TugboatError> {
        self.call::<Value, _>(
            reqwest::Method::POST,
            "/image/tag",
            &serde_json::json!({ "spec_or_id": spec_or_id, "tag": tag }),
            false,
        )?;
        Ok(())
    }

    /// `POST /image/prune`.
    pub fn image_prune(&self, all: bool) -> Result<String, TugboatError> {
        self.call(reqwest::Method::POST, "/image/prune", &serde_json::json!({ "all": all }), false)
    }

    /// `GET /manifest/inspect?spec_or_digest=`.
    pub fn manifest_inspect(&self, spec_or_digest: &str) -> Result<ManifestDescriptor, TugboatError> {
        let path = format!("/manifest/inspect?spec_or_digest={}", urlencode(spec_or_digest));
        self.call_no_body(reqwest::Method::GET, &path, false)
    }

    /// `POST /command/run` — escape hatch for operations the create body
    /// cannot express in a single call (e.g. multi-network alias connects).
    pub fn command_run(&self, argv: &[String]) -> Result<(String, String), TugboatError> {
        let out: [String; 2] = self.call(reqwest::Method::POST, "/command/run", &serde_json::json!({ "command": argv }), true)?;
        let [stdout, stderr] = out;
        Ok((stdout, stderr))
    }

    fn lifecycle_call(&self, action: &str, container_ref: &str, heavy: bool) -> Result<String, TugboatError> {
        let path = format!("/container/{action}/{container_ref}");
        self.call_no_body(reqwest::Method::POST, &path, heavy)
    }

    fn call_no_body<T: DeserializeOwned>(&self, method: reqwest::Method, path: &str, heavy: bool) -> Result<T, TugboatError> {
        self.call(method, path, &Value::Null, heavy)
    }

    fn call<T: DeserializeOwned, B: Serialize>(&self, method: reqwest::Method, path: &str, body: &B, heavy: bool) -> Result<T, TugboatError> {
        let body_bytes = if matches!(serde_json::to_value(body), Ok(Value::Null)) {
            Vec::new()
        } else {
            serde_json::to_vec(body).map_err(|e| TugboatError::with_source(ErrorKind::ValidationError, "failed to serialize request body", e))?
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once::<T>(&method, path, &body_bytes, heavy) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if classify(e.kind) == ErrorClass::Permanent || attempt >= self.retry.max_attempts {
                        return Err(e);
                    }
                    thread::sleep(calculate_delay(&self.retry, attempt));
                }
            }
        }
    }

    fn send_once<T: DeserializeOwned>(&self, method: &reqwest::Method, path: &str, body_bytes: &[u8], heavy: bool) -> Result<T, TugboatError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
        let headers = tugboat_signing::sign(self.secret.as_deref(), method.as_str(), path, body_bytes, now);

        let url = format!("{}{}", self.base_url, path);
        let timeout = if heavy { self.heavy_timeout } else { self.timeout };

        let mut req = self.http.request(method.clone(), &url).timeout(timeout).header("X-Timestamp", headers.timestamp.to_string());
        if let Some(sig) = &headers.signature {
            req = req.header("X-Signature", sig);
        }
        if !body_bytes.is_empty() {
            req = req.header("Content-Type", "application/json").body(body_bytes.to_vec());
        }

        let response = req.send().map_err(|e| {
            if e.is_timeout() {
                TugboatError::with_source(ErrorKind::Timeout, format!("request to {url} timed out"), e)
            } else {
                TugboatError::with_source(ErrorKind::TransportError, format!("request to {url} failed"), e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to parse agent response", e));
        }

        let detail = response.text().unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => TugboatError::new(ErrorKind::Unauthorized, detail),
            StatusCode::NOT_FOUND => TugboatError::new(ErrorKind::NotFound, detail),
            StatusCode::FAILED_DEPENDENCY => TugboatError::new(ErrorKind::EngineError, detail),
            s if s.as_u16() == 500 => TugboatError::new(ErrorKind::Timeout, detail),
            s => TugboatError::new(ErrorKind::Internal, format!("unexpected status {s}: {detail}")),
        })
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_leaves_safe_chars_untouched() {
        assert_eq!(urlencode("app:latest"), "app%3Alatest");
        assert_eq!(urlencode("sha256-abc_123.0~"), "sha256-abc_123.0~");
    }

    #[test]
    fn classify_matches_the_documented_error_table() {
        assert_eq!(classify(ErrorKind::TransportError), ErrorClass::Retryable);
        assert_eq!(classify(ErrorKind::Timeout), ErrorClass::Retryable);
        assert_eq!(classify(ErrorKind::EngineError), ErrorClass::Ambiguous);
        assert_eq!(classify(ErrorKind::Unauthorized), ErrorClass::Permanent);
        assert_eq!(classify(ErrorKind::NotFound), ErrorClass::Permanent);
        assert_eq!(classify(ErrorKind::ValidationError), ErrorClass::Permanent);
        assert_eq!(classify(ErrorKind::InvariantViolation), ErrorClass::Permanent);
        assert_eq!(classify(ErrorKind::Internal), ErrorClass::Permanent);
    }

    #[test]
    fn with_retry_policy_stores_the_requested_policy_config() {
        let host = Host { id: "h1".to_string(), name: "h1".to_string(), enabled: true, url: "https://agent.local".to_string(), secret: None, timeout: Duration::from_secs(15), container_hc_timeout: Duration::from_secs(60), prune: false, prune_all: false };
        let client = HostClient::with_retry_policy(&host, RetryPolicy::Aggressive).unwrap();
        assert_eq!(client.retry.max_attempts, RetryPolicy::Aggressive.to_config().max_attempts);
    }
}
