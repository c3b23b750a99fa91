//! Webhook delivery for fleet controller notifications.
//!
//! One concrete [`Notifier`] implementation: an HMAC-signed, fire-and-forget
//! HTTP POST. Delivery failures are logged but never propagate back to the
//! caller, since notification delivery must never block or fail a run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tugboat_core::notifier::{Notifier, RenderedNotification};
use tugboat_types::{ErrorKind, TugboatError};

type HmacSha256 = Hmac<Sha256>;

/// Webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Enable webhook delivery (default: false).
    pub enabled: bool,
    /// URL to POST the rendered notification to.
    pub url: Option<String>,
    /// Optional shared secret; when set, requests carry an HMAC signature header.
    pub secret: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { enabled: false, url: None, secret: None, timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WebhookPayload {
    timestamp: DateTime<Utc>,
    title: String,
    body: String,
}

/// Fire-and-forget HMAC-signed webhook delivery.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    /// Build a notifier from `config`. Fails only if the config is
    /// incomplete (`enabled` with no `url`) or the HTTP client can't be built.
    pub fn new(config: &WebhookConfig) -> Result<Self, TugboatError> {
        let url = config.url.clone().ok_or_else(|| TugboatError::new(ErrorKind::ValidationError, "webhook url is required when webhooks are enabled"))?;

        let client = reqwest::blocking::Client::builder().timeout(config.timeout).build().map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to build webhook HTTP client", e))?;

        Ok(Self { client, url, secret: config.secret.clone() })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: &RenderedNotification) -> Result<(), TugboatError> {
        let payload = WebhookPayload { timestamp: Utc::now(), title: notification.title.clone(), body: notification.body.clone() };

        let client = self.client.clone();
        let url = self.url.clone();
        let secret = self.secret.clone();

        std::thread::spawn(move || {
            if let Err(e) = deliver(&client, &url, secret.as_deref(), &payload) {
                eprintln!("[warn] webhook delivery failed (non-blocking): {e:#}");
            }
        });

        Ok(())
    }
}

fn deliver(client: &reqwest::blocking::Client, url: &str, secret: Option<&str>, payload: &WebhookPayload) -> anyhow::Result<()> {
    let json = serde_json::to_string(payload)?;
    let mut request = client.post(url).header("Content-Type", "application/json");

    if let Some(secret) = secret {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
        mac.update(json.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("X-Tugboat-Signature", format!("sha256={signature}"));
    }

    let response = request.body(json).send()?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        anyhow::bail!("webhook returned error status {status}: {body}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn spawn_counter_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                counter_clone.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
            }
        });

        (format!("http://{addr}"), counter)
    }

    #[test]
    fn notify_delivers_asynchronously_without_blocking() {
        let (url, counter) = spawn_counter_server();
        let notifier = WebhookNotifier::new(&WebhookConfig { enabled: true, url: Some(url), secret: Some("s3cret".to_string()), timeout: Duration::from_secs(5) }).unwrap();

        notifier.notify(&RenderedNotification { title: "2 updates".to_string(), body: "details".to_string() }).unwrap();

        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_rejects_missing_url() {
        let config = WebhookConfig { enabled: true, url: None, secret: None, timeout: Duration::from_secs(5) };
        assert!(WebhookNotifier::new(&config).is_err());
    }
}
