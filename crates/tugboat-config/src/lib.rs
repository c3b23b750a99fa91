//! TOML-backed configuration for the tugboat fleet controller.
//!
//! Loads the host registry, retry policy, and notification settings from a
//! single file. Mirrors the engine's own validation rules so a bad config
//! is rejected at load time rather than surfacing mid-run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tugboat_retry::RetryPolicy;
use tugboat_types::Host;
use tugboat_webhook::WebhookConfig;

/// Top-level controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hosts the controller manages.
    pub hosts: Vec<Host>,
    /// Retry behavior for Host Client operations.
    pub retry: RetryPolicy,
    /// Webhook delivery settings.
    pub webhook: WebhookConfig,
    /// Notification title template (see `tugboat_core::notifier::render`).
    pub notify_title_template: String,
    /// Notification body template.
    pub notify_body_template: String,
    /// Upper bound on hosts checked concurrently during a fleet-wide run.
    pub max_parallel_hosts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            retry: RetryPolicy::Default,
            webhook: WebhookConfig::default(),
            notify_title_template: "tugboat: {{available}} update(s) available".to_string(),
            notify_body_template: "{{updated}} updated, {{rolled_back}} rolled back, {{failed}} failed across {{host_count}} host(s)".to_string(),
            max_parallel_hosts: 7,
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write the config back to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw).with_context(|| format!("failed to write config file {}", path.display()))
    }

    /// Reject configs the engine could not act on correctly.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_hosts == 0 {
            bail!("max_parallel_hosts must be at least 1");
        }

        let mut seen_ids = std::collections::HashSet::new();
        for host in &self.hosts {
            if host.id.is_empty() {
                bail!("host entry is missing an id");
            }
            if !seen_ids.insert(host.id.clone()) {
                bail!("duplicate host id: {}", host.id);
            }
            if host.url.is_empty() {
                bail!("host {} is missing a url", host.id);
            }
        }

        if self.webhook.enabled && self.webhook.url.is_none() {
            bail!("webhook.enabled is true but webhook.url is not set");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_host_ids() {
        let mut config = Config::default();
        config.hosts.push(Host { id: "h1".to_string(), name: "a".to_string(), enabled: true, url: "https://a".to_string(), secret: None, timeout: std::time::Duration::from_secs(15), container_hc_timeout: std::time::Duration::from_secs(60), prune: false, prune_all: false });
        config.hosts.push(Host { id: "h1".to_string(), name: "b".to_string(), enabled: true, url: "https://b".to_string(), secret: None, timeout: std::time::Duration::from_secs(15), container_hc_timeout: std::time::Duration::from_secs(60), prune: false, prune_all: false });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_webhook_enabled_without_url() {
        let mut config = Config::default();
        config.webhook.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tugboat.toml");
        let config = Config::default();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.max_parallel_hosts, config.max_parallel_hosts);
    }
}
