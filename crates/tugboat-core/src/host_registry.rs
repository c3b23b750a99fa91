//! One Host Client per enabled host (C3).
//!
//! A thread-safe map from host id to [`HostClient`]. Host lifecycle changes
//! (create, update, enable, disable, delete) are reflected by rebuilding or
//! removing the cached client; a lookup against a host the registry hasn't
//! seen yet lazily constructs one rather than failing.

use std::collections::HashMap;
use std::sync::RwLock;

use tugboat_retry::RetryPolicy;
use tugboat_types::{ErrorKind, Host, TugboatError};

use crate::host_client::HostClient;

/// Registry of live agent clients, one per enabled host.
pub struct HostRegistry {
    clients: RwLock<HashMap<String, HostClient>>,
    retry: RetryPolicy,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self { clients: RwLock::new(HashMap::new()), retry: RetryPolicy::Default }
    }
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose clients retry Host Client calls per `retry`.
    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        Self { clients: RwLock::new(HashMap::new()), retry }
    }

    /// Instantiate and cache a client for a newly created or re-enabled host.
    pub fn register(&self, host: &Host) -> Result<(), TugboatError> {
        let client = HostClient::with_retry_policy(host, self.retry)?;
        self.clients.write().expect("host registry poisoned").insert(host.id.clone(), client);
        Ok(())
    }

    /// Remove, then re-instantiate, the client for a host whose config changed.
    pub fn refresh(&self, host: &Host) -> Result<(), TugboatError> {
        self.clients.write().expect("host registry poisoned").remove(&host.id);
        self.register(host)
    }

    /// Remove a host's client on delete or disable.
    pub fn remove(&self, host_id: &str) {
        self.clients.write().expect("host registry poisoned").remove(host_id);
    }

    /// The cached client for `host_id`, if the registry has one.
    pub fn get(&self, host_id: &str) -> Option<HostClient> {
        self.clients.read().expect("host registry poisoned").get(host_id).cloned()
    }

    /// The cached client for `host`, lazily constructing and inserting one
    /// if missing (defensive: the registry should have been kept in sync by
    /// [`HostRegistry::register`], but a lookup must never fail just
    /// because that didn't happen).
    pub fn get_or_insert(&self, host: &Host) -> Result<HostClient, TugboatError> {
        if let Some(client) = self.get(&host.id) {
            return Ok(client);
        }
        self.register(host)?;
        self.get(&host.id).ok_or_else(|| TugboatError::new(ErrorKind::Internal, "host client vanished immediately after insert"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn host(id: &str) -> Host {
        Host { id: id.to_string(), name: id.to_string(), enabled: true, url: "https://agent.local".to_string(), secret: None, timeout: Duration::from_secs(15), container_hc_timeout: Duration::from_secs(60), prune: false, prune_all: false }
    }

    #[test]
    fn lookup_miss_lazily_constructs_a_client() {
        let registry = HostRegistry::new();
        let host = host("h1");
        assert!(registry.get("h1").is_none());
        let client = registry.get_or_insert(&host).unwrap();
        let _ = client;
        assert!(registry.get("h1").is_some());
    }

    #[test]
    fn remove_drops_the_cached_client() {
        let registry = HostRegistry::new();
        registry.register(&host("h1")).unwrap();
        registry.remove("h1");
        assert!(registry.get("h1").is_none());
    }

    #[test]
    fn with_retry_policy_is_used_for_every_client_it_registers() {
        let registry = HostRegistry::with_retry_policy(RetryPolicy::Aggressive);
        registry.register(&host("h1")).unwrap();
        assert!(registry.get("h1").is_some());
    }

    #[test]
    fn refresh_replaces_the_cached_client() {
        let registry = HostRegistry::new();
        registry.register(&host("h1")).unwrap();
        let mut updated = host("h1");
        updated.url = "https://agent2.local".to_string();
        registry.refresh(&updated).unwrap();
        assert!(registry.get("h1").is_some());
    }
}
