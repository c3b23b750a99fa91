//! TTL-bounded, process-wide progress cache (C7).
//!
//! One map holds progress records for every layer of a run: the fleet-wide
//! fan-out, per-host runs, and per-group recreates. Readers treat a missing
//! entry as "no active run." Each layer writes only its own key; the cache
//! makes no atomicity guarantee across layers.

use moka::sync::Cache;
use tugboat_types::{AllProgress, GroupProgress, HostProgress};

use std::time::Duration;

/// Fixed key under which the fleet-wide [`AllProgress`] record lives.
pub const ALL_KEY: &str = "b3f169b2-4b2e-4f0b-9f0e-6f6f2b1f7a31";

const TTL: Duration = Duration::from_secs(600);
const MAX_CAPACITY: u64 = 10;

#[derive(Debug, Clone)]
enum Entry {
    All(AllProgress),
    Host(HostProgress),
    Group(GroupProgress),
}

/// A single process-wide progress cache, shared across every run layer.
pub struct ProgressCache {
    inner: Cache<String, Entry>,
}

impl Default for ProgressCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCache {
    /// Build an empty cache with the fixed TTL and capacity from §4.6.
    pub fn new() -> Self {
        Self { inner: Cache::builder().max_capacity(MAX_CAPACITY).time_to_live(TTL).build() }
    }

    /// `host_id:host_name` key for a host-scoped entry.
    pub fn host_key(host_id: &str, host_name: &str) -> String {
        format!("{host_id}:{host_name}")
    }

    /// `host_key:group_name` key for a group-scoped entry.
    pub fn group_key(host_key: &str, group_name: &str) -> String {
        format!("{host_key}:{group_name}")
    }

    /// Fleet-wide progress, or `None` if no fan-out is in flight.
    pub fn get_all(&self) -> Option<AllProgress> {
        match self.inner.get(ALL_KEY) {
            Some(Entry::All(v)) => Some(v),
            _ => None,
        }
    }

    /// Replace the fleet-wide progress record.
    pub fn set_all(&self, value: AllProgress) {
        self.inner.insert(ALL_KEY.to_string(), Entry::All(value));
    }

    /// Shallow-merge `f` into the fleet-wide progress record, seeding a
    /// default if none exists yet.
    pub fn update_all(&self, f: impl FnOnce(&mut AllProgress)) {
        let mut current = self.get_all().unwrap_or_default();
        f(&mut current);
        self.set_all(current);
    }

    /// Host-scoped progress, or `None` if that host has no active run.
    pub fn get_host(&self, key: &str) -> Option<HostProgress> {
        match self.inner.get(key) {
            Some(Entry::Host(v)) => Some(v),
            _ => None,
        }
    }

    /// Replace a host-scoped progress record.
    pub fn set_host(&self, key: &str, value: HostProgress) {
        self.inner.insert(key.to_string(), Entry::Host(value));
    }

    /// Shallow-merge `f` into a host-scoped progress record.
    pub fn update_host(&self, key: &str, f: impl FnOnce(&mut HostProgress)) {
        let mut current = self.get_host(key).unwrap_or_default();
        f(&mut current);
        self.set_host(key, current);
    }

    /// Group-scoped progress, or `None` if that group has no active run.
    pub fn get_group(&self, key: &str) -> Option<GroupProgress> {
        match self.inner.get(key) {
            Some(Entry::Group(v)) => Some(v),
            _ => None,
        }
    }

    /// Replace a group-scoped progress record.
    pub fn set_group(&self, key: &str, value: GroupProgress) {
        self.inner.insert(key.to_string(), Entry::Group(value));
    }

    /// Shallow-merge `f` into a group-scoped progress record.
    pub fn update_group(&self, key: &str, f: impl FnOnce(&mut GroupProgress)) {
        let mut current = self.get_group(key).unwrap_or_default();
        f(&mut current);
        self.set_group(key, current);
    }

    /// Drop a group-scoped entry, e.g. once a group finishes and its
    /// terminal state has been folded into the host's progress record.
    pub fn remove_group(&self, key: &str) {
        self.inner.invalidate(key);
    }
}

#[cfg(test)]
mod tests {
    use tugboat_types::RunStatus;

    use super::*;

    #[test]
    fn missing_entry_reads_as_no_active_run() {
        let cache = ProgressCache::new();
        assert!(cache.get_host("h1:host").is_none());
    }

    #[test]
    fn update_merges_onto_existing_or_default_entry() {
        let cache = ProgressCache::new();
        let key = ProgressCache::host_key("h1", "host");
        cache.update_host(&key, |p| {
            p.status = Some(RunStatus::Checking);
            p.available = 2;
        });
        cache.update_host(&key, |p| p.updated = 1);

        let progress = cache.get_host(&key).unwrap();
        assert_eq!(progress.status, Some(RunStatus::Checking));
        assert_eq!(progress.available, 2);
        assert_eq!(progress.updated, 1);
    }

    #[test]
    fn set_replaces_rather_than_merges() {
        let cache = ProgressCache::new();
        let key = ProgressCache::host_key("h1", "host");
        cache.update_host(&key, |p| p.available = 5);
        cache.set_host(&key, HostProgress::default());
        assert_eq!(cache.get_host(&key).unwrap().available, 0);
    }

    #[test]
    fn group_key_nests_under_host_key() {
        let host_key = ProgressCache::host_key("h1", "host");
        let group_key = ProgressCache::group_key(&host_key, "app:compose.yml");
        assert_eq!(group_key, "h1:host:app:compose.yml");
    }
}
