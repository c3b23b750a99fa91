//! `Store` trait for pluggable persistence backends (C10).
//!
//! Only the engine-facing slice is specified: hosts the engine should act
//! on, a host's container policy rows, and the single write path the engine
//! ever uses. Anything broader (host CRUD, config import) is the
//! responsibility of whatever owns the backing store, not the engine.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tugboat_types::{ContainerPolicyRow, ErrorKind, Host, TugboatError};

/// Non-null fields to merge into a container's policy row. `None` fields
/// are left untouched on an existing row, or default on a freshly created one.
#[derive(Debug, Clone, Default)]
pub struct ContainerPolicyPartial {
    pub check_enabled: Option<bool>,
    pub update_enabled: Option<bool>,
    pub update_available: Option<bool>,
    pub image_id: Option<String>,
    pub local_digests: Option<Vec<String>>,
    pub remote_digests: Option<Vec<String>>,
    pub checked_at: Option<chrono::DateTime<Utc>>,
    pub updated_at: Option<chrono::DateTime<Utc>>,
}

/// The engine's entire view of persisted state.
pub trait Store: Send + Sync {
    /// Hosts the engine should fan out to this run.
    fn get_enabled_hosts(&self) -> Result<Vec<Host>, TugboatError>;

    /// Existing policy rows for one host, keyed by container name.
    fn get_host_containers(&self, host_id: &str) -> Result<HashMap<String, ContainerPolicyRow>, TugboatError>;

    /// Merge `partial` into the row for `(host_id, name)`, creating it if
    /// absent. The only write path the engine uses.
    fn insert_or_update_container(&self, host_id: &str, name: &str, partial: ContainerPolicyPartial) -> Result<ContainerPolicyRow, TugboatError>;

    /// The policy row for whichever container is flagged as the
    /// controller's own, if the store has one on record.
    fn get_self_container_row(&self) -> Result<Option<ContainerPolicyRow>, TugboatError>;
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct FileStoreData {
    hosts: Vec<Host>,
    containers: HashMap<String, HashMap<String, ContainerPolicyRow>>,
    self_host_id: Option<String>,
    self_container_name: Option<String>,
}

/// JSON-file-backed `Store`, written atomically via a temp file plus
/// rename so a crash mid-write never leaves a corrupt file in place.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<FileStoreData>,
}

impl FileStore {
    /// Load (or initialize) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TugboatError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read(&path).map_err(|e| TugboatError::with_source(ErrorKind::Internal, format!("failed to read store file {}", path.display()), e))?;
            serde_json::from_slice(&raw).map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to parse store file", e))?
        } else {
            FileStoreData::default()
        };
        Ok(Self { path, data: Mutex::new(data) })
    }

    /// Add or replace a host row, for use by whatever owns host lifecycle
    /// (config load, CLI `host add`). Not part of the engine-facing [`Store`] trait.
    pub fn put_host(&self, host: Host) -> Result<(), TugboatError> {
        let mut data = self.data.lock().expect("store mutex poisoned");
        data.hosts.retain(|h| h.id != host.id);
        data.hosts.push(host);
        self.persist(&data)
    }

    /// Remove a host and its container rows.
    pub fn remove_host(&self, host_id: &str) -> Result<(), TugboatError> {
        let mut data = self.data.lock().expect("store mutex poisoned");
        data.hosts.retain(|h| h.id != host_id);
        data.containers.remove(host_id);
        self.persist(&data)
    }

    /// Mark which `(host_id, container_name)` is the controller's own, so
    /// [`Store::get_self_container_row`] can resolve it.
    pub fn mark_self_container(&self, host_id: &str, name: &str) -> Result<(), TugboatError> {
        let mut data = self.data.lock().expect("store mutex poisoned");
        data.self_host_id = Some(host_id.to_string());
        data.self_container_name = Some(name.to_string());
        self.persist(&data)
    }

    fn persist(&self, data: &FileStoreData) -> Result<(), TugboatError> {
        let serialized = serde_json::to_vec_pretty(data).map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to serialize store", e))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to create temp file for store write", e))?;
        tmp.write_all(&serialized).map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to write temp store file", e))?;
        tmp.flush().map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to flush temp store file", e))?;
        tmp.persist(&self.path).map_err(|e| TugboatError::with_source(ErrorKind::Internal, "failed to finalize store file", e.error))?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get_enabled_hosts(&self) -> Result<Vec<Host>, TugboatError> {
        let data = self.data.lock().expect("store mutex poisoned");
        Ok(data.hosts.iter().filter(|h| h.enabled).cloned().collect())
    }

    fn get_host_containers(&self, host_id: &str) -> Result<HashMap<String, ContainerPolicyRow>, TugboatError> {
        let data = self.data.lock().expect("store mutex poisoned");
        Ok(data.containers.get(host_id).cloned().unwrap_or_default())
    }

    fn insert_or_update_container(&self, host_id: &str, name: &str, partial: ContainerPolicyPartial) -> Result<ContainerPolicyRow, TugboatError> {
        let mut data = self.data.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let rows = data.containers.entry(host_id.to_string()).or_default();
        let mut row = rows.get(name).cloned().unwrap_or_else(|| ContainerPolicyRow::new(host_id, name, now));

        if let Some(v) = partial.check_enabled {
            row.check_enabled = v;
        }
        if let Some(v) = partial.update_enabled {
            row.update_enabled = v;
        }
        if let Some(v) = partial.update_available {
            row.update_available = v;
        }
        if let Some(v) = partial.image_id {
            row.image_id = Some(v);
        }
        if let Some(v) = partial.local_digests {
            row.local_digests = v;
        }
        if let Some(v) = partial.remote_digests {
            row.remote_digests = v;
        }
        if let Some(v) = partial.checked_at {
            row.checked_at = Some(v);
        }
        if let Some(v) = partial.updated_at {
            row.updated_at = Some(v);
        }
        row.modified_at = now;

        rows.insert(name.to_string(), row.clone());
        self.persist(&data)?;
        Ok(row)
    }

    fn get_self_container_row(&self) -> Result<Option<ContainerPolicyRow>, TugboatError> {
        let data = self.data.lock().expect("store mutex poisoned");
        let (Some(host_id), Some(name)) = (&data.self_host_id, &data.self_container_name) else {
            return Ok(None);
        };
        Ok(data.containers.get(host_id).and_then(|rows| rows.get(name)).cloned())
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
    fn insert_or_update_creates_then_merges_non_null_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.json")).unwrap();
        store.put_host(host("h1")).unwrap();

        let row = store.insert_or_update_container("h1", "web", ContainerPolicyPartial { check_enabled: Some(true), ..Default::default() }).unwrap();
        assert!(row.check_enabled);
        assert!(!row.update_enabled);

        let row = store.insert_or_update_container("h1", "web", ContainerPolicyPartial { update_enabled: Some(true), ..Default::default() }).unwrap();
        assert!(row.check_enabled);
        assert!(row.update_enabled);
    }

    #[test]
    fn reopening_the_store_reloads_persisted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.put_host(host("h1")).unwrap();
        store.insert_or_update_container("h1", "web", ContainerPolicyPartial { check_enabled: Some(true), ..Default::default() }).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_enabled_hosts().unwrap().len(), 1);
        assert!(reopened.get_host_containers("h1").unwrap().get("web").unwrap().check_enabled);
    }

    #[test]
    fn self_container_row_is_none_until_marked() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.json")).unwrap();
        assert!(store.get_self_container_row().unwrap().is_none());

        store.put_host(host("h1")).unwrap();
        store.insert_or_update_container("h1", "controller", ContainerPolicyPartial::default()).unwrap();
        store.mark_self_container("h1", "controller").unwrap();
        assert!(store.get_self_container_row().unwrap().is_some());
    }
}
