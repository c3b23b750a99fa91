//! Platform-variant digest resolution (C6).
//!
//! Avoids false positives from multi-arch manifests, where the top-level
//! digest differs across platforms while the runtime's own variant is
//! identical. [`resolve`] never mutates anything; the caller decides what
//! to persist from the returned [`DigestResult`].

use tugboat_types::{ContainerInspect, ContainerPolicyRow, ManifestDescriptor, TugboatError};

use crate::host_client::HostClient;

/// Outcome of resolving one container's local and remote digest sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResult {
    /// Local image id as currently observed.
    pub image_id: String,
    /// Platform-filtered digest set for the local image.
    pub local_digests: Vec<String>,
    /// Platform-filtered digest set for the image spec's remote manifest.
    pub remote_digests: Vec<String>,
    /// Whether `remote_digests` is non-empty and differs from `local_digests`.
    pub available: bool,
}

impl DigestResult {
    fn not_available(image_id: String, local_digests: Vec<String>) -> Self {
        Self { image_id, local_digests, remote_digests: Vec::new(), available: false }
    }
}

/// Resolve whether `container`'s image spec has a newer platform-matching
/// variant available. `cached` is the container's existing policy row, used
/// to skip re-resolving the local digest set when the image id is unchanged.
pub fn resolve(client: &HostClient, container: &ContainerInspect, cached: Option<&ContainerPolicyRow>) -> Result<DigestResult, TugboatError> {
    let Some(image_id) = container.image.clone() else {
        return Err(TugboatError::invariant("container has no local image id"));
    };

    let local_image = client.image_inspect(&image_id)?;
    if local_image.repo_digests.is_empty() {
        return Ok(DigestResult::not_available(image_id, Vec::new()));
    }

    let platform = local_image.architecture.clone().zip(local_image.os.clone());

    let local_digests = match cached {
        Some(row) if !row.local_digests.is_empty() && row.image_id.as_deref() == Some(image_id.as_str()) => row.local_digests.clone(),
        _ => resolve_digest_set(client, &local_image.repo_digests, platform.as_ref(), &local_image.id)?,
    };

    let Some(platform) = platform else {
        return Ok(DigestResult { image_id, local_digests, remote_digests: Vec::new(), available: false });
    };

    let Some(image_spec) = container.config.image.clone() else {
        return Ok(DigestResult { image_id, local_digests, remote_digests: Vec::new(), available: false });
    };

    let remote_manifest = client.manifest_inspect(&image_spec)?;
    let mut remote_digests = filtered_digests(&remote_manifest, Some(&platform));
    dedup_sorted(&mut remote_digests);

    let available = !remote_digests.is_empty() && remote_digests != local_digests;

    Ok(DigestResult { image_id, local_digests, remote_digests, available })
}

fn resolve_digest_set(client: &HostClient, repo_digests: &[String], platform: Option<&(String, String)>, fallback_id: &str) -> Result<Vec<String>, TugboatError> {
    let mut set = Vec::new();
    for reference in repo_digests {
        let manifest = client.manifest_inspect(reference)?;
        set.extend(filtered_digests(&manifest, platform));
    }
    if set.is_empty() {
        set.push(fallback_id.to_string());
    }
    dedup_sorted(&mut set);
    Ok(set)
}

fn filtered_digests(descriptor: &ManifestDescriptor, platform: Option<&(String, String)>) -> Vec<String> {
    match descriptor {
        ManifestDescriptor::Index { manifests } => manifests
            .iter()
            .filter(|entry| match (platform, &entry.platform) {
                (Some((arch, os)), Some(p)) => &p.architecture == arch && &p.os == os,
                _ => false,
            })
            .map(|entry| entry.digest.clone())
            .collect(),
        ManifestDescriptor::Single { config_digest } => config_digest.clone().into_iter().collect(),
    }
}

fn dedup_sorted(set: &mut Vec<String>) {
    set.sort();
    set.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_digests_picks_matching_platform_from_index() {
        let descriptor = ManifestDescriptor::Index {
            manifests: vec![
                tugboat_types::PlatformManifest { digest: "sha256:amd".to_string(), platform: Some(tugboat_types::Platform { architecture: "amd64".to_string(), os: "linux".to_string() }) },
                tugboat_types::PlatformManifest { digest: "sha256:arm".to_string(), platform: Some(tugboat_types::Platform { architecture: "arm64".to_string(), os: "linux".to_string() }) },
            ],
        };
        let digests = filtered_digests(&descriptor, Some(&("amd64".to_string(), "linux".to_string())));
        assert_eq!(digests, vec!["sha256:amd".to_string()]);
    }

    #[test]
    fn filtered_digests_single_manifest_uses_config_digest() {
        let descriptor = ManifestDescriptor::Single { config_digest: Some("sha256:config".to_string()) };
        let digests = filtered_digests(&descriptor, None);
        assert_eq!(digests, vec!["sha256:config".to_string()]);
    }

    #[test]
    fn dedup_sorted_removes_duplicates() {
        let mut v = vec!["b".to_string(), "a".to_string(), "a".to_string()];
        dedup_sorted(&mut v);
        assert_eq!(v, vec!["a".to_string(), "b".to_string()]);
    }
}
