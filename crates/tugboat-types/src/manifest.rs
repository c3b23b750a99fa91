use serde::{Deserialize, Serialize};

/// Platform identity of one manifest variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`, `arm64`.
    pub architecture: String,
    /// Operating system, e.g. `linux`.
    pub os: String,
}

/// One entry of a multi-platform manifest index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformManifest {
    /// Digest uniquely identifying this platform variant.
    pub digest: String,
    /// Which platform this variant targets, absent for malformed entries.
    pub platform: Option<Platform>,
}

/// A manifest as returned by `manifest.inspect`: either a multi-platform
/// index or a single-platform manifest exposing its own config digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ManifestDescriptor {
    /// Multi-platform image index.
    Index {
        /// Per-platform variant descriptors.
        manifests: Vec<PlatformManifest>,
    },
    /// Single-platform manifest.
    Single {
        /// The manifest's own config blob digest, when present.
        config_digest: Option<String>,
    },
}
