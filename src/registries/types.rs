use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Deserializer};

use crate::reference::Platform;

pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Sent as `Accept` header when fetching manifests, so that the registry does
/// not fall back to schema 1 manifests.
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json,application/vnd.docker.distribution.manifest.list.v2+json,application/vnd.oci.image.manifest.v1+json,application/vnd.docker.distribution.manifest.v2+json";

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A content addressed blob, as referenced from a manifest.
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest:     String,
    /// Compressed size in bytes.
    pub size:       u64,
}

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The single platform image manifest.
pub struct Manifest {
    #[serde(default)]
    pub media_type: String,
    pub config:     Descriptor,
    #[serde(default)]
    pub layers:     Vec<Descriptor>,
}

impl Manifest {
    /// Sum of the declared compressed layer sizes.
    pub fn layer_bytes(&self) -> u64 {
        self.layers.iter().map(|layer| layer.size).sum()
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlatformSpec {
    pub os:           String,
    pub architecture: String,
    #[serde(default)]
    pub variant:      Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDescriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest:     String,
    #[serde(default)]
    pub platform:   Option<PlatformSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
/// OCI image index or docker manifest list.
pub struct ManifestIndex {
    pub manifests: Vec<PlatformDescriptor>,
}

impl ManifestIndex {
    /// Returns the first entry built for the given platform. Entries without
    /// a platform (e.g. attestations) never match.
    pub fn select(&self, platform: &Platform) -> Option<&PlatformDescriptor> {
        self.manifests.iter().find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|spec| spec.os == platform.os && spec.architecture == platform.architecture)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
/// The parts of the image configuration blob that are of interest.
pub struct ImageConfig {
    /// Missing or `null` in some configs, which is read as [`unknown_creation`].
    #[serde(default = "unknown_creation", deserialize_with = "creation_or_unknown")]
    pub created:      DateTime<FixedOffset>,
    #[serde(default)]
    pub os:           Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}

/// `0001-01-01T00:00:00Z`, the creation time of images that do not record one.
pub fn unknown_creation() -> DateTime<FixedOffset> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc().fixed_offset())
        .unwrap_or_default()
}

fn creation_or_unknown<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error> {
    Ok(Option::<DateTime<FixedOffset>>::deserialize(deserializer)?.unwrap_or_else(unknown_creation))
}

#[derive(Debug, Deserialize)]
/// Response of `GET /v2/<name>/tags/list`.
pub struct TagList {
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
/// Response of a bearer token realm. Registries differ in which of the two
/// fields they fill.
pub struct TokenResponse {
    #[serde(default)]
    pub token:        Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl TokenResponse {
    pub fn into_token(self) -> Option<String> {
        self.token
            .filter(|token| !token.is_empty())
            .or_else(|| self.access_token.filter(|token| !token.is_empty()))
    }
}
