use crate::reference::{ImageReference, Platform, Repository};
use crate::registries::types::{ImageConfig, Manifest};

pub mod distribution;
pub mod types;

/// Page size requested when listing tags. Registries are free to return less.
pub const TAG_PAGE_SIZE: usize = 1000;

/// Errors when talking to a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Request to `{url}` failed: {source}")]
    Transport {
        url:    String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("Registry answered `{url}` with status {status}.")]
    Status { url: String, status: u16 },
    #[error("Could not authenticate for `{0}`.")]
    Unauthorized(String),
    #[error("Could not decode response from `{url}`: {reason}")]
    Decode { url: String, reason: String },
    #[error("Unsupported manifest media type `{0}`.")]
    UnsupportedMediaType(String),
    #[error("`{reference}` has no image for platform {platform}.")]
    PlatformNotFound { reference: String, platform: String },
}

/// The operations needed from an OCI distribution compatible registry.
///
/// Implementations must be usable from several worker threads at once.
pub trait RegistryClient: Sync {
    /// Returns every tag of the repository, in the order the registry lists
    /// them.
    fn list_tags(&self, repository: &Repository) -> Result<Vec<String>, RegistryError>;

    /// Fetches the image manifest of `reference` for the given platform. Image
    /// indexes and manifest lists are resolved to the matching entry.
    fn fetch_manifest(&self, reference: &ImageReference, platform: &Platform) -> Result<Manifest, RegistryError>;

    /// Fetches the configuration blob the manifest points to.
    fn fetch_config(&self, reference: &ImageReference, manifest: &Manifest) -> Result<ImageConfig, RegistryError>;
}

#[cfg(test)]
pub mod fake;
