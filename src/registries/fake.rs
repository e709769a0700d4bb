//! In memory registry for tests, no network involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::DateTime;

use crate::reference::{ImageReference, Platform, Repository};
use crate::registries::types::{DOCKER_MANIFEST, Descriptor, ImageConfig, Manifest};
use crate::registries::{RegistryClient, RegistryError};

#[derive(Debug, Default)]
pub struct FakeRegistry {
    tags:       Vec<String>,
    /// Manifests per `(tag, architecture)`.
    manifests:  HashMap<(String, String), Manifest>,
    /// Configs per config digest.
    configs:    HashMap<String, ImageConfig>,
    list_fails: bool,
    calls:      AtomicUsize,
}

impl FakeRegistry {
    pub fn new(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|tag| (*tag).to_owned()).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            list_fails: true,
            ..Self::default()
        }
    }

    /// Registers a linux image for `tag` with the given layer sizes and
    /// creation time (RFC 3339).
    #[allow(clippy::unwrap_used)]
    pub fn with_image(mut self, tag: &str, architecture: &str, layers: &[u64], created: &str) -> Self {
        let digest = format!("sha256:config-{tag}-{architecture}");
        let manifest = Manifest {
            media_type: DOCKER_MANIFEST.to_owned(),
            config:     Descriptor {
                media_type: "application/vnd.docker.container.image.v1+json".to_owned(),
                digest:     digest.clone(),
                size:       1024,
            },
            layers:     layers
                .iter()
                .enumerate()
                .map(|(index, size)| Descriptor {
                    media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".to_owned(),
                    digest:     format!("sha256:layer-{tag}-{index}"),
                    size:       *size,
                })
                .collect(),
        };
        self.manifests.insert((tag.to_owned(), architecture.to_owned()), manifest);
        self.configs.insert(
            digest,
            ImageConfig {
                created:      DateTime::parse_from_rfc3339(created).unwrap(),
                os:           Some("linux".to_owned()),
                architecture: Some(architecture.to_owned()),
            },
        );
        self
    }

    /// Registers a manifest whose config blob is missing.
    pub fn with_broken_config(mut self, tag: &str, architecture: &str) -> Self {
        let manifest = Manifest {
            media_type: DOCKER_MANIFEST.to_owned(),
            config:     Descriptor {
                media_type: "application/vnd.docker.container.image.v1+json".to_owned(),
                digest:     format!("sha256:gone-{tag}"),
                size:       1024,
            },
            layers:     Vec::new(),
        };
        self.manifests.insert((tag.to_owned(), architecture.to_owned()), manifest);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegistryClient for FakeRegistry {
    fn list_tags(&self, repository: &Repository) -> Result<Vec<String>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails {
            return Err(RegistryError::Status {
                url:    format!("https://{}/v2/{}/tags/list", repository.registry(), repository.path()),
                status: 404,
            });
        }
        Ok(self.tags.clone())
    }

    fn fetch_manifest(&self, reference: &ImageReference, platform: &Platform) -> Result<Manifest, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.manifests
            .get(&(reference.tag().to_owned(), platform.architecture.clone()))
            .cloned()
            .ok_or_else(|| RegistryError::PlatformNotFound {
                reference: reference.to_string(),
                platform:  platform.to_string(),
            })
    }

    fn fetch_config(&self, reference: &ImageReference, manifest: &Manifest) -> Result<ImageConfig, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.configs.get(&manifest.config.digest).cloned().ok_or_else(|| RegistryError::Status {
            url:    format!("{reference}@{}", manifest.config.digest),
            status: 404,
        })
    }
}
