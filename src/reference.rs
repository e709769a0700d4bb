use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;

/// Hostname with an optional port, e.g. `gcr.io` or `localhost:5000`.
static REGISTRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$")
        .expect("Registry pattern is a valid regex.")
});
/// One or more lowercase path components, e.g. `google-appengine/python`.
static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
        .expect("Path pattern is a valid regex.")
});
static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("Tag pattern is a valid regex."));

/// Host serving the `/v2/` API of Docker Hub.
const DOCKER_HUB_HOST: &str = "index.docker.io";
const DOCKER_HUB_ALIASES: [&str; 3] = ["docker.io", "registry-1.docker.io", DOCKER_HUB_HOST];

/// Errors for identifiers that can not be turned into a registry reference.
/// All of them abort the analysis.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Invalid registry host: `{0}`.")]
    InvalidRegistry(String),
    #[error("Invalid repository: `{0}`.")]
    InvalidRepository(String),
    #[error("Invalid tag `{tag}` for repository `{repository}`.")]
    InvalidTag { repository: String, tag: String },
}

/// The `(os, architecture)` pair used to pick one manifest out of a
/// multi-platform image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os:           String,
    pub architecture: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os:           os.into(),
            architecture: architecture.into(),
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// Registry host and image path, e.g. `gcr.io` and `google-appengine/python`.
///
/// `registry` and `path` are kept as given for reports, while requests go to
/// `remote_registry` and `remote_path`. These differ only for Docker Hub, where
/// `docker.io/golang` is served as `index.docker.io/library/golang`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    registry:        String,
    path:            String,
    remote_registry: String,
    remote_path:     String,
}

impl Repository {
    /// # Errors
    ///
    /// Returns an error if the registry is not a valid host or the path is not
    /// a valid repository name.
    pub fn new(registry: &str, path: &str) -> Result<Self, ReferenceError> {
        let registry = registry.trim();
        let path = path.trim().trim_matches('/');
        if !REGISTRY_PATTERN.is_match(registry) {
            return Err(ReferenceError::InvalidRegistry(registry.to_owned()));
        }
        if !PATH_PATTERN.is_match(path) {
            return Err(ReferenceError::InvalidRepository(format!("{registry}/{path}")));
        }
        let docker_hub = DOCKER_HUB_ALIASES.iter().any(|alias| alias.eq_ignore_ascii_case(registry));
        let (remote_registry, remote_path) = if docker_hub {
            let remote_path = if path.contains('/') { path.to_owned() } else { format!("library/{path}") };
            (DOCKER_HUB_HOST.to_owned(), remote_path)
        } else {
            (registry.to_owned(), path.to_owned())
        };
        Ok(Self {
            registry: registry.to_owned(),
            path: path.to_owned(),
            remote_registry,
            remote_path,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The host requests are sent to.
    pub fn remote_registry(&self) -> &str {
        &self.remote_registry
    }

    /// The repository name used in request paths and token scopes.
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// The image path with every `/` replaced by `_`, usable as a file name.
    pub fn sanitized_path(&self) -> String {
        self.path.replace('/', "_")
    }

    /// Builds the fully qualified reference for one tag of this repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is not a valid reference tag.
    pub fn reference(&self, tag: &str) -> Result<ImageReference, ReferenceError> {
        if !TAG_PATTERN.is_match(tag) {
            return Err(ReferenceError::InvalidTag {
                repository: self.to_string(),
                tag:        tag.to_owned(),
            });
        }
        Ok(ImageReference {
            repository: self.clone(),
            tag:        tag.to_owned(),
        })
    }
}

impl Display for Repository {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.path)
    }
}

/// A tagged image, e.g. `gcr.io/google-appengine/python:latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    repository: Repository,
    tag:        String,
}

impl ImageReference {
    pub const fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Display for ImageReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
