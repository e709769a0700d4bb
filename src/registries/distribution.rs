use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use ureq::http::Response;
use ureq::{Agent, Body};

use crate::reference::{ImageReference, Platform, Repository};
use crate::registries::types::{
    DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, ImageConfig, MANIFEST_ACCEPT, Manifest, ManifestIndex, OCI_INDEX, OCI_MANIFEST, TagList,
    TokenResponse,
};
use crate::registries::{RegistryClient, RegistryError, TAG_PAGE_SIZE};

/// The default timeout for a single request, including reading the body.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for the OCI distribution HTTP API (`/v2/...`).
///
/// Anonymous pulls are authenticated with the bearer token flow: the first
/// `401` of a repository is answered with a token from the realm named in
/// `WWW-Authenticate`, which is then kept for the rest of the run.
pub struct Distribution {
    agent:        Agent,
    scheme:       &'static str,
    /// A token given by the user, sent as is instead of negotiating one.
    static_token: Option<String>,
    /// Negotiated tokens per pull scope.
    tokens:       RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Used to tell indexes and manifests apart, when the registry does not send a
/// precise `Content-Type`.
struct MediaTypeProbe {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests:  Option<serde_json::Value>,
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Default, PartialEq, Eq)]
struct BearerChallenge {
    realm:   String,
    service: Option<String>,
    scope:   Option<String>,
}

impl Distribution {
    pub fn new(timeout: Duration, static_token: Option<String>, insecure: bool) -> Self {
        // Status codes are inspected by hand, since a 401 carries the auth
        // challenge.
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        let agent: Agent = config.into();
        Self {
            agent,
            scheme: if insecure { "http" } else { "https" },
            static_token: static_token.filter(|token| !token.is_empty()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    fn base_url(&self, repository: &Repository) -> String {
        format!("{}://{}/v2/{}", self.scheme, repository.remote_registry(), repository.remote_path())
    }

    fn bearer_for(&self, scope: &str) -> Option<String> {
        if let Some(token) = &self.static_token {
            return Some(token.clone());
        }
        self.tokens.read().unwrap_or_else(PoisonError::into_inner).get(scope).cloned()
    }

    fn store_token(&self, scope: &str, token: String) {
        self.tokens.write().unwrap_or_else(PoisonError::into_inner).insert(scope.to_owned(), token);
    }

    /// Sends a GET request, authenticating once if the registry asks for it.
    fn get(&self, url: &str, accept: Option<&str>, scope: &str) -> Result<Response<Body>, RegistryError> {
        let mut authenticated = false;
        loop {
            let mut request = self.agent.get(url);
            if let Some(accept) = accept {
                request = request.header("Accept", accept);
            }
            if let Some(token) = self.bearer_for(scope) {
                request = request.header("Authorization", format!("Bearer {token}"));
            }
            trace!("GET {url}");
            let response = request.call().map_err(|e| RegistryError::Transport {
                url:    url.to_owned(),
                source: Box::new(e),
            })?;
            let status = response.status().as_u16();
            if status == 401 {
                if authenticated || self.static_token.is_some() {
                    return Err(RegistryError::Unauthorized(url.to_owned()));
                }
                let challenge = response
                    .headers()
                    .get("www-authenticate")
                    .and_then(|value| value.to_str().ok())
                    .and_then(BearerChallenge::parse)
                    .ok_or_else(|| RegistryError::Unauthorized(url.to_owned()))?;
                self.authenticate(&challenge, scope)?;
                authenticated = true;
                continue;
            }
            if !response.status().is_success() {
                return Err(RegistryError::Status { url: url.to_owned(), status });
            }
            return Ok(response);
        }
    }

    /// Requests an anonymous token from the realm and stores it for `scope`.
    fn authenticate(&self, challenge: &BearerChallenge, scope: &str) -> Result<(), RegistryError> {
        debug!("Requesting token from {} for {scope}", challenge.realm);
        let mut request = self.agent.get(challenge.realm.as_str());
        if let Some(service) = &challenge.service {
            request = request.query("service", service);
        }
        request = request.query("scope", challenge.scope.as_deref().unwrap_or(scope));
        let mut response = request.call().map_err(|e| RegistryError::Transport {
            url:    challenge.realm.clone(),
            source: Box::new(e),
        })?;
        if !response.status().is_success() {
            return Err(RegistryError::Unauthorized(challenge.realm.clone()));
        }
        let token = response
            .body_mut()
            .read_json::<TokenResponse>()
            .map_err(|e| RegistryError::Decode {
                url:    challenge.realm.clone(),
                reason: e.to_string(),
            })?
            .into_token()
            .ok_or_else(|| RegistryError::Unauthorized(challenge.realm.clone()))?;
        self.store_token(scope, token);
        Ok(())
    }

    /// Fetches a manifest by tag or digest and returns its media type and raw
    /// body.
    fn get_manifest(&self, repository: &Repository, reference: &str) -> Result<(String, String), RegistryError> {
        let url = format!("{}/manifests/{reference}", self.base_url(repository));
        let mut response = self.get(&url, Some(MANIFEST_ACCEPT), &pull_scope(repository))?;
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_owned())
            .unwrap_or_default();
        let body = response.body_mut().read_to_string().map_err(|e| RegistryError::Decode {
            url:    url.clone(),
            reason: e.to_string(),
        })?;
        let media_type = if is_known_media_type(&content_type) {
            content_type
        } else {
            let probe: MediaTypeProbe = decode(&url, &body)?;
            match probe.media_type {
                Some(media_type) => media_type,
                None if probe.manifests.is_some() => OCI_INDEX.to_owned(),
                None => OCI_MANIFEST.to_owned(),
            }
        };
        Ok((media_type, body))
    }
}

impl RegistryClient for Distribution {
    fn list_tags(&self, repository: &Repository) -> Result<Vec<String>, RegistryError> {
        let scope = pull_scope(repository);
        let origin = format!("{}://{}", self.scheme, repository.remote_registry());
        let mut request_url = Some(format!("{}/tags/list?n={TAG_PAGE_SIZE}", self.base_url(repository)));
        let mut tags = Vec::new();

        while let Some(url) = request_url.take() {
            let mut response = self.get(&url, None, &scope)?;
            let next_url = response
                .headers()
                .get("link")
                .and_then(|value| value.to_str().ok())
                .and_then(|link| parse_link_header(link, &origin));
            let page: TagList = response.body_mut().read_json().map_err(|e| RegistryError::Decode {
                url:    url.clone(),
                reason: e.to_string(),
            })?;
            let page = page.tags.unwrap_or_default();
            debug!("Fetched {} tags from {url}", page.len());
            if page.is_empty() {
                break;
            }
            tags.extend(page);
            // A registry linking back to the same page would never end.
            request_url = next_url.filter(|next_url| *next_url != url);
        }
        Ok(tags)
    }

    fn fetch_manifest(&self, reference: &ImageReference, platform: &Platform) -> Result<Manifest, RegistryError> {
        let repository = reference.repository();
        let (media_type, body) = self.get_manifest(repository, reference.tag())?;
        let url = reference.to_string();
        match media_type.as_str() {
            OCI_MANIFEST | DOCKER_MANIFEST => decode(&url, &body),
            OCI_INDEX | DOCKER_MANIFEST_LIST => {
                let index: ManifestIndex = decode(&url, &body)?;
                let entry = index.select(platform).ok_or_else(|| RegistryError::PlatformNotFound {
                    reference: url.clone(),
                    platform:  platform.to_string(),
                })?;
                debug!("{url} resolved to {} for {platform}", entry.digest);
                let (media_type, body) = self.get_manifest(repository, &entry.digest)?;
                match media_type.as_str() {
                    OCI_MANIFEST | DOCKER_MANIFEST => decode(&url, &body),
                    _ => Err(RegistryError::UnsupportedMediaType(media_type)),
                }
            }
            _ => Err(RegistryError::UnsupportedMediaType(media_type)),
        }
    }

    fn fetch_config(&self, reference: &ImageReference, manifest: &Manifest) -> Result<ImageConfig, RegistryError> {
        let repository = reference.repository();
        let url = format!("{}/blobs/{}", self.base_url(repository), manifest.config.digest);
        let mut response = self.get(&url, None, &pull_scope(repository))?;
        let config: ImageConfig = response.body_mut().read_json().map_err(|e| RegistryError::Decode {
            url:    url.clone(),
            reason: e.to_string(),
        })?;
        trace!(
            "Config of {reference}: created {}, {}/{}",
            config.created,
            config.os.as_deref().unwrap_or("?"),
            config.architecture.as_deref().unwrap_or("?")
        );
        Ok(config)
    }
}

fn pull_scope(repository: &Repository) -> String {
    format!("repository:{}:pull", repository.remote_path())
}

fn is_known_media_type(media_type: &str) -> bool {
    matches!(media_type, OCI_INDEX | OCI_MANIFEST | DOCKER_MANIFEST_LIST | DOCKER_MANIFEST)
}

fn decode<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, RegistryError> {
    serde_json::from_str(body).map_err(|e| RegistryError::Decode {
        url:    url.to_owned(),
        reason: e.to_string(),
    })
}

impl BearerChallenge {
    /// Parses `Bearer realm="...",service="...",scope="..."`. Values may
    /// contain commas, so the header is walked quote aware.
    fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let mut challenge = Self::default();
        let mut rest = params.trim();
        while !rest.is_empty() {
            let (key, after_key) = rest.split_once('=')?;
            let key = key.trim().trim_start_matches(',').trim();
            let (value, remaining) = if let Some(quoted) = after_key.strip_prefix('"') {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            } else {
                after_key.split_once(',').unwrap_or((after_key, ""))
            };
            match key.to_ascii_lowercase().as_str() {
                "realm" => value.clone_into(&mut challenge.realm),
                "service" => challenge.service = Some(value.to_owned()),
                "scope" => challenge.scope = Some(value.to_owned()),
                _ => {}
            }
            rest = remaining.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        }
        if challenge.realm.is_empty() { None } else { Some(challenge) }
    }
}

/// Parses the `Link` header used for pagination.
/// Format: `</v2/<name>/tags/list?n=1000&last=tag>; rel="next"`
fn parse_link_header(link: &str, origin: &str) -> Option<String> {
    link.split(',').map(str::trim).find(|part| part.contains("rel=\"next\"")).and_then(|part| {
        let start = part.find('<')?;
        let end = part.find('>')?;
        let url = part.get(start + 1..end)?;
        if url.starts_with('/') {
            Some(format!("{origin}{url}"))
        } else {
            Some(url.to_owned())
        }
    })
}
