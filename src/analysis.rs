use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use tracing::{debug, info};

use crate::reference::{ImageReference, Platform, ReferenceError, Repository};
use crate::registries::types::{ImageConfig, Manifest};
use crate::registries::{RegistryClient, RegistryError};
use crate::version::SemanticVersion;

/// Bytes per mebibyte.
pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
/// Upper bound for concurrent tag resolution, to stay below registry rate
/// limits.
pub const MAX_JOBS: usize = 16;

/// Errors that abort an analysis. Failures of single tags are never reported
/// here, those tags are skipped.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid tag pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Could not list tags of `{repository}`: {source}")]
    ListTags {
        repository: String,
        #[source]
        source:     RegistryError,
    },
    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

/// Receives a notice for every tag before it is fetched. Purely advisory.
pub trait Progress: Sync {
    fn processing(&self, tag: &str);
}

/// Reports progress through the tracing subscriber, i.e. on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn processing(&self, tag: &str) {
        info!("Processing tag: {tag}");
    }
}

/// Selects the tags to analyze. A tag is kept when the pattern matches
/// anywhere in it, anchors have to be part of the pattern.
#[derive(Debug, Clone)]
pub struct TagFilter {
    pattern: Regex,
}

impl TagFilter {
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidPattern` if the pattern is not a valid
    /// regular expression.
    pub fn new(pattern: &str) -> Result<Self, AnalysisError> {
        Regex::new(pattern).map(|pattern| Self { pattern }).map_err(|e| AnalysisError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason:  e.to_string(),
        })
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.pattern.is_match(tag)
    }

    /// Keeps the matching tags in their original order.
    pub fn apply(&self, tags: &[String]) -> Vec<String> {
        tags.iter().filter(|tag| self.matches(tag)).cloned().collect()
    }
}

/// One resolved tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// The raw tag.
    pub version:   String,
    /// Sum of the compressed layer sizes in MiB.
    pub size_mib:  f64,
    pub last_push: DateTime<FixedOffset>,
    /// Only set when the tag is a semantic version.
    pub semver:    Option<SemanticVersion>,
}

impl ImageRecord {
    pub fn new(tag: &str, manifest: &Manifest, config: &ImageConfig) -> Self {
        Self {
            version:   tag.to_owned(),
            size_mib:  bytes_to_mib(manifest.layer_bytes()),
            last_push: config.created,
            semver:    SemanticVersion::parse(tag),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
pub const fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MIB
}

/// Resolves manifest and config of one tag for the given platform.
///
/// Any failure only skips the tag: registries routinely contain tags that are
/// private, garbage collected or not built for every platform.
pub fn resolve_tag(client: &dyn RegistryClient, reference: &ImageReference, platform: &Platform, progress: &dyn Progress) -> Option<ImageRecord> {
    progress.processing(reference.tag());
    let manifest = match client.fetch_manifest(reference, platform) {
        Ok(manifest) => manifest,
        Err(e) => {
            debug!("Skipping {reference}: {e}");
            return None;
        }
    };
    let config = match client.fetch_config(reference, &manifest) {
        Ok(config) => config,
        Err(e) => {
            debug!("Skipping {reference}: {e}");
            return None;
        }
    };
    Some(ImageRecord::new(reference.tag(), &manifest, &config))
}

/// Orders records by push time, earliest first. Records pushed at the same
/// instant keep their relative order.
pub fn sort_records(records: &mut [ImageRecord]) {
    records.sort_by(|lhs, rhs| lhs.last_push.cmp(&rhs.last_push));
}

/// Runs tag discovery, filtering and resolution against one registry.
pub struct Analyzer<'a> {
    client:   &'a dyn RegistryClient,
    progress: &'a dyn Progress,
    jobs:     usize,
}

impl<'a> Analyzer<'a> {
    pub const fn new(client: &'a dyn RegistryClient, progress: &'a dyn Progress) -> Self {
        Self { client, progress, jobs: 1 }
    }

    /// Resolve up to `jobs` tags at once, clamped to `1..=MAX_JOBS`.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.clamp(1, MAX_JOBS);
        self
    }

    /// Returns one record per resolvable tag matching `pattern`, sorted by
    /// push time.
    ///
    /// # Errors
    ///
    /// Fails if the pattern is invalid (checked before any request), if the
    /// tags can not be listed, or if a listed tag is not a valid reference.
    pub fn run(&self, repository: &Repository, platform: &Platform, pattern: &str) -> Result<Vec<ImageRecord>, AnalysisError> {
        let filter = TagFilter::new(pattern)?;
        let tags = self.client.list_tags(repository).map_err(|source| AnalysisError::ListTags {
            repository: repository.to_string(),
            source,
        })?;
        let matched = filter.apply(&tags);
        debug!("Tags matching `{pattern}`: {matched:?}");
        let references = matched.iter().map(|tag| repository.reference(tag)).collect::<Result<Vec<_>, _>>()?;

        let mut records = if self.jobs == 1 || references.len() < 2 {
            references
                .iter()
                .filter_map(|reference| resolve_tag(self.client, reference, platform, self.progress))
                .collect()
        } else {
            self.resolve_concurrently(&references, platform)
        };
        sort_records(&mut records);
        info!(
            "{repository} ({platform}): {} tags listed, {} matched, {} resolved.",
            tags.len(),
            references.len(),
            records.len()
        );
        Ok(records)
    }

    /// Resolves tags on a bounded set of worker threads. Results are put back
    /// into discovery order, so ties in the later sort do not depend on which
    /// request finished first.
    fn resolve_concurrently(&self, references: &[ImageReference], platform: &Platform) -> Vec<ImageRecord> {
        let next = AtomicUsize::new(0);
        let (sender, receiver) = mpsc::channel();
        let workers = self.jobs.min(references.len());
        debug!("Resolving {} tags with {workers} workers.", references.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(reference) = references.get(index) else {
                            break;
                        };
                        if let Some(record) = resolve_tag(self.client, reference, platform, self.progress) {
                            // The receiver outlives the scope, sending can not fail.
                            let _ = sender.send((index, record));
                        }
                    }
                });
            }
        });
        drop(sender);

        let mut indexed: Vec<(usize, ImageRecord)> = receiver.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use std::sync::Mutex;

    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use rand::seq::SliceRandom;

    use crate::analysis::{AnalysisError, Analyzer, ImageRecord, Progress, TagFilter, bytes_to_mib, sort_records};
    use crate::reference::{Platform, ReferenceError, Repository};
    use crate::registries::fake::FakeRegistry;
    use crate::version::SemanticVersion;

    #[derive(Default)]
    struct RecordingProgress {
        tags: Mutex<Vec<String>>,
    }

    impl Progress for RecordingProgress {
        fn processing(&self, tag: &str) {
            self.tags.lock().unwrap().push(tag.to_owned());
        }
    }

    impl RecordingProgress {
        fn seen(&self) -> Vec<String> {
            let mut tags = self.tags.lock().unwrap().clone();
            tags.sort();
            tags
        }
    }

    fn repository() -> Repository {
        Repository::new("gcr.io", "google-appengine/python").unwrap()
    }

    fn amd64() -> Platform {
        Platform::new("linux", "amd64")
    }

    fn record(version: &str, last_push: &str) -> ImageRecord {
        ImageRecord {
            version:   version.to_owned(),
            size_mib:  1.0,
            last_push: DateTime::parse_from_rfc3339(last_push).unwrap(),
            semver:    SemanticVersion::parse(version),
        }
    }

    fn strings(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|tag| (*tag).to_owned()).collect()
    }

    #[test]
    fn filter_tags() {
        let tags = strings(&["v1.0.0", "1.0.0", "latest", "v2.0.0-rc1", "dev-v3"]);

        let filter = TagFilter::new("^v.*").unwrap();
        assert_eq!(filter.apply(&tags), strings(&["v1.0.0", "v2.0.0-rc1"]));

        // Unanchored patterns match anywhere in the tag.
        let filter = TagFilter::new("v").unwrap();
        let filtered = filter.apply(&tags);
        assert_eq!(filtered, strings(&["v1.0.0", "v2.0.0-rc1", "dev-v3"]));
        assert_eq!(filter.apply(&filtered), filtered);

        let filter = TagFilter::new(".*").unwrap();
        assert_eq!(filter.apply(&tags), tags);

        let filter = TagFilter::new("^nothing$").unwrap();
        assert!(filter.apply(&tags).is_empty());
    }

    #[test]
    fn invalid_pattern_before_any_request() {
        let registry = FakeRegistry::new(&["v1.0.0"]).with_image("v1.0.0", "amd64", &[1], "2024-01-01T00:00:00Z");
        let progress = RecordingProgress::default();
        let result = Analyzer::new(&registry, &progress).run(&repository(), &amd64(), "v1.(");
        match result {
            Err(AnalysisError::InvalidPattern { pattern, .. }) => assert_eq!(pattern, "v1.("),
            other => panic!("Expected invalid pattern, got {other:?}"),
        }
        assert_eq!(registry.call_count(), 0);
        assert!(progress.seen().is_empty());
    }

    #[test]
    fn analyze_matching_tags_in_push_order() {
        let registry = FakeRegistry::new(&["v1.1.0", "bad-tag", "v1.0.0"])
            .with_image("v1.1.0", "amd64", &[10_485_760, 2_621_440], "2024-02-01T12:00:00Z")
            .with_image("v1.0.0", "amd64", &[10_485_760], "2024-01-01T12:00:00Z")
            .with_image("bad-tag", "amd64", &[1], "2023-01-01T12:00:00Z");
        let progress = RecordingProgress::default();

        let records = Analyzer::new(&registry, &progress).run(&repository(), &amd64(), "^v.*").unwrap();

        let versions: Vec<&str> = records.iter().map(|record| record.version.as_str()).collect();
        assert_eq!(versions, vec!["v1.0.0", "v1.1.0"]);
        assert!((records[0].size_mib - 10.0).abs() < f64::EPSILON);
        assert!((records[1].size_mib - 12.5).abs() < f64::EPSILON);
        assert_eq!(records[0].semver.as_ref().unwrap().to_string(), "1.0.0");
        assert_eq!(progress.seen(), strings(&["v1.0.0", "v1.1.0"]));
    }

    #[test]
    fn unresolvable_tags_are_skipped() {
        let registry = FakeRegistry::new(&["1.0.0", "1.1.0", "1.2.0", "arm-only", "latest"])
            .with_image("1.0.0", "amd64", &[1_048_576], "2024-01-01T00:00:00Z")
            .with_broken_config("1.1.0", "amd64")
            .with_image("arm-only", "arm64", &[1_048_576], "2024-01-02T00:00:00Z")
            .with_image("latest", "amd64", &[], "2024-01-03T00:00:00Z");
        let progress = RecordingProgress::default();

        let records = Analyzer::new(&registry, &progress).run(&repository(), &amd64(), ".*").unwrap();

        let versions: Vec<&str> = records.iter().map(|record| record.version.as_str()).collect();
        assert_eq!(versions, vec!["1.0.0", "latest"]);
        // An image without layers is a real, empty image.
        assert!(records[1].size_mib.abs() < f64::EPSILON);
        assert_eq!(records[1].semver, None);
        // Every matched tag was announced, resolved or not.
        assert_eq!(progress.seen(), strings(&["1.0.0", "1.1.0", "1.2.0", "arm-only", "latest"]));
    }

    #[test]
    fn empty_selection_is_no_error() {
        let registry = FakeRegistry::new(&["latest"]);
        let progress = RecordingProgress::default();
        let records = Analyzer::new(&registry, &progress).run(&repository(), &amd64(), "^v").unwrap();
        assert!(records.is_empty());
        assert_eq!(registry.call_count(), 1);
    }

    #[test]
    fn fatal_errors() {
        let registry = FakeRegistry::failing();
        let progress = RecordingProgress::default();
        let result = Analyzer::new(&registry, &progress).run(&repository(), &amd64(), ".*");
        assert!(matches!(result, Err(AnalysisError::ListTags { ref repository, .. }) if repository == "gcr.io/google-appengine/python"));

        let registry = FakeRegistry::new(&["ok", "not ok"]);
        let result = Analyzer::new(&registry, &progress).run(&repository(), &amd64(), ".*");
        assert!(matches!(
            result,
            Err(AnalysisError::Reference(ReferenceError::InvalidTag { ref tag, .. })) if tag == "not ok"
        ));
        assert!(progress.seen().is_empty());
    }

    #[test]
    fn concurrent_resolution_matches_sequential() {
        let tags: Vec<String> = (0..24).map(|i| format!("1.{i}.0")).collect();
        let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
        let mut registry = FakeRegistry::new(&tag_refs);
        for (i, tag) in tags.iter().enumerate() {
            if i % 5 == 3 {
                continue;
            }
            // Pairs of tags share a push time, so ties have to fall back to
            // discovery order.
            let created = format!("2024-01-{:02}T00:00:00Z", 28 - i / 2);
            registry = registry.with_image(tag, "amd64", &[1_048_576 * (i as u64 + 1)], &created);
        }
        let progress = RecordingProgress::default();

        let sequential = Analyzer::new(&registry, &progress).run(&repository(), &amd64(), ".*").unwrap();
        let concurrent = Analyzer::new(&registry, &progress).with_jobs(6).run(&repository(), &amd64(), ".*").unwrap();

        assert_eq!(sequential.len(), 19);
        assert_eq!(sequential, concurrent);
        assert_eq!(concurrent[0].version, "1.22.0");
        assert_eq!(concurrent[1].version, "1.20.0");
        assert_eq!(concurrent[2].version, "1.21.0");
    }

    #[test]
    fn jobs_are_bounded() {
        let registry = FakeRegistry::new(&[]);
        let progress = RecordingProgress::default();
        assert_eq!(Analyzer::new(&registry, &progress).with_jobs(0).jobs, 1);
        assert_eq!(Analyzer::new(&registry, &progress).with_jobs(1000).jobs, super::MAX_JOBS);
    }

    #[test]
    fn sizes_in_mib() {
        assert!((bytes_to_mib(1_048_576 + 2_097_152) - 3.0).abs() < f64::EPSILON);
        assert!((bytes_to_mib(0)).abs() < f64::EPSILON);
        assert!((bytes_to_mib(524_288) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sort_is_stable_and_total() {
        let mut records = vec![
            record("c", "2024-03-01T00:00:00Z"),
            record("a", "2024-01-01T00:00:00Z"),
            record("tie-1", "2024-02-01T00:00:00Z"),
            // Same instant in another offset.
            record("tie-2", "2024-02-01T02:00:00+02:00"),
            record("b", "2023-12-31T23:59:59Z"),
        ];
        sort_records(&mut records);
        let versions: Vec<&str> = records.iter().map(|record| record.version.as_str()).collect();
        assert_eq!(versions, vec!["b", "a", "tie-1", "tie-2", "c"]);

        let once = records.clone();
        sort_records(&mut records);
        assert_eq!(records, once);
    }

    #[test]
    fn sort_preserves_records() {
        let mut rng = rand::rng();
        let original: Vec<ImageRecord> = (0..50).map(|i| record(&format!("{i}.0.0"), &format!("2024-01-01T00:{i:02}:00Z"))).collect();
        for _ in 0..20 {
            let mut shuffled = original.clone();
            shuffled.shuffle(&mut rng);
            sort_records(&mut shuffled);
            assert_eq!(shuffled, original);
            assert!(shuffled.windows(2).all(|pair| pair[0].last_push <= pair[1].last_push));
        }
    }
}
