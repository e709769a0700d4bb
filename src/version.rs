use std::fmt::Display;

use semver::Version;
use tracing::trace;

/// `SemanticVersion` is build from a tag of the form
/// `[v](major).(minor).(patch)[-prerelease][+build]`.
///
/// Build metadata is dropped, it carries no ordering meaning.
#[derive(Debug, Clone, Default, Eq, PartialEq, PartialOrd, Ord)]
pub struct SemanticVersion {
    pub major:      u64,
    pub minor:      u64,
    pub patch:      u64,
    pub prerelease: String,
}

impl Display for SemanticVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.prerelease.is_empty() {
            Ok(())
        } else {
            write!(f, "-{}", self.prerelease)
        }
    }
}

impl SemanticVersion {
    /// Strict semver parsing of a tag. A single leading `v` is tolerated.
    ///
    /// Returns `None` for anything that is not a version (`latest`, digests,
    /// git hashes) and for the degenerate `0.0.0`, which carries no more
    /// information than a missing version.
    pub fn parse(tag: &str) -> Option<Self> {
        let candidate = tag.strip_prefix('v').unwrap_or(tag);
        let version = match Version::parse(candidate) {
            Ok(version) => version,
            Err(e) => {
                trace!("Tag `{tag}` is not a semantic version: {e}");
                return None;
            }
        };
        let parsed = Self {
            major:      version.major,
            minor:      version.minor,
            patch:      version.patch,
            prerelease: version.pre.as_str().to_owned(),
        };
        if parsed.is_bare_zero() { None } else { Some(parsed) }
    }

    const fn is_bare_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0 && self.prerelease.is_empty()
    }

    /// The `Major` cell: a `0` is only shown when another component gives it
    /// meaning.
    pub fn major_cell(&self) -> String {
        if self.major != 0 || self.minor != 0 || self.patch != 0 || !self.prerelease.is_empty() {
            self.major.to_string()
        } else {
            String::new()
        }
    }

    /// The `Minor` cell, rendered as `major.minor` so that rows can be grouped
    /// by release line directly.
    pub fn minor_cell(&self) -> String {
        if self.minor != 0 || self.major != 0 || self.patch != 0 || !self.prerelease.is_empty() {
            format!("{}.{}", self.major, self.minor)
        } else {
            String::new()
        }
    }

    pub fn patch_cell(&self) -> String {
        if self.patch != 0 || self.major != 0 || self.minor != 0 || !self.prerelease.is_empty() {
            self.patch.to_string()
        } else {
            String::new()
        }
    }
}
