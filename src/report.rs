use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::analysis::{ImageRecord, sort_records};
use crate::reference::{Platform, Repository};

/// Column headers, in output order.
pub const HEADER: [&str; 7] = ["Version", "SizeMiB", "LastPush", "Major", "Minor", "Patch", "Prerelease"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Could not create report file `{path}`: {source}")]
    Create {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not write report: {0}")]
    Write(#[from] io::Error),
}

/// The analysis result of one run, ready to be written.
#[derive(Debug, Clone)]
pub struct Report {
    registry: String,
    image:    String,
    platform: Platform,
    records:  Vec<ImageRecord>,
}

impl Report {
    /// Records are put into push order, regardless of how they are passed.
    pub fn new(repository: &Repository, platform: &Platform, mut records: Vec<ImageRecord>) -> Self {
        sort_records(&mut records);
        Self {
            registry: repository.registry().to_owned(),
            image: repository.path().to_owned(),
            platform: platform.clone(),
            records,
        }
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn title(&self) -> String {
        format!("# Image Size Analysis for {}/{} ({})", self.registry, self.image, self.platform)
    }

    /// The deterministic file name for this report, e.g.
    /// `google-appengine_python_linux_amd64.csv`.
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.csv", self.image.replace('/', "_"), self.platform.os, self.platform.architecture)
    }

    /// Writes the report as CSV: a title row, the header row and one row per
    /// record. The writer is flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `writer` fails. Whatever was written up
    /// to that point is incomplete and should be discarded.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ReportError> {
        let mut csv = CsvWriter::new(writer);
        csv.write_record(&[self.title().as_str()])?;
        csv.write_record(&HEADER)?;
        for record in &self.records {
            csv.write_record(&row(record))?;
        }
        csv.finish()?;
        Ok(())
    }

    /// Creates `<dir>/<file_name>` and writes the CSV report into it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can not be created or written.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let path = dir.join(self.file_name());
        debug!("Writing report to {}", path.display());
        let file = File::create(&path).map_err(|source| ReportError::Create { path: path.clone(), source })?;
        self.write_csv(file)?;
        Ok(path)
    }
}

/// Formats the cells of one record.
fn row(record: &ImageRecord) -> [String; 7] {
    let (major, minor, patch, prerelease) = record.semver.as_ref().map_or_else(Default::default, |version| {
        (version.major_cell(), version.minor_cell(), version.patch_cell(), version.prerelease.clone())
    });
    [
        record.version.clone(),
        format!("{:.2}", record.size_mib),
        record.last_push.format(TIMESTAMP_FORMAT).to_string(),
        major,
        minor,
        patch,
        prerelease,
    ]
}

/// Minimal CSV writer: `,` separated, `\n` terminated. Fields are quoted when
/// they contain the separator, quotes or line breaks, or start with
/// whitespace. Quotes inside a quoted field are doubled.
struct CsvWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> CsvWriter<W> {
    fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
        }
    }

    fn write_record<S: AsRef<str>>(&mut self, fields: &[S]) -> io::Result<()> {
        for (index, field) in fields.iter().enumerate() {
            if index > 0 {
                self.inner.write_all(b",")?;
            }
            let field = field.as_ref();
            if needs_quotes(field) {
                self.inner.write_all(b"\"")?;
                self.inner.write_all(field.replace('"', "\"\"").as_bytes())?;
                self.inner.write_all(b"\"")?;
            } else {
                self.inner.write_all(field.as_bytes())?;
            }
        }
        self.inner.write_all(b"\n")
    }

    fn finish(mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn needs_quotes(field: &str) -> bool {
    if field.is_empty() {
        return false;
    }
    // A lone `\.` would read as end-of-data marker for some importers.
    field == r"\." || field.contains([',', '"', '\r', '\n']) || field.starts_with(char::is_whitespace)
}
