use std::path::PathBuf;

use tracing::info;

use crate::analysis::{AnalysisError, Analyzer, Progress};
use crate::cli::Cli;
use crate::reference::{Platform, ReferenceError, Repository};
use crate::registries::RegistryClient;
use crate::report::{Report, ReportError};

/// Everything that ends the program with a non zero exit code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Runs the analysis described by the command line and writes the report.
///
/// Returns the path of the written report, or `None` if no report was
/// requested.
///
/// # Errors
///
/// Returns an error for an invalid repository or tag pattern, if the tags
/// can not be listed, or if the report can not be written.
pub fn handle_analysis(cli: &Cli, client: &dyn RegistryClient, progress: &dyn Progress) -> Result<Option<PathBuf>, Error> {
    let repository = Repository::new(&cli.registry, &cli.image)?;
    let platform = Platform::new(cli.os.as_str(), cli.arch.as_str());
    info!("Analyzing image: {repository} for {platform}");

    let records = Analyzer::new(client, progress)
        .with_jobs(usize::from(cli.jobs))
        .run(&repository, &platform, &cli.tag_regex)?;
    let report = Report::new(&repository, &platform, records);

    if !cli.csv {
        info!("Skipping CSV output for {} records.", report.records().len());
        return Ok(None);
    }
    let path = report.write_to_dir(&cli.output_dir)?;
    info!("CSV output saved to {}", path.display());
    Ok(Some(path))
}
