use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::registries::distribution::DEFAULT_TIMEOUT_SECS;

/// Reports size, push time and version of every tag of a container image, for
/// tracking image bloat over time.
#[derive(Parser, Debug, Clone)]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    #[arg(long, help = "Image to analyze, without registry and tag.", default_value = "google-appengine/python")]
    pub(crate) image: String,

    #[arg(long, help = "Registry hosting the image.", default_value = "gcr.io")]
    pub(crate) registry: String,

    #[arg(long, help = "Operating system of the image variant.", default_value = "linux")]
    pub(crate) os: String,

    #[arg(long, help = "Architecture of the image variant.", default_value = "amd64")]
    pub(crate) arch: String,

    #[arg(long, help = "Only tags matching this regex are analyzed.", default_value = ".*")]
    pub(crate) tag_regex: String,

    #[arg(long, help = "Write the CSV report.", default_value_t = true, action = ArgAction::Set)]
    pub(crate) csv: bool,

    #[arg(long, help = "Folder the CSV report is written to.", default_value = ".")]
    pub(crate) output_dir: PathBuf,

    #[arg(
        long,
        short,
        help = "Number of tags resolved concurrently.",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..=16)
    )]
    pub(crate) jobs: u16,

    #[arg(long, help = "Timeout per registry request in seconds.", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub(crate) timeout: u64,

    /// Skips the anonymous token exchange.
    #[arg(long, env = "REGISTRY_TOKEN", hide_env_values = true, help = "Bearer token for the registry.")]
    pub(crate) token: Option<String>,

    #[arg(long, help = "Use plain http, e.g. for a local registry.")]
    pub(crate) insecure: bool,

    #[arg(long, short, help = "Activates debug logging.")]
    pub(crate) debug: bool,
}
