// Command-line options shared by both binaries

use crate::config::Config;
use crate::discovery::RecencyKind;
use crate::error::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Project root; relative paths are resolved against it
    #[arg(long, env = "NCTS_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// JSON config file (default: ncts-monthly.json in the root, if present)
    #[arg(long, env = "NCTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the monthly downloads [default: WorkingFiles]
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Root of the upload tree [default: "Files for upload"]
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// How the latest input is chosen: name or modified
    #[arg(long)]
    pub recency: Option<RecencyKind>,

    /// Print the run report as JSON instead of the console summary
    #[arg(long)]
    pub json: bool,

    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl CommonArgs {
    /// Defaults, then the config file, then these flags
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::load(&self.root, self.config.as_deref())?;
        if let Some(dir) = &self.working_dir {
            config.working_dir = dir.clone();
        }
        if let Some(dir) = &self.upload_dir {
            config.upload_dir = dir.clone();
        }
        if let Some(recency) = self.recency {
            config.recency = recency;
        }
        Ok(config.resolve(&self.root))
    }
}
