use std::path::PathBuf;

use clap::Parser;

/// Ad-hoc MySQL workbench: probe a login, run a statement, save the rows as
/// CSV and hand the file to a local tool.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
pub struct Cli {
    /// Admin settings file (defaults to the platform config directory).
    #[arg(long, env = "SLUICE_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Directory CSV exports are written to.
    #[arg(long, env = "SLUICE_EXPORT_DIR")]
    pub export_dir: Option<PathBuf>,

    /// NDJSON file settled queries are appended to.
    #[arg(long, env = "SLUICE_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Disable the query audit trail.
    #[arg(long, conflicts_with = "audit_log")]
    pub no_audit: bool,
}

impl Cli {
    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
