mod cli;
mod console;

use clap::Parser;
use sluice_adapters::{FileCsvSink, MysqlBackend, TokioProcessLauncher};
use sluice_core::audit_trail::FileAuditTrail;
use sluice_core::settings::{default_settings_path, FileSettingsStore};
use sluice_core::Workbench;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn settings_store(cli: &Cli) -> Option<FileSettingsStore> {
    let path = match cli.settings.clone().map_or_else(default_settings_path, Ok) {
        Ok(path) => path,
        Err(error) => {
            warn!(%error, "no settings location available");
            return None;
        }
    };
    info!(path = %path.display(), "using settings file");
    Some(FileSettingsStore::new(path))
}

fn audit_trail(cli: &Cli) -> Option<FileAuditTrail> {
    if cli.no_audit {
        return None;
    }
    if let Some(path) = &cli.audit_log {
        return Some(FileAuditTrail::new(path));
    }
    match FileAuditTrail::in_config_dir() {
        Ok(trail) => Some(trail),
        Err(error) => {
            warn!(%error, "audit trail disabled");
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();

    let mut workbench = Workbench::new(
        MysqlBackend,
        FileCsvSink::new(cli.export_dir()),
        TokioProcessLauncher,
    );
    if let Some(trail) = audit_trail(&cli) {
        info!(path = %trail.path().display(), "auditing queries");
        workbench = workbench.with_audit_trail(trail);
    }

    let mut store = settings_store(&cli);
    if let Some(store) = store.as_mut() {
        workbench.load_settings(&*store).await;
        store.replace(workbench.settings().clone());
    }

    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    console::run(&mut workbench, store.as_mut(), lines, interrupt_rx, &mut stdout).await?;
    Ok(())
}
