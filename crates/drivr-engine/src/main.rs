use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use drivr_auth::FileCredentialStorage;
use drivr_core::{Clock, SystemClock};
use drivr_engine::config::AppConfig;
use drivr_engine::config::loader::load_config;
use drivr_engine::source::MemoryDataSource;
use drivr_engine::{Engine, observability, start_maintenance_task};

/// Command line options.
#[derive(Debug, Default)]
struct Options {
    config_path: Option<PathBuf>,
    restore_from: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();

    let options = parse_options();
    let cfg = match load_config(options.config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    observability::apply_logging_level(&cfg.logging.level);

    if let Err(err) = run(cfg, options).await {
        eprintln!("Engine error: {err:#}");
        std::process::exit(1);
    }
}

/// `--config <path>` wins over `DRIVR_CONFIG`. `--restore <backup>` restores
/// the credential file and exits.
fn parse_options() -> Options {
    let mut options = Options::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => options.config_path = args.next().map(PathBuf::from),
            "--restore" => options.restore_from = args.next().map(PathBuf::from),
            _ => {}
        }
    }
    if options.config_path.is_none() {
        options.config_path = env::var("DRIVR_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
    }
    options
}

async fn run(cfg: AppConfig, options: Options) -> anyhow::Result<()> {
    let storage = Arc::new(
        FileCredentialStorage::open(&cfg.storage.credentials_path)
            .await
            .context("failed to open credential file")?,
    );

    if let Some(backup) = options.restore_from {
        let restored = storage
            .restore(&backup)
            .await
            .context("failed to restore credentials")?;
        tracing::info!(records = restored, "Restore complete");
        return Ok(());
    }

    if let Err(e) = storage
        .backup(&cfg.storage.backup_dir, SystemClock::new().now())
        .await
    {
        tracing::warn!(error = %e, "Startup credential backup failed");
    }

    // The spreadsheet client lives outside this crate; the runner uses the
    // in-memory source.
    let engine = Arc::new(
        Engine::builder(cfg.clone())
            .source(Arc::new(MemoryDataSource::new()))
            .credential_storage(storage)
            .build()?,
    );

    let defaults = engine.credentials().identities_with_default_secret().await?;
    if !defaults.is_empty() {
        tracing::warn!(
            count = defaults.len(),
            identities = ?defaults,
            "Accounts still use the roster default secret"
        );
    }

    let maintenance = start_maintenance_task(engine.clone(), cfg.auth.session.sweep_interval);
    tracing::info!(
        session_ttl = ?cfg.auth.session.ttl,
        credentials = %cfg.storage.credentials_path.display(),
        "Engine ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    maintenance.abort();
    tracing::info!("Shutting down");
    Ok(())
}
