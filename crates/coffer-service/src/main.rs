use anyhow::Result;
use clap::{Parser, Subcommand};
use coffer_core::audit::load_or_create_signing_key;
use coffer_core::backup::{BackupEngine, FileBackupIndex};
use coffer_core::config::{BackupConfig, BackupFrequency};
use coffer_core::keys::FileKeyProvider;
use coffer_core::paths;
use coffer_core::scheduler::spawn_backup_scheduler;
use coffer_core::storage::FileBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Coffer vault backup service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialise the data directory, stores and audit signing key
    Init {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Run the backup scheduler
    Run {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// hourly | daily | weekly | monthly
        #[arg(long, default_value = "daily")]
        frequency: BackupFrequency,
        /// Archives to keep; older ones are deleted after each run
        #[arg(long, default_value_t = 7)]
        retention: usize,
        /// Disable whole-archive encryption
        #[arg(long)]
        no_encrypt: bool,
        /// 1 (fastest) to 9 (smallest)
        #[arg(long, default_value_t = 3)]
        compression_level: i32,
        /// Archive bulk media alongside structured data
        #[arg(long)]
        include_media: bool,
        #[arg(long)]
        media_dir: Option<PathBuf>,
        /// Run one backup immediately on startup
        #[arg(long)]
        backup_on_start: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { data_dir } => init_command(data_dir),
        Commands::Run {
            data_dir,
            backup_dir,
            frequency,
            retention,
            no_encrypt,
            compression_level,
            include_media,
            media_dir,
            backup_on_start,
        } => {
            run_command(
                data_dir,
                backup_dir,
                frequency,
                retention,
                no_encrypt,
                compression_level,
                include_media,
                media_dir,
                backup_on_start,
            )
            .await
        }
    }
}

fn init_command(data_dir_override: Option<PathBuf>) -> Result<()> {
    let data = match data_dir_override {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };
    std::fs::create_dir_all(&data)?;
    load_or_create_signing_key(data.join("audit.key"))?;
    FileBackend::open(data.join("vault.json"))?;
    FileKeyProvider::open(data.join("keys.json"))?;
    println!("Coffer data directory initialised: {}", data.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_command(
    data_dir_override: Option<PathBuf>,
    backup_dir_override: Option<PathBuf>,
    frequency: BackupFrequency,
    retention: usize,
    no_encrypt: bool,
    compression_level: i32,
    include_media: bool,
    media_dir: Option<PathBuf>,
    backup_on_start: bool,
) -> Result<()> {
    let data = match data_dir_override {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };
    let backups = match backup_dir_override {
        Some(dir) => dir,
        None => match std::env::var("COFFER_BACKUP_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => data.join("backups"),
        },
    };
    std::fs::create_dir_all(&data)?;
    std::fs::create_dir_all(&backups)?;

    let mut config = BackupConfig::new(backups.clone());
    config.frequency = frequency;
    config.retention = retention;
    config.encrypt = !no_encrypt;
    config.compression_level = compression_level;
    config.include_media = include_media;
    config.media_location = media_dir;

    let backend = Arc::new(FileBackend::open(data.join("vault.json"))?);
    let keys = Arc::new(FileKeyProvider::open(data.join("keys.json"))?);
    let index = Arc::new(FileBackupIndex::open(backups.join("backups.json"))?);
    let engine = Arc::new(BackupEngine::new(backend, keys, index, config));

    let (handle, control) = spawn_backup_scheduler(engine);
    if backup_on_start {
        control.wake.notify_one();
    }
    info!(data_dir = %data.display(), backup_dir = %backups.display(), "coffer service running");

    signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = control.shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
