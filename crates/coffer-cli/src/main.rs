use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use coffer_core::backup::{
    BackupEngine, BackupFilter, BackupKind, FileBackupIndex, RestoreOptions,
};
use coffer_core::config::BackupConfig;
use coffer_core::keys::FileKeyProvider;
use coffer_core::paths;
use coffer_core::storage::FileBackend;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Operator CLI for the Coffer backup engine", long_about = None)]
struct Cli {
    /// Data directory override
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Archive directory override
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a full backup now
    Backup {
        /// Archives to keep; older ones are deleted after the run
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
    },

    /// Restore a backup by id
    Restore {
        id: String,

        /// Also restore the media archive
        #[arg(long)]
        media: bool,

        /// Skip archive checksum verification
        #[arg(long)]
        skip_checksum: bool,

        #[arg(long)]
        media_dir: Option<PathBuf>,
    },

    /// List known backups, newest first
    List {
        /// full | incremental
        #[arg(long)]
        kind: Option<String>,

        /// RFC 3339 lower bound on creation time
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// RFC 3339 upper bound on creation time
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },

    /// Delete a backup, its archives and its metadata
    Delete { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data = match cli.data_dir {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };
    let backups = match cli.backup_dir {
        Some(dir) => dir,
        None => match std::env::var("COFFER_BACKUP_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => data.join("backups"),
        },
    };
    std::fs::create_dir_all(&data)?;
    std::fs::create_dir_all(&backups)?;

    match cli.command {
        Commands::Backup {
            retention,
            no_encrypt,
            compression_level,
            include_media,
            media_dir,
        } => {
            let mut config = BackupConfig::new(backups.clone());
            config.retention = retention;
            config.encrypt = !no_encrypt;
            config.compression_level = compression_level;
            config.include_media = include_media;
            config.media_location = media_dir;
            let engine = open_engine(&data, &backups, config)?;
            let metadata = engine.create_full_backup()?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Restore {
            id,
            media,
            skip_checksum,
            media_dir,
        } => {
            let mut config = BackupConfig::new(backups.clone());
            config.media_location = media_dir;
            let engine = open_engine(&data, &backups, config)?;
            engine.restore_from_backup(
                &id,
                &RestoreOptions {
                    restore_media: media,
                    validate_checksum: !skip_checksum,
                },
            )?;
            println!("Restored backup {id}");
        }
        Commands::List { kind, since, until } => {
            let filter = BackupFilter {
                kind: kind.as_deref().map(parse_kind).transpose()?,
                since,
                until,
            };
            let engine = open_engine(&data, &backups, BackupConfig::new(backups.clone()))?;
            let listed = engine.list_backups(&filter)?;
            if listed.is_empty() {
                println!("No backups found");
                return Ok(());
            }
            println!(
                "{:<26} {:>12} {:>4} {:>5} {}",
                "ID", "SIZE", "ENC", "LEVEL", "CREATED"
            );
            for m in listed {
                println!(
                    "{:<26} {:>12} {:>4} {:>5} {}",
                    m.id,
                    m.size_bytes,
                    if m.encryption_key_id.is_some() { "yes" } else { "no" },
                    m.compression_level,
                    m.created_at.to_rfc3339(),
                );
            }
        }
        Commands::Delete { id } => {
            let engine = open_engine(&data, &backups, BackupConfig::new(backups.clone()))?;
            engine.delete_backup(&id)?;
            println!("Deleted backup {id}");
        }
    }
    Ok(())
}

fn open_engine(data: &PathBuf, backups: &PathBuf, config: BackupConfig) -> Result<BackupEngine> {
    let backend = Arc::new(FileBackend::open(data.join("vault.json"))?);
    let keys = Arc::new(FileKeyProvider::open(data.join("keys.json"))?);
    let index = Arc::new(FileBackupIndex::open(backups.join("backups.json"))?);
    Ok(BackupEngine::new(backend, keys, index, config))
}

fn parse_kind(kind: &str) -> Result<BackupKind> {
    match kind.to_ascii_lowercase().as_str() {
        "full" => Ok(BackupKind::Full),
        "incremental" => Ok(BackupKind::Incremental),
        other => Err(anyhow!("unknown backup kind: {other}")),
    }
}
