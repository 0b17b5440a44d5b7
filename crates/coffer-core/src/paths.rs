use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "uk";
pub const APP_ORG: &str = "coffer";
pub const APP_NAME: &str = "coffer";

/// Base data directory; `COFFER_DATA_DIR` overrides the platform default.
pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("COFFER_DATA_DIR") {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Archive directory; `COFFER_BACKUP_DIR` overrides the default under the
/// data directory.
pub fn backup_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("COFFER_BACKUP_DIR") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("backups"))
}

pub fn vault_store_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("vault.json"))
}

pub fn key_store_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("keys.json"))
}

pub fn audit_log_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("audit.log"))
}

pub fn audit_signing_key_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("audit.key"))
}
