//! Operator-supplied backup policy and environment-level inputs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audit::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ROTATIONS};

pub const MIN_COMPRESSION_LEVEL: i32 = 1;
pub const MAX_COMPRESSION_LEVEL: i32 = 9;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
pub const DEFAULT_RETENTION: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupFrequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl BackupFrequency {
    /// Scheduling interval. Monthly is a 30-day approximation, not
    /// calendar-accurate.
    pub fn interval(&self) -> Duration {
        match self {
            BackupFrequency::Hourly => Duration::from_secs(60 * 60),
            BackupFrequency::Daily => Duration::from_secs(24 * 60 * 60),
            BackupFrequency::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
            BackupFrequency::Monthly => Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl std::str::FromStr for BackupFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" => Ok(BackupFrequency::Hourly),
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            "monthly" => Ok(BackupFrequency::Monthly),
            other => Err(format!("unknown backup frequency: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub frequency: BackupFrequency,
    /// How many archives to keep; oldest beyond this are deleted after
    /// every successful run.
    pub retention: usize,
    pub encrypt: bool,
    /// Target directory for archives and the backup index.
    pub location: PathBuf,
    pub include_media: bool,
    /// Directory holding bulk media, archived separately when
    /// `include_media` is set and restored back here.
    pub media_location: Option<PathBuf>,
    /// 1 (fastest) to 9 (smallest); out-of-range values are clamped.
    pub compression_level: i32,
}

impl BackupConfig {
    pub fn new(location: PathBuf) -> Self {
        Self {
            frequency: BackupFrequency::Daily,
            retention: DEFAULT_RETENTION,
            encrypt: true,
            location,
            include_media: false,
            media_location: None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn clamped_compression_level(&self) -> i32 {
        self.compression_level
            .clamp(MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL)
    }
}

/// Audit log knobs, overridable from the environment.
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    pub max_bytes: u64,
    pub max_rotations: usize,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_rotations: DEFAULT_MAX_ROTATIONS,
        }
    }
}

impl AuditLogConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(max_bytes) = env_parse("COFFER_AUDIT_LOG_MAX_BYTES") {
            config.max_bytes = max_bytes;
        }
        if let Some(rotations) = env_parse("COFFER_AUDIT_LOG_ROTATIONS") {
            config.max_rotations = rotations;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_level_is_clamped() {
        let mut config = BackupConfig::new(PathBuf::from("/tmp"));
        config.compression_level = 0;
        assert_eq!(config.clamped_compression_level(), 1);
        config.compression_level = 42;
        assert_eq!(config.clamped_compression_level(), 9);
        config.compression_level = 5;
        assert_eq!(config.clamped_compression_level(), 5);
    }

    #[test]
    fn frequency_intervals() {
        assert_eq!(
            BackupFrequency::Hourly.interval(),
            Duration::from_secs(3600)
        );
        assert_eq!(
            BackupFrequency::Monthly.interval(),
            Duration::from_secs(30 * 86400)
        );
        assert_eq!("weekly".parse::<BackupFrequency>(), Ok(BackupFrequency::Weekly));
        assert!("fortnightly".parse::<BackupFrequency>().is_err());
    }
}
