//! Configuration module
//!
//! Upload engine settings loaded from the environment (with `.env` support).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::TargetKind;

const MAX_CONCURRENT_PER_OWNER: usize = 3;
const IDLE_TIMEOUT_SECS: u64 = 24 * 60 * 60;
const SWEEP_INTERVAL_SECS: u64 = 300;
const MAX_NEW_FILE_MB: u64 = 500;
const MAX_REPLACEMENT_MB: u64 = 500;
const TOMBSTONE_RETENTION_SECS: u64 = 24 * 60 * 60;
const STORAGE_PATH: &str = "./data/uploads";

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Active (Pending or Uploading) uploads allowed per owner. 0 = unlimited.
    pub max_concurrent_per_owner: usize,
    /// Inactivity window after which an upload is expired.
    pub idle_timeout: Duration,
    /// Interval between reaper sweeps.
    pub sweep_interval: Duration,
    pub max_new_file_bytes: u64,
    pub max_replacement_bytes: u64,
    /// How long terminal records stay queryable before the reaper deletes them.
    pub tombstone_retention: Duration,
    /// Root directory; partial files live in `partial/`, finalized files in `complete/`.
    pub storage_path: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_owner: MAX_CONCURRENT_PER_OWNER,
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
            max_new_file_bytes: MAX_NEW_FILE_MB * BYTES_PER_MB,
            max_replacement_bytes: MAX_REPLACEMENT_MB * BYTES_PER_MB,
            tombstone_retention: Duration::from_secs(TOMBSTONE_RETENTION_SECS),
            storage_path: PathBuf::from(STORAGE_PATH),
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let max_concurrent_per_owner = env::var("UPLOAD_MAX_CONCURRENT_PER_OWNER")
            .unwrap_or_else(|_| MAX_CONCURRENT_PER_OWNER.to_string())
            .parse::<usize>()
            .map_err(|_| {
                anyhow::anyhow!("UPLOAD_MAX_CONCURRENT_PER_OWNER must be a valid number")
            })?;

        let idle_timeout_secs = env::var("UPLOAD_IDLE_TIMEOUT_SECS")
            .unwrap_or_else(|_| IDLE_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("UPLOAD_IDLE_TIMEOUT_SECS must be a valid number"))?;

        let sweep_interval_secs = env::var("UPLOAD_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| SWEEP_INTERVAL_SECS.to_string())
            .parse::<u64>()
            .unwrap_or(SWEEP_INTERVAL_SECS);

        let max_new_file_mb = env::var("UPLOAD_MAX_NEW_FILE_MB")
            .unwrap_or_else(|_| MAX_NEW_FILE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_NEW_FILE_MB);

        let max_replacement_mb = env::var("UPLOAD_MAX_REPLACEMENT_MB")
            .unwrap_or_else(|_| MAX_REPLACEMENT_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_REPLACEMENT_MB);

        let tombstone_retention_secs = env::var("UPLOAD_TOMBSTONE_RETENTION_SECS")
            .unwrap_or_else(|_| TOMBSTONE_RETENTION_SECS.to_string())
            .parse::<u64>()
            .unwrap_or(TOMBSTONE_RETENTION_SECS);

        let storage_path = env::var("UPLOAD_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(STORAGE_PATH));

        let config = Self {
            max_concurrent_per_owner,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            max_new_file_bytes: max_new_file_mb.saturating_mul(BYTES_PER_MB),
            max_replacement_bytes: max_replacement_mb.saturating_mul(BYTES_PER_MB),
            tombstone_retention: Duration::from_secs(tombstone_retention_secs),
            storage_path,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.idle_timeout.is_zero() {
            return Err(anyhow::anyhow!(
                "UPLOAD_IDLE_TIMEOUT_SECS must be greater than zero"
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(anyhow::anyhow!(
                "UPLOAD_SWEEP_INTERVAL_SECS must be greater than zero"
            ));
        }

        if self.max_new_file_bytes == 0 || self.max_replacement_bytes == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_MAX_NEW_FILE_MB and UPLOAD_MAX_REPLACEMENT_MB must be greater than zero"
            ));
        }

        // Deadlines and purge cutoffs are computed from the current time
        let now = Utc::now();
        let idle_in_range = chrono::Duration::from_std(self.idle_timeout)
            .ok()
            .and_then(|idle| now.checked_add_signed(idle))
            .is_some();
        if !idle_in_range {
            return Err(anyhow::anyhow!("UPLOAD_IDLE_TIMEOUT_SECS is out of range"));
        }

        let retention_in_range = chrono::Duration::from_std(self.tombstone_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .is_some();
        if !retention_in_range {
            return Err(anyhow::anyhow!(
                "UPLOAD_TOMBSTONE_RETENTION_SECS is out of range"
            ));
        }

        if self.storage_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("UPLOAD_STORAGE_PATH must not be empty"));
        }

        Ok(())
    }

    /// Largest declared length accepted for the given target kind.
    pub fn max_length_for(&self, target: &TargetKind) -> u64 {
        match target {
            TargetKind::NewFile => self.max_new_file_bytes,
            TargetKind::Replace { .. } => self.max_replacement_bytes,
        }
    }

    pub fn partial_dir(&self) -> PathBuf {
        self.storage_path.join("partial")
    }

    pub fn complete_dir(&self) -> PathBuf {
        self.storage_path.join("complete")
    }

    /// Idle timeout as a `chrono::Duration` for timestamp arithmetic.
    pub fn idle_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.idle_timeout).unwrap_or(chrono::Duration::MAX)
    }

    pub fn tombstone_retention_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.tombstone_retention).unwrap_or(chrono::Duration::MAX)
    }

    /// Idle deadline for an upload last written at `now`. Saturates at the
    /// latest representable instant.
    pub fn idle_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.idle_timeout_chrono())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Terminal records last updated before this instant may be purged.
    /// Saturates at the earliest representable instant.
    pub fn tombstone_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.tombstone_retention_chrono())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
