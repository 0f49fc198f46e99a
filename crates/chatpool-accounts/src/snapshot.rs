use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::stats::AccountStats;
use crate::AccountId;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted optimizer state. Every field defaults so newer readers accept
/// older files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub account_stats: HashMap<AccountId, AccountStats>,
    #[serde(default)]
    pub global_attempts: u64,
    #[serde(default)]
    pub failed_accounts: HashSet<AccountId>,
}

impl StatsSnapshot {
    /// A missing or unreadable file is never fatal; selection just starts
    /// from scratch.
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "stats snapshot corrupt, starting empty");
                    Self::default()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "stats snapshot unreadable, starting empty");
                Self::default()
            }
        }
    }

    /// Atomic write: temp file in the same directory, then rename.
    pub fn store(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(self).map_err(io::Error::other)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("chatpool-snapshot-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn round_trip_preserves_counts() {
        let mut snapshot = StatsSnapshot {
            version: SNAPSHOT_VERSION,
            ..Default::default()
        };
        let mut stats = AccountStats::default();
        stats.record_success(120, 0.4, 30, 1.5);
        stats.record_failure();
        snapshot.account_stats.insert("acct-1".to_string(), stats);
        snapshot.global_attempts = 2;
        snapshot.failed_accounts.insert("acct-1".to_string());

        let path = scratch_path("roundtrip");
        snapshot.store(&path).unwrap();
        let loaded = StatsSnapshot::load(&path);
        fs::remove_file(&path).ok();

        let stats = &loaded.account_stats["acct-1"];
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(loaded.global_attempts, 2);
        assert!(loaded.failed_accounts.contains("acct-1"));
    }

    #[test]
    fn missing_and_corrupt_files_load_empty() {
        let loaded = StatsSnapshot::load(Path::new("/nonexistent/chatpool/stats.json"));
        assert!(loaded.account_stats.is_empty());

        let path = scratch_path("corrupt");
        fs::write(&path, b"not json").unwrap();
        let loaded = StatsSnapshot::load(&path);
        fs::remove_file(&path).ok();
        assert!(loaded.account_stats.is_empty());
        assert_eq!(loaded.global_attempts, 0);
    }
}
