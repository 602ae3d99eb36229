// Log Manager Service
// Retention-based pruning of server log files

use std::path::Path;
use std::time::{Duration, SystemTime};

/// Delete `.log` files older than the retention window
pub fn prune_logs(log_dir: &Path, retention_days: u32) -> Result<usize, String> {
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let mut removed = 0;

    let entries = std::fs::read_dir(log_dir).map_err(|e| format!("Failed to read log dir: {e}"))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to prune log {path:?}: {e}"),
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_prunes_only_stale_log_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("old.log"), b"x").unwrap();
        fs::write(temp.path().join("keep.txt"), b"x").unwrap();

        // With zero retention, every log file is stale
        let removed = prune_logs(temp.path(), 0).unwrap();
        assert_eq!(removed, 1);
        assert!(!temp.path().join("old.log").exists());
        assert!(temp.path().join("keep.txt").exists());
    }

    #[test]
    fn test_fresh_logs_survive() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("server.log"), b"x").unwrap();

        let removed = prune_logs(temp.path(), 30).unwrap();
        assert_eq!(removed, 0);
        assert!(temp.path().join("server.log").exists());
    }
}
