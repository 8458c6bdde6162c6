//! Write-to-temporary-then-rename file replacement

use crate::io::error::StoreError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Replace `path` with `content` so that readers never observe a partial file.
///
/// The content is written to a temporary sibling, then renamed over the
/// target. The temporary name carries the writer's pid and a per-process
/// sequence number, so no two writers share a temporary file.
///
/// Not fsynced: these are runtime files under the temp directory, rebuilt
/// after a reboot. Only the rename has to be atomic.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp_path = temp_path_for(path);
    {
        let mut tmp_file = fs::File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        tmp_file
            .write_all(content)
            .map_err(|e| StoreError::io(&tmp_path, e))?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    path.with_file_name(format!(".{file_name}.{}.{seq}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sub/record.json");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("record.json");

        write_atomic(&path, b"{}").unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["record.json".to_string()]);
    }

    #[test]
    fn test_temp_paths_are_unique_per_write() {
        let path = Path::new("/tmp/asset-relay/coordination.json");
        assert_ne!(temp_path_for(path), temp_path_for(path));
    }

    #[test]
    fn test_write_atomic_rename_failure_reports_io_error() {
        let temp_dir = TempDir::new().unwrap();
        // A directory in place of the target makes the rename fail.
        let path = temp_dir.path().join("record.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupant"), b"x").unwrap();

        let result = write_atomic(&path, b"{}");
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }
}
