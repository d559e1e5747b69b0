//! Single-writer guard for a corpus.
//!
//! `kidx ingest` holds an [`IngestLock`] for the duration of the run. The lock
//! is a file created with `create_new`, so a second ingest of the same corpus
//! fails fast instead of interleaving ledger rewrites. The file is removed on
//! drop.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct IngestLock {
    path: PathBuf,
}

impl IngestLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                bail!(
                    "another ingest holds {} (delete it if no ingest is running)",
                    path.display()
                );
            }
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        };
        // Constructed first so a failed write still removes the file on drop.
        let lock = Self {
            path: path.to_path_buf(),
        };
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(lock)
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ingest.lock");

        let lock = IngestLock::acquire(&path).unwrap();
        assert!(IngestLock::acquire(&path).is_err());
        drop(lock);

        assert!(!path.exists());
        assert!(IngestLock::acquire(&path).is_ok());
    }

    #[test]
    fn lock_file_records_the_pid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ingest.lock");

        let _lock = IngestLock::acquire(&path).unwrap();
        let pid = std::fs::read_to_string(&path).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }

    #[test]
    fn missing_directory_is_an_error_not_a_lock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent").join("ingest.lock");
        let err = IngestLock::acquire(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("creating"));
    }
}
