//! Dead-letter directory for report files that cannot be committed.
//!
//! A quarantined file keeps its original name (suffixed with the quarantine
//! time on collision) and gets a sibling `<name>.error` file describing why it
//! was set aside. Nothing in the pipeline reads this directory back; operators
//! fix the file and drop it into the watched directory again.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Extension of the sidecar file holding the quarantine reason.
pub const REASON_EXTENSION: &str = "error";

/// Quarantine directory handle.
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move `source` into quarantine and record `reason` next to it.
    ///
    /// Returns the new location of the file. Once the file has moved, a
    /// failure to write the reason is only logged.
    pub async fn admit(&self, source: &Path, reason: &str) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = source
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let mut target = self.dir.join(file_name);
        if tokio::fs::try_exists(&target).await? {
            target = self.dir.join(stamped_name(source));
        }

        move_file(source, &target).await?;

        let sidecar = sidecar_path(&target);
        let body = format!(
            "source: {}\nquarantined_at: {}\nreason: {}\n",
            source.display(),
            Utc::now().to_rfc3339(),
            reason
        );
        if let Err(e) = tokio::fs::write(&sidecar, body).await {
            tracing::warn!(
                path = %target.display(),
                sidecar = %sidecar.display(),
                reason,
                error = %e,
                "Quarantined without a reason file"
            );
        }

        Ok(target)
    }
}

/// `report.json` -> `report.20240501T120000123456.json`
fn stamped_name(source: &Path) -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%6f");
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match source.extension() {
        Some(ext) => format!("{stem}.{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{stamp}"),
    }
}

fn sidecar_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(REASON_EXTENSION);
    PathBuf::from(name)
}

/// Rename, falling back to copy + remove when crossing filesystems.
async fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    match tokio::fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            tracing::debug!(error = %e, "Rename into quarantine failed, copying instead");
            tokio::fs::copy(source, target).await?;
            tokio::fs::remove_file(source).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unwritable_reason_still_admits() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("report_9.json");
        tokio::fs::write(&source, b"{}").await.unwrap();
        // a directory squatting on the sidecar name makes the write fail
        let quarantine_dir = dir.path().join("quarantine");
        tokio::fs::create_dir_all(quarantine_dir.join("report_9.json.error"))
            .await
            .unwrap();

        let target = Quarantine::new(&quarantine_dir)
            .admit(&source, "missing required field 'batch_id'")
            .await
            .unwrap();

        assert_eq!(target, quarantine_dir.join("report_9.json"));
        assert!(target.exists());
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_admit_moves_file_and_writes_reason() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("report_1.json");
        tokio::fs::write(&source, b"{broken").await.unwrap();

        let quarantine = Quarantine::new(dir.path().join("quarantine"));
        let target = quarantine
            .admit(&source, "malformed report: key must be a string")
            .await
            .unwrap();

        assert!(!source.exists());
        assert_eq!(target, dir.path().join("quarantine/report_1.json"));
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"{broken");

        let reason = tokio::fs::read_to_string(dir.path().join("quarantine/report_1.json.error"))
            .await
            .unwrap();
        assert!(reason.contains("malformed report"));
        assert!(reason.contains("report_1.json"));
    }

    #[tokio::test]
    async fn test_admit_does_not_overwrite_existing() {
        let dir = tempdir().unwrap();
        let quarantine = Quarantine::new(dir.path().join("quarantine"));

        let source = dir.path().join("dup.json");
        tokio::fs::write(&source, b"first").await.unwrap();
        let first = quarantine.admit(&source, "bad").await.unwrap();

        tokio::fs::write(&source, b"second").await.unwrap();
        let second = quarantine.admit(&source, "bad again").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(tokio::fs::read(&first).await.unwrap(), b"first");
        assert_eq!(tokio::fs::read(&second).await.unwrap(), b"second");
        assert_eq!(second.extension().unwrap(), "json");
    }

    #[tokio::test]
    async fn test_admit_missing_source() {
        let dir = tempdir().unwrap();
        let quarantine = Quarantine::new(dir.path().join("quarantine"));
        let err = quarantine
            .admit(&dir.path().join("missing.json"), "bad")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_stamped_name_keeps_extension() {
        let name = stamped_name(Path::new("/tmp/report_9.json"));
        assert!(name.starts_with("report_9."));
        assert!(name.ends_with(".json"));
    }
}
