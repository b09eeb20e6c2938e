//! POSIX archive backend
//!
//! Filesystem modes against the site's archive root. Copy and move treat
//! a missing source as fatal for the item; delete tolerates it. All
//! successful operations rewrite the payload entries to their new
//! locations.

use std::path::Path;

use tracing::{debug, warn};

use crate::archive::ArchiveError;

/// Copies the payload files into `dest`, keeping the sources.
pub fn copy(dest: &Path, payload: &mut [String]) -> Result<(), ArchiveError> {
    std::fs::create_dir_all(dest)?;
    for entry in payload.iter_mut() {
        let source = Path::new(entry);
        if !source.exists() {
            return Err(ArchiveError::MissingSource(entry.clone()));
        }
        let target = dest.join(file_name(source));
        std::fs::copy(source, &target)?;
        debug!(from = %entry, to = %target.display(), "copied");
        *entry = target.display().to_string();
    }
    Ok(())
}

/// Moves the payload files into `dest`.
///
/// Rename first; falls back to copy-and-remove when the archive root is
/// on a different filesystem.
pub fn relocate(dest: &Path, payload: &mut [String]) -> Result<(), ArchiveError> {
    std::fs::create_dir_all(dest)?;
    for entry in payload.iter_mut() {
        let source = Path::new(entry);
        if !source.exists() {
            return Err(ArchiveError::MissingSource(entry.clone()));
        }
        let target = dest.join(file_name(source));
        if std::fs::rename(source, &target).is_err() {
            std::fs::copy(source, &target)?;
            std::fs::remove_file(source)?;
        }
        debug!(from = %entry, to = %target.display(), "moved");
        *entry = target.display().to_string();
    }
    Ok(())
}

/// Deletes the payload files. Already-missing files are skipped.
pub fn delete(payload: &mut Vec<String>) -> Result<(), ArchiveError> {
    for entry in payload.iter() {
        let source = Path::new(entry);
        if !source.exists() {
            warn!(path = %entry, "file already gone, skipping delete");
            continue;
        }
        std::fs::remove_file(source)?;
        debug!(path = %entry, "deleted");
    }
    payload.clear();
    Ok(())
}

/// Grants the workspace group read access on the archived path.
///
/// ACL failures are logged, never fatal: the artifacts are already in
/// place and a follow-up cycle can retry ownership.
pub async fn permissions(path: &Path, group: &str) {
    let target = path.display().to_string();
    let acl = format!("g:{group}:r");
    match tokio::process::Command::new("setfacl")
        .args(["-R", "-m", &acl, &target])
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            debug!(%target, %group, "permissions set");
        }
        Ok(output) => {
            warn!(
                %target,
                status = ?output.status.code(),
                "setfacl failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Err(err) => {
            warn!(%target, "setfacl unavailable: {err}");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, b"payload").unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_copy_rewrites_entries() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let mut payload = vec![touch(scratch.path(), "a.dat")];

        copy(dest.path(), &mut payload).unwrap();
        assert_eq!(payload[0], dest.path().join("a.dat").display().to_string());
        assert!(dest.path().join("a.dat").exists());
        assert!(scratch.path().join("a.dat").exists());
    }

    #[test]
    fn test_relocate_removes_source() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let mut payload = vec![touch(scratch.path(), "b.dat")];

        relocate(dest.path(), &mut payload).unwrap();
        assert!(dest.path().join("b.dat").exists());
        assert!(!scratch.path().join("b.dat").exists());
    }

    #[test]
    fn test_copy_missing_source_fails() {
        let dest = tempfile::tempdir().unwrap();
        let mut payload = vec!["/nope/missing.dat".to_string()];
        let err = copy(dest.path(), &mut payload).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingSource(_)));
    }

    #[test]
    fn test_delete_tolerates_missing() {
        let scratch = tempfile::tempdir().unwrap();
        let mut payload = vec![
            touch(scratch.path(), "c.dat"),
            "/nope/already-gone.dat".to_string(),
        ];
        delete(&mut payload).unwrap();
        assert!(payload.is_empty());
        assert!(!scratch.path().join("c.dat").exists());
    }
}
