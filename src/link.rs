//! Idempotent directory and symlink convergence.

use anyhow::Result;
use log::debug;
use std::collections::HashSet;
use std::path::Path;

use crate::error::StockpileError;
use crate::runtime::{Runtime, is_path_under, resolve_link_target};

/// What [`reconcile_symlink`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    /// The link already pointed at the target.
    Unchanged,
    /// No link existed; one was created.
    Created,
    /// A link to a different target was replaced.
    Replaced,
}

/// Create `path` and any missing parents. No-op if it is already a directory.
pub fn ensure_directory<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<()> {
    if runtime.is_dir(path) {
        return Ok(());
    }
    debug!("Creating directory {}", path.display());
    runtime
        .create_dir_all(path)
        .map_err(|e| StockpileError::filesystem(path, format!("{:#}", e)))?;
    Ok(())
}

/// Converge on "the symlink at `path` points to `target`".
///
/// Refuses to touch a regular file or directory at `path`. A link with a
/// different target is removed and recreated; a correct link is left alone.
#[tracing::instrument(skip(runtime))]
pub fn reconcile_symlink<R: Runtime + ?Sized>(
    runtime: &R,
    path: &Path,
    target: &Path,
) -> Result<LinkChange> {
    let change = if runtime.is_symlink(path) {
        match runtime.read_link(path) {
            Ok(existing) if existing.as_path() == target => return Ok(LinkChange::Unchanged),
            Ok(existing) => {
                debug!(
                    "Unlinking {} because it is outdated (points to {})",
                    path.display(),
                    existing.display()
                );
            }
            Err(e) => {
                debug!("Unlinking {} because it is unreadable: {:#}", path.display(), e);
            }
        }
        runtime
            .remove_symlink(path)
            .map_err(|e| StockpileError::filesystem(path, format!("{:#}", e)))?;
        LinkChange::Replaced
    } else {
        if runtime.is_file(path) || runtime.is_dir(path) {
            return Err(StockpileError::Conflict(path.to_path_buf()).into());
        }
        if let Some(parent) = path.parent() {
            ensure_directory(runtime, parent)?;
        }
        LinkChange::Created
    };

    debug!("Linking {} to {}", path.display(), target.display());
    runtime
        .symlink(target, path)
        .map_err(|e| StockpileError::filesystem(path, format!("{:#}", e)))?;
    Ok(change)
}

/// Remove symlinks in `dir` whose names are not in `keep` and whose targets
/// resolve into `pool_dir`. Anything else in `dir` is left untouched.
///
/// Returns the number of links removed.
pub fn prune_stale_links<R: Runtime + ?Sized>(
    runtime: &R,
    dir: &Path,
    keep: &HashSet<String>,
    pool_dir: &Path,
) -> Result<usize> {
    let mut removed = 0;
    for entry in runtime.read_dir(dir)? {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if keep.contains(name) || !runtime.is_symlink(&entry) {
            continue;
        }
        let Ok(target) = runtime.read_link(&entry) else {
            continue;
        };
        if !is_path_under(&resolve_link_target(&entry, &target), pool_dir) {
            continue;
        }

        debug!("Removing stale link {}", entry.display());
        runtime
            .remove_symlink(&entry)
            .map_err(|e| StockpileError::filesystem(&entry, format!("{:#}", e)))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_directory_creates_parents() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("base/packages");
        ensure_directory(&RealRuntime, &nested).unwrap();
        assert!(nested.is_dir());
        // Second call is a no-op
        ensure_directory(&RealRuntime, &nested).unwrap();
    }

    #[test]
    fn test_ensure_directory_existing_is_noop() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| true);
        // No create_dir_all expectation
        ensure_directory(&runtime, Path::new("/srv/base")).unwrap();
    }

    #[test]
    fn test_ensure_directory_failure_is_filesystem_error() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_create_dir_all()
            .returning(|_| Err(anyhow::anyhow!("Permission denied")));

        let err = ensure_directory(&runtime, Path::new("/srv/base")).unwrap_err();
        assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::Filesystem));
        assert!(err.to_string().contains("Permission denied"));
    }

    #[test]
    fn test_reconcile_creates_link_and_parent() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("6-1-2024/a.rpm");

        let change =
            reconcile_symlink(&RealRuntime, &link, Path::new("../packages/a.rpm")).unwrap();

        assert_eq!(change, LinkChange::Created);
        assert_eq!(std::fs::read_link(&link).unwrap(), Path::new("../packages/a.rpm"));
    }

    #[test]
    fn test_reconcile_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("latest");
        let target = Path::new("6-1-2024");

        assert_eq!(
            reconcile_symlink(&RealRuntime, &link, target).unwrap(),
            LinkChange::Created
        );
        assert_eq!(
            reconcile_symlink(&RealRuntime, &link, target).unwrap(),
            LinkChange::Unchanged
        );
        assert_eq!(std::fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn test_reconcile_correct_link_performs_no_writes() {
        let link = PathBuf::from("/srv/base/latest");
        let mut runtime = MockRuntime::new();
        runtime
            .expect_is_symlink()
            .with(eq(link.clone()))
            .returning(|_| true);
        runtime
            .expect_read_link()
            .with(eq(link.clone()))
            .returning(|_| Ok(PathBuf::from("6-1-2024")));
        // Strict mock: remove_symlink/symlink/create_dir_all would panic

        let change = reconcile_symlink(&runtime, &link, Path::new("6-1-2024")).unwrap();
        assert_eq!(change, LinkChange::Unchanged);
    }

    #[test]
    fn test_reconcile_replaces_outdated_link() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("latest");
        std::os::unix::fs::symlink("5-31-2024", &link).unwrap();

        let change = reconcile_symlink(&RealRuntime, &link, Path::new("6-1-2024")).unwrap();

        assert_eq!(change, LinkChange::Replaced);
        assert_eq!(std::fs::read_link(&link).unwrap(), Path::new("6-1-2024"));
    }

    #[test]
    fn test_reconcile_refuses_regular_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latest");
        std::fs::write(&path, b"keep me").unwrap();

        for _ in 0..2 {
            let err = reconcile_symlink(&RealRuntime, &path, Path::new("6-1-2024")).unwrap_err();
            assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::Conflict));
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn test_reconcile_refuses_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latest");
        std::fs::create_dir(&path).unwrap();

        let err = reconcile_symlink(&RealRuntime, &path, Path::new("6-1-2024")).unwrap_err();
        assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::Conflict));
        assert!(!err.to_string().contains("is a file"));
        assert!(err.to_string().contains("is not a symlink"));
        assert!(path.is_dir());
    }

    #[test]
    fn test_reconcile_symlink_failure_is_filesystem_error() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_symlink().returning(|_| false);
        runtime.expect_is_file().returning(|_| false);
        runtime.expect_is_dir().returning(|p| p == Path::new("/srv/base"));
        runtime
            .expect_symlink()
            .returning(|_, _| Err(anyhow::anyhow!("Read-only file system")));

        let err = reconcile_symlink(&runtime, Path::new("/srv/base/latest"), Path::new("v"))
            .unwrap_err();
        assert_eq!(StockpileError::kind_of(&err), Some(ErrorKind::Filesystem));
    }

    #[test]
    fn test_prune_stale_links_only_touches_pool_links() {
        let dir = tempdir().unwrap();
        let pool = dir.path().join("packages");
        let version = dir.path().join("6-1-2024");
        std::fs::create_dir_all(&pool).unwrap();
        std::fs::create_dir_all(&version).unwrap();

        std::os::unix::fs::symlink("../packages/keep.rpm", version.join("keep.rpm")).unwrap();
        std::os::unix::fs::symlink("../packages/old.rpm", version.join("old.rpm")).unwrap();
        std::os::unix::fs::symlink("/etc/hosts", version.join("foreign")).unwrap();
        std::fs::write(version.join("notes.txt"), b"x").unwrap();

        let keep: HashSet<String> = ["keep.rpm".to_string()].into_iter().collect();
        let removed = prune_stale_links(&RealRuntime, &version, &keep, &pool).unwrap();

        assert_eq!(removed, 1);
        assert!(version.join("keep.rpm").is_symlink());
        assert!(!version.join("old.rpm").is_symlink());
        assert!(version.join("foreign").is_symlink());
        assert!(version.join("notes.txt").is_file());
    }
}
