//! Per-instance temporary directory tree.
//!
//! Layout: `<temp_root>/run-<unique>/{data,logs}`. The `data` directory is
//! bind-mounted into the container.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::WorkspaceError;

/// A uniquely named directory tree owned by one instance.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    data_dir: PathBuf,
    logs_dir: PathBuf,
}

impl Workspace {
    /// Create a fresh `run-<unique>` tree under `temp_root`.
    pub async fn create(temp_root: &Path) -> Result<Self, WorkspaceError> {
        tokio::fs::create_dir_all(temp_root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: temp_root.to_path_buf(),
                source,
            })?;

        // create_dir fails on an existing path, so a name collision surfaces
        // as an error instead of two instances sharing a tree.
        let root = temp_root.join(format!("run-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir(&root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: root.clone(),
                source,
            })?;

        let data_dir = root.join("data");
        let logs_dir = root.join("logs");
        tokio::try_join!(create_subdir(&data_dir), create_subdir(&logs_dir))?;

        // The container runs as its own user and writes through the bind mount.
        tokio::fs::set_permissions(&data_dir, std::fs::Permissions::from_mode(0o777))
            .await
            .map_err(|source| WorkspaceError::Create {
                path: data_dir.clone(),
                source,
            })?;

        info!(path = %root.display(), "Workspace created");
        Ok(Self {
            root,
            data_dir,
            logs_dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Recursively remove the tree. Removing an already removed tree succeeds.
    pub async fn cleanup(&self) -> Result<(), WorkspaceError> {
        match remove_tree(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(path = %self.root.display(), "Permission denied, restoring owner access and retrying");
                let root = self.root.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || restore_owner_access(&root)).await {
                    warn!(path = %self.root.display(), error = %e, "Restoring owner access failed");
                }
                remove_tree(&self.root)
                    .await
                    .map_err(|source| WorkspaceError::Remove {
                        path: self.root.clone(),
                        source,
                    })?;
            }
            Err(source) => {
                return Err(WorkspaceError::Remove {
                    path: self.root.clone(),
                    source,
                });
            }
        }

        info!(path = %self.root.display(), "Workspace removed");
        Ok(())
    }

    /// Synchronous best-effort removal for use from `Drop`.
    pub(crate) fn cleanup_blocking(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.root.display(), error = %e, "Failed to remove workspace");
        }
    }
}

async fn create_subdir(path: &Path) -> Result<(), WorkspaceError> {
    tokio::fs::create_dir(path)
        .await
        .map_err(|source| WorkspaceError::Create {
            path: path.to_path_buf(),
            source,
        })
}

async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Workspace already removed");
            Ok(())
        }
        other => other,
    }
}

/// Add `rwx` for the owner on every directory we can reach. Entries owned by
/// another user are skipped.
fn restore_owner_access(dir: &Path) {
    if let Ok(meta) = std::fs::symlink_metadata(dir) {
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o700);
        let _ = std::fs::set_permissions(dir, perms);
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            restore_owner_access(&entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_data_and_logs_under_unique_run_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path()).await.unwrap();

        assert!(ws.data_dir().is_dir());
        assert!(ws.logs_dir().is_dir());
        assert_eq!(ws.data_dir().parent(), Some(ws.path()));
        let name = ws.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("run-"), "unexpected name {name}");
    }

    #[tokio::test]
    async fn creates_missing_temp_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let ws = Workspace::create(&nested).await.unwrap();
        assert!(ws.path().starts_with(&nested));
    }

    #[tokio::test]
    async fn workspaces_never_share_a_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = tokio::join!(Workspace::create(tmp.path()), Workspace::create(tmp.path()));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path(), b.path());
        assert_ne!(a.data_dir(), b.data_dir());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path()).await.unwrap();
        tokio::fs::write(ws.data_dir().join("shared-local-instance.db"), b"x")
            .await
            .unwrap();

        ws.cleanup().await.unwrap();
        assert!(!ws.path().exists());
        ws.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_recovers_from_locked_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path()).await.unwrap();
        let locked = ws.data_dir().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("file"), b"x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        ws.cleanup().await.unwrap();
        assert!(!ws.path().exists());
    }

    #[tokio::test]
    async fn fails_when_root_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();

        let err = Workspace::create(&file).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Create { .. }));
    }
}
