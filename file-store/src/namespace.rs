use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::error::{FileStoreError, FileStoreResult};

/// Per-user storage directories under a single root.
///
/// Every path handed out is built from names that passed [`validate_name`] and,
/// when it exists on disk, is checked to still resolve inside the root.
#[derive(Debug, Clone)]
pub struct UserNamespace {
    root: PathBuf,
}

impl UserNamespace {
    /// Opens (creating if needed) the storage root.
    pub async fn new(root: impl Into<PathBuf>) -> FileStoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| FileStoreError::from_io("create", &root, e))?;
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| FileStoreError::from_io("access", &root, e))?;

        Ok(UserNamespace { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `username`, without touching the filesystem.
    pub fn dir_for(&self, username: &str) -> FileStoreResult<PathBuf> {
        validate_name(username)?;
        Ok(self.root.join(username))
    }

    /// Returns the namespace directory, creating it on first access.
    ///
    /// Uses a single create call and treats `AlreadyExists` as success, so racing
    /// first requests for the same user all succeed.
    pub async fn resolve(&self, username: &str) -> FileStoreResult<PathBuf> {
        let dir = self.dir_for(username)?;

        match fs::create_dir(&dir).await {
            Ok(()) => {
                tracing::info!(user = username, path = %dir.display(), "Created namespace directory");
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let metadata = fs::metadata(&dir)
                    .await
                    .map_err(|e| FileStoreError::from_io("access", &dir, e))?;
                if !metadata.is_dir() {
                    return Err(FileStoreError::Io {
                        operation: "create",
                        path: dir,
                        source: io::Error::other("namespace path exists and is not a directory"),
                    });
                }
            }
            Err(err) => return Err(FileStoreError::from_io("create", &dir, err)),
        }

        self.ensure_contained(&dir).await?;
        Ok(dir)
    }

    /// Absolute path of `file_name` inside the namespace of `username`.
    ///
    /// Names with separators or dot segments are rejected before any path is composed.
    pub async fn path_for(&self, username: &str, file_name: &str) -> FileStoreResult<PathBuf> {
        validate_name(file_name)?;
        let path = self.dir_for(username)?.join(file_name);
        self.ensure_contained(&path).await?;
        Ok(path)
    }

    // symlinks can still point outside the root; only checkable once the target exists
    async fn ensure_contained(&self, path: &Path) -> FileStoreResult<()> {
        match fs::canonicalize(path).await {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(()),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "Path resolves outside storage root");
                Err(FileStoreError::InvalidName(path_name(path)))
            }
            Err(_) => Ok(()),
        }
    }
}

/// Accepts only a single plain path component: no separators, no `.`/`..`, no NUL.
pub fn validate_name(name: &str) -> FileStoreResult<()> {
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(FileStoreError::InvalidName(name.to_string()));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(FileStoreError::InvalidName(name.to_string())),
    }
}

fn path_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn traversal_names_are_rejected() {
        for name in ["", ".", "..", "../etc", "a/b", "..\\secret", "/etc/passwd", "nul\0byte"] {
            assert!(
                matches!(validate_name(name), Err(FileStoreError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_name("report.txt").is_ok());
        assert!(validate_name("..hidden").is_ok());
    }

    #[tokio::test]
    async fn concurrent_resolve_creates_one_directory() {
        let dir = tempdir().unwrap();
        let namespaces = UserNamespace::new(dir.path()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let namespaces = namespaces.clone();
            handles.push(tokio::spawn(async move { namespaces.resolve("alice").await }));
        }
        for handle in handles {
            let path = handle.await.unwrap().unwrap();
            assert!(path.ends_with("alice"));
        }

        let entries: Vec<_> = std::fs::read_dir(namespaces.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(namespaces.root().join("alice").is_dir());
    }

    #[tokio::test]
    async fn path_for_stays_inside_namespace() {
        let dir = tempdir().unwrap();
        let namespaces = UserNamespace::new(dir.path()).await.unwrap();

        let path = namespaces.path_for("alice", "report.txt").await.unwrap();
        assert_eq!(path, namespaces.root().join("alice").join("report.txt"));

        assert!(namespaces.path_for("alice", "../bob/report.txt").await.is_err());
        assert!(namespaces.path_for("..", "passwd").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escaping_root_is_rejected() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();

        let namespaces = UserNamespace::new(dir.path().join("uploads")).await.unwrap();
        namespaces.resolve("alice").await.unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret"),
            namespaces.root().join("alice").join("link"),
        )
        .unwrap();

        let result = namespaces.path_for("alice", "link").await;
        assert!(matches!(result, Err(FileStoreError::InvalidName(_))));
    }
}
