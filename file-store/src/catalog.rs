use serde::Serialize;
use tokio::fs;

use crate::error::{FileStoreError, FileStoreResult};
use crate::locks::UserLocks;
use crate::namespace::UserNamespace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub user_dir: String,
    pub file: String,
}

/// An opened file ready to be streamed back to a client.
#[derive(Debug)]
pub struct Download {
    pub file: fs::File,
    pub len: u64,
}

/// Read/delete view over the files stored in user namespaces.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    namespaces: UserNamespace,
    locks: UserLocks,
}

impl FileCatalog {
    pub fn new(namespaces: UserNamespace, locks: UserLocks) -> Self {
        FileCatalog { namespaces, locks }
    }

    /// File names in `namespace`, sorted. A namespace that does not exist is `NotFound`.
    pub async fn list(&self, namespace: &str) -> FileStoreResult<Vec<String>> {
        let dir = self.namespaces.dir_for(namespace)?;
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| FileStoreError::from_io("scan", &dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileStoreError::from_io("scan", &dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| FileStoreError::from_io("scan", &entry.path(), e))?;
            if file_type.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Every file of every namespace, ordered by namespace then file name.
    ///
    /// A namespace that cannot be read is logged and left out.
    pub async fn list_all(&self) -> FileStoreResult<Vec<CatalogEntry>> {
        let mut all_files = Vec::new();
        for user_dir in self.namespace_names().await? {
            match self.list(&user_dir).await {
                Ok(files) => {
                    all_files.extend(files.into_iter().map(|file| CatalogEntry {
                        user_dir: user_dir.clone(),
                        file,
                    }));
                }
                Err(err) => {
                    tracing::error!(namespace = %user_dir, "Error reading namespace directory: {}", err);
                }
            }
        }
        Ok(all_files)
    }

    pub async fn delete(&self, namespace: &str, file_name: &str) -> FileStoreResult<()> {
        let path = self.namespaces.path_for(namespace, file_name).await?;
        let _guard = self.locks.lock(namespace).await;

        fs::remove_file(&path)
            .await
            .map_err(|e| FileStoreError::from_io("delete", &path, e))?;

        tracing::info!(user = namespace, path = %path.display(), "File deleted");
        Ok(())
    }

    /// Opens a file for download once no job of the namespace is writing.
    pub async fn open(&self, namespace: &str, file_name: &str) -> FileStoreResult<Download> {
        let path = self.namespaces.path_for(namespace, file_name).await?;
        let _guard = self.locks.lock(namespace).await;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| FileStoreError::from_io("read", &path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| FileStoreError::from_io("read", &path, e))?;

        if !metadata.is_file() {
            return Err(FileStoreError::NotFound(file_name.to_string()));
        }

        Ok(Download { file, len: metadata.len() })
    }

    async fn namespace_names(&self) -> FileStoreResult<Vec<String>> {
        let root = self.namespaces.root();
        let mut entries = fs::read_dir(root)
            .await
            .map_err(|e| FileStoreError::from_io("scan", root, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileStoreError::from_io("scan", root, e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_dir && crate::namespace::validate_name(&name).is_ok() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tempfile::{TempDir, tempdir};

    async fn catalog() -> (TempDir, FileCatalog, UserNamespace) {
        let dir = tempdir().unwrap();
        let namespaces = UserNamespace::new(dir.path()).await.unwrap();
        let catalog = FileCatalog::new(namespaces.clone(), UserLocks::new());
        (dir, catalog, namespaces)
    }

    async fn put(namespaces: &UserNamespace, user: &str, name: &str, data: &[u8]) {
        let path = namespaces.resolve(user).await.unwrap().join(name);
        fs::write(path, data).await.unwrap();
    }

    #[tokio::test]
    async fn list_is_sorted_and_missing_namespace_is_not_found() {
        let (_dir, catalog, namespaces) = catalog().await;
        put(&namespaces, "alice", "b.txt.gz", b"b").await;
        put(&namespaces, "alice", "a.txt.gz", b"a").await;

        assert_eq!(catalog.list("alice").await.unwrap(), vec!["a.txt.gz", "b.txt.gz"]);
        assert!(matches!(catalog.list("carol").await, Err(FileStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_all_matches_sum_of_lists() {
        let (_dir, catalog, namespaces) = catalog().await;
        assert!(catalog.list_all().await.unwrap().is_empty());

        put(&namespaces, "alice", "one", b"1").await;
        put(&namespaces, "alice", "two", b"2").await;
        put(&namespaces, "bob", "three", b"3").await;
        namespaces.resolve("carol").await.unwrap();

        let all = catalog.list_all().await.unwrap();
        let mut sum = 0;
        for user in ["alice", "bob", "carol"] {
            sum += catalog.list(user).await.unwrap().len();
        }
        assert_eq!(all.len(), sum);
        assert_eq!(
            all[0],
            CatalogEntry { user_dir: "alice".to_string(), file: "one".to_string() }
        );
        assert_eq!(all[2].user_dir, "bob");
    }

    #[tokio::test]
    async fn list_all_ignores_stray_files_in_root() {
        let (_dir, catalog, namespaces) = catalog().await;
        put(&namespaces, "alice", "one", b"1").await;
        fs::write(namespaces.root().join("README"), b"x").await.unwrap();

        assert_eq!(catalog.list_all().await.unwrap().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn list_all_skips_namespace_that_cannot_be_listed() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_dir, catalog, namespaces) = catalog().await;
        put(&namespaces, "alice", "one", b"1").await;
        put(&namespaces, "bob", "two", b"2").await;
        // lossy conversion of the name points at a directory that does not exist
        fs::create_dir(namespaces.root().join(OsStr::from_bytes(b"broken\xff")))
            .await
            .unwrap();

        assert_eq!(
            catalog.list_all().await.unwrap(),
            vec![
                CatalogEntry { user_dir: "alice".to_string(), file: "one".to_string() },
                CatalogEntry { user_dir: "bob".to_string(), file: "two".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let (_dir, catalog, namespaces) = catalog().await;
        namespaces.resolve("alice").await.unwrap();

        assert!(matches!(
            catalog.delete("alice", "nothing.txt").await,
            Err(FileStoreError::NotFound(_))
        ));
        assert!(matches!(
            catalog.delete("nobody", "nothing.txt").await,
            Err(FileStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_and_open_existing_file() {
        let (_dir, catalog, namespaces) = catalog().await;
        put(&namespaces, "alice", "report.txt.gz", b"payload").await;

        let mut download = catalog.open("alice", "report.txt.gz").await.unwrap();
        assert_eq!(download.len, 7);
        let mut buf = Vec::new();
        download.file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"payload");

        catalog.delete("alice", "report.txt.gz").await.unwrap();
        assert!(catalog.list("alice").await.unwrap().is_empty());
        assert!(matches!(
            catalog.open("alice", "report.txt.gz").await,
            Err(FileStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_waits_for_the_namespace_lock() {
        let dir = tempdir().unwrap();
        let namespaces = UserNamespace::new(dir.path()).await.unwrap();
        let locks = UserLocks::new();
        let catalog = FileCatalog::new(namespaces.clone(), locks.clone());
        put(&namespaces, "alice", "report.txt.gz", b"payload").await;

        let guard = locks.lock("alice").await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            catalog.open("alice", "report.txt.gz"),
        )
        .await;
        assert!(blocked.is_err());

        drop(guard);
        assert_eq!(catalog.open("alice", "report.txt.gz").await.unwrap().len, 7);
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_touching_disk() {
        let (_dir, catalog, _namespaces) = catalog().await;
        assert!(matches!(
            catalog.delete("alice", "../bob/secret").await,
            Err(FileStoreError::InvalidName(_))
        ));
        assert!(matches!(
            catalog.open("..", "passwd").await,
            Err(FileStoreError::InvalidName(_))
        ));
    }
}
