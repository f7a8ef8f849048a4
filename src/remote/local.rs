//! Local filesystem implementation of [`RemoteFs`]
//!
//! Useful when the data files have already been mirrored to the machine
//! running the pipeline, and for exercising the load path without a remote
//! host.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{RemoteError, RemoteFs, RemoteReader, RemoteResult};

/// Local filesystem access
///
/// With a root, remote paths are resolved beneath it: `/data/users` maps to
/// `<root>/data/users`.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    root: Option<PathBuf>,
}

impl LocalFs {
    /// Resolve paths as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve paths beneath `root`
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => Path::new(path).to_path_buf(),
        }
    }
}

#[async_trait]
impl RemoteFs for LocalFs {
    async fn list_dir(&self, dir: &str) -> RemoteResult<Option<Vec<String>>> {
        let list_failed = |e: std::io::Error| RemoteError::List {
            path: dir.to_string(),
            message: e.to_string(),
        };

        let mut entries = match tokio::fs::read_dir(self.resolve(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(list_failed(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_failed)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(Some(names))
    }

    async fn open_read(&self, path: &str) -> RemoteResult<RemoteReader> {
        let file = tokio::fs::File::open(self.resolve(path))
            .await
            .map_err(|e| RemoteError::Open {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_missing_dir_is_none() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::rooted(dir.path());
        assert!(fs.list_dir("/nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rooted_list_and_read() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/a.csv"), "id\n1\n").unwrap();

        let fs = LocalFs::rooted(dir.path());
        let names = fs.list_dir("/data").await.unwrap().unwrap();
        assert_eq!(names, vec!["a.csv".to_string()]);

        let mut reader = fs.open_read("/data/a.csv").await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "id\n1\n");
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::rooted(dir.path());
        assert!(matches!(
            fs.open_read("/missing.csv").await,
            Err(RemoteError::Open { .. })
        ));
    }
}
