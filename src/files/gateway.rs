use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::HttpError;
use crate::files::resolver::{self, ResolvedPath};
use crate::http::mime;

/// Directory index served in place of a directory.
pub const INDEX_FILE: &str = "index.html";

/// A file opened for a GET response. The contents are streamed later.
#[derive(Debug)]
pub struct StaticFile {
    pub file: fs::File,
    pub len: u64,
    pub content_type: String,
}

/// The only component that touches the filesystem.
///
/// `root` holds the files served by GET and removed by DELETE; `storage`
/// receives uploads. Both are expected to be canonical paths.
#[derive(Debug)]
pub struct FileGateway {
    root: PathBuf,
    storage: PathBuf,
    uploads: AtomicU64,
}

impl FileGateway {
    pub fn new(root: impl Into<PathBuf>, storage: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            storage: storage.into(),
            uploads: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage(&self) -> &Path {
        &self.storage
    }

    /// Resolves a request path under the root directory.
    pub fn resolve(&self, target: &str) -> Result<ResolvedPath, HttpError> {
        Ok(resolver::resolve(&self.root, target)?)
    }

    /// Opens a regular file, substituting the directory index for directories.
    pub async fn read(&self, target: &ResolvedPath) -> Result<StaticFile, HttpError> {
        let mut target = target.clone();
        let mut meta = metadata(target.path()).await?;

        if meta.is_dir() {
            target = target.join(INDEX_FILE);
            meta = metadata(target.path()).await?;
        }

        if !meta.is_file() {
            return Err(HttpError::NotFound);
        }

        self.ensure_contained(target.path()).await?;

        let file = fs::File::open(target.path()).await.map_err(fs_error)?;
        let len = file.metadata().await.map_err(fs_error)?.len();

        Ok(StaticFile {
            file,
            len,
            content_type: mime::content_type_for(target.path()),
        })
    }

    /// Removes a regular file. The root itself and directories are refused.
    pub async fn remove(&self, target: &ResolvedPath) -> Result<(), HttpError> {
        if target.is_base() {
            return Err(HttpError::RootDeletion);
        }

        let meta = fs::symlink_metadata(target.path()).await.map_err(fs_error)?;
        if meta.is_dir() {
            return Err(HttpError::Forbidden("only files can be deleted".to_string()));
        }

        // A symlink is removed itself; only its parent has to be inside root.
        if let Some(parent) = target.path().parent() {
            self.ensure_contained(parent).await?;
        }

        fs::remove_file(target.path()).await.map_err(fs_error)
    }

    /// Writes an upload to a fresh file in the storage directory and returns
    /// the file name chosen for it.
    ///
    /// Names are `upload_<unix-millis>_<sequence>.bin`. The sequence comes
    /// from a counter shared by all connections and the file is created with
    /// `create_new`, so an existing file is never overwritten.
    pub async fn store(&self, body: &[u8]) -> Result<String, HttpError> {
        loop {
            let name = format!(
                "upload_{}_{:06}.bin",
                chrono::Utc::now().timestamp_millis(),
                self.uploads.fetch_add(1, Ordering::Relaxed)
            );
            let path = self.storage.join(&name);

            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            if let Err(e) = write_all(&mut file, body).await {
                // Don't leave a truncated upload behind.
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(e.into());
            }

            return Ok(name);
        }
    }

    /// Guards against symlinks that point outside the root.
    async fn ensure_contained(&self, path: &Path) -> Result<(), HttpError> {
        let real = fs::canonicalize(path).await.map_err(fs_error)?;

        if real.starts_with(&self.root) {
            Ok(())
        } else {
            Err(HttpError::Forbidden("path leaves the served directory".to_string()))
        }
    }
}

async fn write_all(file: &mut fs::File, body: &[u8]) -> std::io::Result<()> {
    file.write_all(body).await?;
    file.flush().await
}

async fn metadata(path: &Path) -> Result<std::fs::Metadata, HttpError> {
    fs::metadata(path).await.map_err(fs_error)
}

fn fs_error(err: std::io::Error) -> HttpError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::NotADirectory => HttpError::NotFound,
        ErrorKind::PermissionDenied => HttpError::Forbidden("permission denied".to_string()),
        _ => HttpError::Io(err),
    }
}
