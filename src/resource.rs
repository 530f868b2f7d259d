//! Scoped storage for directly uploaded images.
//!
//! An upload is either written to a uniquely named file under the image
//! directory or kept in memory. Whichever it is, the [`ResourceHandle`]
//! owns it and the backing file is removed when the handle goes away,
//! including on early returns and failed writes.

use axum::body::Bytes;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::StorageMode;
use crate::error::ResourceError;

#[derive(Debug, Clone)]
pub struct ResourceHandler {
    mode: StorageMode,
    image_dir: PathBuf,
}

enum Source {
    Disk(File),
    Memory(Cursor<Bytes>),
}

/// Deletes the file at `path` when dropped.
struct PathGuard {
    path: Option<PathBuf>,
}

impl PathGuard {
    async fn remove(mut self) -> std::io::Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Temporary file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(path = %path.display(), error = %e, "Failed to remove temporary file");
                }
            }
        }
    }
}

/// Byte source for exactly one classification attempt.
pub struct ResourceHandle {
    source: Source,
    guard: Option<PathGuard>,
}

impl ResourceHandler {
    pub fn new(mode: StorageMode, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            image_dir: image_dir.into(),
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    #[tracing::instrument(skip(self, data), fields(mode = ?self.mode, bytes = data.len()))]
    pub async fn acquire(
        &self,
        filename: &str,
        data: Bytes,
    ) -> Result<ResourceHandle, ResourceError> {
        if filename.is_empty() {
            return Err(ResourceError::EmptyFilename);
        }

        match self.mode {
            StorageMode::Disk => {
                tokio::fs::create_dir_all(&self.image_dir).await?;
                let path = self.image_dir.join(unique_name(filename));
                let guard = PathGuard {
                    path: Some(path.clone()),
                };

                let mut file = File::create(&path).await?;
                file.write_all(&data).await?;
                file.flush().await?;
                drop(file);

                let file = File::open(&path).await?;
                tracing::info!(path = %path.display(), "File saved");
                Ok(ResourceHandle {
                    source: Source::Disk(file),
                    guard: Some(guard),
                })
            }
            StorageMode::Memory => {
                tracing::info!("File saved in memory");
                Ok(ResourceHandle {
                    source: Source::Memory(Cursor::new(data)),
                    guard: None,
                })
            }
        }
    }
}

impl ResourceHandle {
    pub fn path(&self) -> Option<&Path> {
        self.guard.as_ref().and_then(|guard| guard.path.as_deref())
    }

    pub async fn read_all(&mut self) -> Result<Bytes, ResourceError> {
        match &mut self.source {
            Source::Disk(file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
            Source::Memory(cursor) => {
                let mut buf = Vec::with_capacity(cursor.get_ref().len());
                cursor.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Closes the source and deletes the backing file if it still exists.
    pub async fn release(self) -> Result<(), ResourceError> {
        let ResourceHandle { source, guard } = self;
        drop(source);
        if let Some(guard) = guard {
            guard.remove().await?;
        }
        Ok(())
    }
}

/// Random stem plus the sanitized extension of the original filename.
fn unique_name(filename: &str) -> String {
    let stem = uuid::Uuid::new_v4().to_string();
    match extension(filename) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Last dot-delimited suffix, restricted to characters safe in a filename.
fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (!ext.is_empty()).then_some(ext)
}
