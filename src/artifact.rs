//! Local storage for downloaded compressed log artifacts

use crate::errors::Result;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Write granularity for streamed downloads
pub const CHUNK_SIZE: usize = 8 * 1024;

/// A compressed log file on disk. Left in place after the run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedArtifact {
    pub path: PathBuf,
    pub size: u64,
}

/// Create `path` and its parents. Succeeds if it already exists.
pub async fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    out_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn artifact_path(&self, source_name: &str) -> PathBuf {
        self.out_dir.join(format!("{}_queryLogs.gz", source_name))
    }

    /// Open a writer for the artifact of `source_name`, truncating any previous one
    pub async fn create_writer(&self, source_name: &str) -> Result<ArtifactWriter> {
        ensure_directory(&self.out_dir).await?;
        ArtifactWriter::create(self.artifact_path(source_name)).await
    }
}

/// Streams chunks to disk through a fixed-size buffer
#[derive(Debug)]
pub struct ArtifactWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl ArtifactWriter {
    pub async fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            writer: BufWriter::with_capacity(CHUNK_SIZE, file),
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        for block in chunk.chunks(CHUNK_SIZE) {
            self.writer.write_all(block).await?;
        }
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn finish(mut self) -> Result<CompressedArtifact> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;

        let size = fs::metadata(&self.path).await?.len();
        debug!("Artifact {} complete ({} bytes)", self.path.display(), size);

        Ok(CompressedArtifact {
            path: self.path,
            size,
        })
    }

    /// Drop the partially written file
    pub async fn discard(self) {
        let ArtifactWriter { path, writer, .. } = self;
        drop(writer);
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove partial artifact {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        ensure_directory(&nested).await.unwrap();
        ensure_directory(&nested).await.unwrap();

        assert!(nested.is_dir());
    }

    #[test]
    fn test_artifact_naming() {
        let store = ArtifactStore::new("mongodb_logs");
        assert_eq!(
            store.artifact_path("FederatedDatabaseInstance0"),
            PathBuf::from("mongodb_logs/FederatedDatabaseInstance0_queryLogs.gz")
        );
    }

    #[tokio::test]
    async fn test_streamed_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("out"));

        let mut writer = store.create_writer("df0").await.unwrap();
        let payload = vec![7u8; CHUNK_SIZE * 3 + 17];
        for piece in payload.chunks(5_000) {
            writer.write_chunk(piece).await.unwrap();
        }
        assert_eq!(writer.written(), payload.len() as u64);

        let artifact = writer.finish().await.unwrap();

        assert_eq!(artifact.path, store.artifact_path("df0"));
        assert_eq!(artifact.size, payload.len() as u64);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_discard_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let mut writer = store.create_writer("df0").await.unwrap();
        writer.write_chunk(b"partial").await.unwrap();
        writer.discard().await;

        assert!(!store.artifact_path("df0").exists());
    }
}
